//! Explicit dependency wiring for the order pipeline.
//!
//! Every collaborator is built once, here, and handed to the services that
//! need it. Nothing is looked up through globals. Unset backends default to
//! the in-memory implementations, which is what tests and local runs use.

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tokio::runtime::Handle;
use tracing::info;

use orderflow_events::{
    EventBus, InMemoryEventBus, InMemoryWorkQueue, Message, MessageHandler, RetryHandler, WorkQueue,
};
use orderflow_inventory::{Catalog, InMemoryInventoryLedger, InventoryLedger};
use orderflow_orders::ORDER_CREATED;

use crate::bulk_processor::BulkRowProcessor;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::finalizer::OrderFinalizer;
use crate::intake::IntakeValidator;
use crate::inventory::{HttpInventoryClient, PostgresInventoryLedger};
use crate::object_store::{FsObjectStore, InMemoryObjectStore, ObjectStore};
use crate::publisher::OrderEventPublisher;
use crate::store::{
    InMemoryOrderStore, InMemoryWebhookRegistry, OrderStore, PostgresOrderStore, PostgresWebhookRegistry,
    WebhookRegistry, apply_schema,
};
use crate::webhooks::{DeliveryPool, HttpWebhookTransport, WebhookDispatcher, WebhookTransport};
use crate::workers::{BusWorkerPool, QueueWorkerPool, WorkerPoolHandle, WorkerStats};

/// The assembled pipeline.
pub struct Pipeline {
    config: PipelineConfig,
    objects: Arc<dyn ObjectStore>,
    queue: Arc<dyn WorkQueue>,
    bus: Arc<dyn EventBus<Message>>,
    orders: Arc<dyn OrderStore>,
    registry: Arc<dyn WebhookRegistry>,
    ledger: Arc<dyn InventoryLedger>,
    catalog: Arc<dyn Catalog>,
    intake: IntakeValidator,
    processor: Arc<BulkRowProcessor>,
    finalizer: Arc<OrderFinalizer>,
    webhooks: Arc<WebhookDispatcher>,
}

impl Pipeline {
    pub fn builder(config: PipelineConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    /// All-in-memory pipeline, HTTP webhook transport.
    pub fn in_memory(config: PipelineConfig) -> Result<Self, PipelineError> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn intake(&self) -> &IntakeValidator {
        &self.intake
    }

    pub fn processor(&self) -> &Arc<BulkRowProcessor> {
        &self.processor
    }

    pub fn finalizer(&self) -> &Arc<OrderFinalizer> {
        &self.finalizer
    }

    pub fn webhooks(&self) -> &Arc<WebhookDispatcher> {
        &self.webhooks
    }

    pub fn objects(&self) -> &Arc<dyn ObjectStore> {
        &self.objects
    }

    pub fn queue(&self) -> &Arc<dyn WorkQueue> {
        &self.queue
    }

    pub fn bus(&self) -> &Arc<dyn EventBus<Message>> {
        &self.bus
    }

    pub fn orders(&self) -> &Arc<dyn OrderStore> {
        &self.orders
    }

    pub fn registry(&self) -> &Arc<dyn WebhookRegistry> {
        &self.registry
    }

    pub fn ledger(&self) -> &Arc<dyn InventoryLedger> {
        &self.ledger
    }

    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    /// Start the ingestion and finalization worker pools.
    ///
    /// The finalizer runs behind the retry wrapper; once its attempts are
    /// exhausted the event is nacked and the bus redelivers it.
    pub fn start(&self) -> Result<PipelineWorkers, PipelineError> {
        let processor = self.processor.clone();
        let ingest = QueueWorkerPool::spawn(
            "ingest",
            self.queue.clone(),
            self.config.queue_pool,
            self.config.queue_visibility,
            move |delivery| processor.process(delivery).map(|_| ()),
        )?;

        let finalizer = self.finalizer.clone();
        let handler = RetryHandler::new(move |m: &Message| finalizer.handle(m), self.config.retry);
        let finalize = BusWorkerPool::spawn(
            "finalize",
            self.bus.subscribe(ORDER_CREATED),
            self.config.bus_pool,
            Arc::new(handler),
        )?;

        Ok(PipelineWorkers { ingest, finalize })
    }
}

/// Running worker pools.
#[derive(Debug)]
pub struct PipelineWorkers {
    ingest: WorkerPoolHandle,
    finalize: WorkerPoolHandle,
}

impl PipelineWorkers {
    pub fn ingest_stats(&self) -> WorkerStats {
        self.ingest.stats()
    }

    pub fn finalize_stats(&self) -> WorkerStats {
        self.finalize.stats()
    }

    /// Stop both pools, letting in-flight messages finish.
    pub fn shutdown(self) {
        self.ingest.shutdown();
        self.finalize.shutdown();
    }
}

pub struct PipelineBuilder {
    config: PipelineConfig,
    objects: Option<Arc<dyn ObjectStore>>,
    queue: Option<Arc<dyn WorkQueue>>,
    bus: Option<Arc<dyn EventBus<Message>>>,
    orders: Option<Arc<dyn OrderStore>>,
    registry: Option<Arc<dyn WebhookRegistry>>,
    ledger: Option<Arc<dyn InventoryLedger>>,
    catalog: Option<Arc<dyn Catalog>>,
    transport: Option<Arc<dyn WebhookTransport>>,
}

impl PipelineBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            objects: None,
            queue: None,
            bus: None,
            orders: None,
            registry: None,
            ledger: None,
            catalog: None,
            transport: None,
        }
    }

    pub fn with_object_store(mut self, objects: Arc<dyn ObjectStore>) -> Self {
        self.objects = Some(objects);
        self
    }

    pub fn with_queue(mut self, queue: Arc<dyn WorkQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_bus(mut self, bus: Arc<dyn EventBus<Message>>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_order_store(mut self, orders: Arc<dyn OrderStore>) -> Self {
        self.orders = Some(orders);
        self
    }

    pub fn with_webhook_registry(mut self, registry: Arc<dyn WebhookRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Use one backend as both the ledger and the SKU/hub catalog.
    pub fn with_inventory<I>(mut self, inventory: Arc<I>) -> Self
    where
        I: InventoryLedger + Catalog + 'static,
    {
        self.ledger = Some(inventory.clone());
        self.catalog = Some(inventory);
        self
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn InventoryLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn Catalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn WebhookTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Swap in the durable backends named by the configuration: Postgres
    /// (`DATABASE_URL`), Redis Streams (`REDIS_URL`, `redis` feature), the
    /// inventory service (`ORDERFLOW_IMS_BASE_URL`) and the filesystem object
    /// store (`ORDERFLOW_OBJECT_ROOT`).
    ///
    /// Must be called outside the runtime behind `runtime`: the Postgres
    /// stores block on it.
    pub fn connect_backends(mut self, runtime: &Handle) -> Result<Self, PipelineError> {
        if let Some(root) = self.config.object_root.clone() {
            info!(root = %root, "using filesystem object store");
            self.objects = Some(Arc::new(FsObjectStore::new(root)));
        }

        if let Some(url) = self.config.database_url.clone() {
            let options = pg_connect_options(&url, self.config.finalizer_timeout)?;
            let pool = runtime
                .block_on(
                    PgPoolOptions::new()
                        .max_connections(10)
                        .acquire_timeout(self.config.finalizer_timeout)
                        .connect_with(options),
                )
                .map_err(|e| PipelineError::Fatal(format!("connect to postgres: {e}")))?;
            runtime
                .block_on(apply_schema(&pool))
                .map_err(|e| PipelineError::Fatal(format!("apply schema: {e}")))?;
            info!("connected to postgres");

            self.orders = Some(Arc::new(PostgresOrderStore::new(pool.clone(), runtime.clone())));
            self.registry = Some(Arc::new(PostgresWebhookRegistry::new(pool.clone(), runtime.clone())));
            if self.config.ims_base_url.is_none() {
                self = self.with_inventory(Arc::new(PostgresInventoryLedger::new(pool, runtime.clone())));
            }
        }

        if let Some(base) = self.config.ims_base_url.clone() {
            let client = HttpInventoryClient::new(&base, self.config.finalizer_timeout)
                .map_err(|e| PipelineError::Fatal(format!("inventory service client: {e}")))?;
            info!(base_url = %base, "using inventory service");
            self = self.with_inventory(Arc::new(client));
        }

        self.connect_redis()
    }

    #[cfg(feature = "redis")]
    fn connect_redis(mut self) -> Result<Self, PipelineError> {
        use crate::event_bus::{RedisStreamsEventBus, RedisWorkQueue};

        if let Some(url) = self.config.redis_url.clone() {
            let bus = RedisStreamsEventBus::new(&url)
                .map_err(|e| PipelineError::Fatal(format!("redis event bus: {e}")))?
                .with_max_retries(u64::from(self.config.queue_max_receives))
                .with_pending_timeout(self.config.queue_visibility);
            let queue = RedisWorkQueue::new(&url, "orderflow:ingestion", self.config.queue_max_receives)
                .map_err(|e| PipelineError::Fatal(format!("redis work queue: {e}")))?;
            info!("using redis streams bus and queue");
            self.bus = Some(Arc::new(bus));
            self.queue = Some(Arc::new(queue));
        }
        Ok(self)
    }

    #[cfg(not(feature = "redis"))]
    fn connect_redis(self) -> Result<Self, PipelineError> {
        if self.config.redis_url.is_some() {
            return Err(PipelineError::Fatal(
                "REDIS_URL is set but this build lacks the `redis` feature".into(),
            ));
        }
        Ok(self)
    }

    pub fn build(self) -> Result<Pipeline, PipelineError> {
        let config = self.config;

        let (ledger, catalog): (Arc<dyn InventoryLedger>, Arc<dyn Catalog>) = match (self.ledger, self.catalog) {
            (Some(ledger), Some(catalog)) => (ledger, catalog),
            (None, None) => {
                let inventory = Arc::new(InMemoryInventoryLedger::new());
                let ledger: Arc<dyn InventoryLedger> = inventory.clone();
                (ledger, inventory)
            }
            (Some(_), None) => {
                return Err(PipelineError::Fatal("a custom inventory ledger needs a catalog".into()));
            }
            (None, Some(catalog)) => {
                let ledger: Arc<dyn InventoryLedger> = Arc::new(InMemoryInventoryLedger::new());
                (ledger, catalog)
            }
        };

        let objects = self
            .objects
            .unwrap_or_else(|| Arc::new(InMemoryObjectStore::new()));
        let queue = self
            .queue
            .unwrap_or_else(|| Arc::new(InMemoryWorkQueue::new(config.queue_max_receives)));
        let bus = self
            .bus
            .unwrap_or_else(|| Arc::new(InMemoryEventBus::new().with_max_deliveries(config.queue_max_receives)));
        let orders = self.orders.unwrap_or_else(|| Arc::new(InMemoryOrderStore::new()));
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(InMemoryWebhookRegistry::new()));
        let transport: Arc<dyn WebhookTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpWebhookTransport::new(config.webhook_timeout)?),
        };

        let webhooks = Arc::new(WebhookDispatcher::new(
            registry.clone(),
            DeliveryPool::new(config.webhook_workers, config.webhook_queue, transport),
            config.webhook_retry,
        ));
        let intake = IntakeValidator::new(objects.clone(), queue.clone(), config.bucket.clone());
        let processor = Arc::new(BulkRowProcessor::new(
            objects.clone(),
            catalog.clone(),
            orders.clone(),
            OrderEventPublisher::new(bus.clone()),
            webhooks.clone(),
        ));
        let finalizer = Arc::new(OrderFinalizer::new(
            orders.clone(),
            ledger.clone(),
            webhooks.clone(),
            config.finalizer_timeout,
        ));

        Ok(Pipeline {
            config,
            objects,
            queue,
            bus,
            orders,
            registry,
            ledger,
            catalog,
            intake,
            processor,
            finalizer,
            webhooks,
        })
    }
}

/// Every statement and lock wait on a pooled connection is capped at
/// `timeout`, so no store call can outlive a finalization budget.
fn pg_connect_options(url: &str, timeout: Duration) -> Result<PgConnectOptions, PipelineError> {
    let millis = timeout.as_millis().max(1).to_string();
    let options: PgConnectOptions = url
        .parse()
        .map_err(|e| PipelineError::Fatal(format!("invalid DATABASE_URL: {e}")))?;
    Ok(options.options([("statement_timeout", millis.as_str()), ("lock_timeout", millis.as_str())]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhooks::RecordingTransport;

    #[test]
    fn custom_ledger_without_catalog_is_rejected() {
        let result = Pipeline::builder(PipelineConfig::default())
            .with_ledger(Arc::new(InMemoryInventoryLedger::new()))
            .with_transport(Arc::new(RecordingTransport::new()))
            .build();
        assert!(matches!(result, Err(PipelineError::Fatal(_))));
    }

    #[test]
    fn postgres_options_require_a_valid_url() {
        assert!(pg_connect_options("postgres://app@localhost/orders", Duration::from_secs(5)).is_ok());
        assert!(matches!(
            pg_connect_options("not a url", Duration::from_secs(5)),
            Err(PipelineError::Fatal(_))
        ));
    }

    #[test]
    fn defaults_share_the_in_memory_ledger_as_catalog() {
        let pipeline = Pipeline::builder(PipelineConfig::default().with_bucket("uploads"))
            .with_transport(Arc::new(RecordingTransport::new()))
            .build()
            .unwrap();
        assert_eq!(pipeline.intake().bucket(), "uploads");
        assert_eq!(pipeline.config().bucket, "uploads");
    }
}

//! End-to-end scenarios: intake → queue workers → processor → bus →
//! finalizer → webhooks, all in memory with a recording webhook transport.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use orderflow_core::{HubCode, SellerId, SkuCode, TenantId};
use orderflow_events::{InMemoryEventBus, InMemoryWorkQueue, RetryPolicy};
use orderflow_inventory::{InMemoryInventoryLedger, InventoryKey, InventoryLedger};
use orderflow_orders::{NewSubscription, ORDER_CREATED, ORDER_UPDATED, Order, OrderStatus};

use crate::config::PipelineConfig;
use crate::object_store::{InMemoryObjectStore, ObjectStore};
use crate::pipeline::Pipeline;
use crate::store::{InMemoryOrderStore, OrderStore, WebhookRegistry};
use crate::webhooks::{RecordingTransport, SIGNATURE_HEADER, verify_signature};

const HEADER: &str = "tenant_id,seller_id,hub_id,sku_id,quantity";

struct Harness {
    objects: Arc<InMemoryObjectStore>,
    queue: Arc<InMemoryWorkQueue>,
    bus: Arc<InMemoryEventBus>,
    orders: Arc<InMemoryOrderStore>,
    ledger: Arc<InMemoryInventoryLedger>,
    transport: Arc<RecordingTransport>,
    pipeline: Pipeline,
}

fn harness() -> Harness {
    harness_with(RecordingTransport::new())
}

fn harness_with(transport: RecordingTransport) -> Harness {
    let config = PipelineConfig::default()
        .with_queue_pool(1, 2)
        .with_bus_pool(1, 2)
        .with_queue_visibility(Duration::from_millis(200))
        .with_retry(RetryPolicy::fixed(2, Duration::from_millis(10)))
        .with_webhook_pool(2, 64);

    let objects = Arc::new(InMemoryObjectStore::new());
    let queue = Arc::new(InMemoryWorkQueue::new(config.queue_max_receives));
    let bus = Arc::new(InMemoryEventBus::new());
    let orders = Arc::new(InMemoryOrderStore::new());
    let ledger = Arc::new(InMemoryInventoryLedger::new());
    let transport = Arc::new(transport);

    let pipeline = Pipeline::builder(config)
        .with_object_store(objects.clone())
        .with_queue(queue.clone())
        .with_bus(bus.clone())
        .with_order_store(orders.clone())
        .with_inventory(ledger.clone())
        .with_transport(transport.clone())
        .build()
        .unwrap();

    Harness {
        objects,
        queue,
        bus,
        orders,
        ledger,
        transport,
        pipeline,
    }
}

fn key(tenant: &str, sku: &str) -> InventoryKey {
    InventoryKey::new(
        TenantId::new(tenant).unwrap(),
        SellerId::new("S1").unwrap(),
        HubCode::new("HUB-1").unwrap(),
        SkuCode::new(sku).unwrap(),
    )
}

fn eventually(timeout: Duration, f: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if f() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    f()
}

impl Harness {
    fn subscribe(&self, tenant: &str, url: &str, events: &[&str], secret: Option<&str>) {
        self.pipeline
            .registry()
            .register(NewSubscription {
                tenant_id: TenantId::new(tenant).unwrap(),
                callback_url: url.into(),
                events: events.iter().map(|e| e.to_string()).collect(),
                headers: Default::default(),
                secret: secret.map(str::to_string),
            })
            .unwrap();
    }

    fn upload(&self, key: &str, csv: &str) {
        self.objects.put("orders", key, csv.as_bytes().to_vec()).unwrap();
    }

    fn orders_with(&self, status: OrderStatus) -> Vec<Order> {
        self.orders.all().into_iter().filter(|o| o.status() == status).collect()
    }
}

#[test]
fn batch_with_negative_quantity_creates_two_orders_and_quarantines_one_row() {
    let h = harness();
    h.ledger.upsert(key("T1", "SKU-1"), 100).unwrap();
    h.upload(
        "uploads/batch.csv",
        &format!("{HEADER}\nT1,S1,HUB-1,SKU-1,2\nT1,S1,HUB-1,SKU-1,-5\nT1,S1,HUB-1,SKU-1,3\n"),
    );

    let workers = h.pipeline.start().unwrap();
    h.pipeline.intake().submit("uploads/batch.csv").unwrap();

    assert!(eventually(Duration::from_secs(5), || h.orders_with(OrderStatus::NewOrder).len() == 2));
    workers.shutdown();

    assert_eq!(h.orders.len(), 2);
    assert_eq!(h.bus.published_to(ORDER_CREATED).len(), 2);
    assert_eq!(h.ledger.get(&key("T1", "SKU-1")).unwrap().quantity, 95);

    let quarantined = h.objects.keys("orders", "errors/batch.csv-");
    assert_eq!(quarantined.len(), 1);
    let body = String::from_utf8(h.objects.get("orders", &quarantined[0]).unwrap()).unwrap();
    assert_eq!(body, format!("{HEADER}\nT1,S1,HUB-1,SKU-1,-5\n"));
    assert!(h.queue.is_empty());
}

#[test]
fn enough_stock_confirms_and_notifies_subscribers() {
    let h = harness();
    h.ledger.upsert(key("T1", "SKU-1"), 10).unwrap();
    h.subscribe("T1", "http://hooks.test/updated", &[ORDER_UPDATED], Some("s3cret"));
    h.subscribe("T1", "http://hooks.test/created", &[ORDER_CREATED], None);
    h.subscribe("T2", "http://hooks.test/other-tenant", &[ORDER_CREATED, ORDER_UPDATED], None);
    h.upload("a.csv", &format!("{HEADER}\nT1,S1,HUB-1,SKU-1,4\n"));

    let workers = h.pipeline.start().unwrap();
    h.pipeline.intake().submit("a.csv").unwrap();

    assert!(eventually(Duration::from_secs(5), || {
        h.transport.requests_to("http://hooks.test/updated").len() == 1
    }));
    workers.shutdown();

    let order = h.orders.all().remove(0);
    assert_eq!(order.status(), OrderStatus::NewOrder);
    assert_eq!(h.ledger.get(&key("T1", "SKU-1")).unwrap().quantity, 6);

    assert!(eventually(Duration::from_secs(2), || {
        h.transport.requests_to("http://hooks.test/created").len() == 1
    }));
    assert!(h.transport.requests_to("http://hooks.test/other-tenant").is_empty());

    let updated = h.transport.requests_to("http://hooks.test/updated").remove(0);
    let signature = updated.header(SIGNATURE_HEADER).unwrap();
    assert!(verify_signature("s3cret", &updated.body, signature));
    let body: serde_json::Value = serde_json::from_slice(&updated.body).unwrap();
    assert_eq!(body["tenant_id"], "T1");
    assert_eq!(body["event"], ORDER_UPDATED);
    assert_eq!(body["data"]["id"], order.id().to_string());
}

#[test]
fn insufficient_stock_keeps_order_on_hold_without_webhook() {
    let h = harness();
    h.ledger.upsert(key("T1", "SKU-1"), 3).unwrap();
    h.subscribe("T1", "http://hooks.test/updated", &[ORDER_UPDATED], None);
    h.upload("b.csv", &format!("{HEADER}\nT1,S1,HUB-1,SKU-1,5\n"));

    let workers = h.pipeline.start().unwrap();
    h.pipeline.intake().submit("b.csv").unwrap();

    assert!(eventually(Duration::from_secs(5), || workers.finalize_stats().succeeded == 1));
    workers.shutdown();

    assert_eq!(h.orders_with(OrderStatus::OnHold).len(), 1);
    assert_eq!(h.ledger.get(&key("T1", "SKU-1")).unwrap().quantity, 3);
    assert!(h.transport.requests_to("http://hooks.test/updated").is_empty());
}

#[test]
fn redelivered_order_created_event_changes_nothing() {
    let h = harness();
    h.ledger.upsert(key("T1", "SKU-1"), 10).unwrap();
    h.subscribe("T1", "http://hooks.test/updated", &[ORDER_UPDATED], None);
    h.upload("c.csv", &format!("{HEADER}\nT1,S1,HUB-1,SKU-1,4\n"));

    let workers = h.pipeline.start().unwrap();
    h.pipeline.intake().submit("c.csv").unwrap();
    assert!(eventually(Duration::from_secs(5), || {
        h.transport.requests_to("http://hooks.test/updated").len() == 1
    }));
    workers.shutdown();

    let event = h.bus.published_to(ORDER_CREATED).remove(0);
    let before = h.orders.all()[0].clone();
    let outcome = h.pipeline.finalizer().finalize(&event.redelivered()).unwrap();

    assert_eq!(outcome, crate::finalizer::FinalizeOutcome::AlreadyFinalized);
    assert_eq!(h.orders.get(before.id()).unwrap(), before);
    assert_eq!(h.ledger.get(&key("T1", "SKU-1")).unwrap().quantity, 6);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(h.transport.requests_to("http://hooks.test/updated").len(), 1);
}

#[test]
fn concurrent_orders_never_oversell() {
    let h = harness();
    h.ledger.upsert(key("T1", "SKU-1"), 10).unwrap();
    h.upload("d.csv", &format!("{HEADER}\nT1,S1,HUB-1,SKU-1,6\nT1,S1,HUB-1,SKU-1,6\n"));

    let workers = h.pipeline.start().unwrap();
    h.pipeline.intake().submit("d.csv").unwrap();

    assert!(eventually(Duration::from_secs(5), || workers.finalize_stats().succeeded == 2));
    workers.shutdown();

    assert_eq!(h.orders_with(OrderStatus::NewOrder).len(), 1);
    assert_eq!(h.orders_with(OrderStatus::OnHold).len(), 1);
    assert_eq!(h.ledger.get(&key("T1", "SKU-1")).unwrap().quantity, 4);
}

#[test]
fn missing_inventory_record_is_retried_then_left_on_hold() {
    let h = harness();
    // SKU and hub are known to the catalog through another seller's record.
    h.ledger
        .upsert(
            InventoryKey::new(
                TenantId::new("T1").unwrap(),
                SellerId::new("OTHER").unwrap(),
                HubCode::new("HUB-1").unwrap(),
                SkuCode::new("SKU-1").unwrap(),
            ),
            10,
        )
        .unwrap();
    h.upload("e.csv", &format!("{HEADER}\nT1,S1,HUB-1,SKU-1,1\n"));

    let workers = h.pipeline.start().unwrap();
    h.pipeline.intake().submit("e.csv").unwrap();

    assert!(eventually(Duration::from_secs(5), || workers.finalize_stats().failed >= 1));
    workers.shutdown();

    assert_eq!(h.orders_with(OrderStatus::OnHold).len(), 1);
}

#[test]
fn unreachable_webhook_does_not_block_the_pipeline() {
    let h = harness_with(RecordingTransport::new().unreachable("http://hooks.test/down"));
    h.ledger.upsert(key("T1", "SKU-1"), 10).unwrap();
    h.subscribe("T1", "http://hooks.test/down", &[ORDER_UPDATED], None);
    h.subscribe("T1", "http://hooks.test/up", &[ORDER_UPDATED], None);
    h.upload("f.csv", &format!("{HEADER}\nT1,S1,HUB-1,SKU-1,1\n"));

    let workers = h.pipeline.start().unwrap();
    h.pipeline.intake().submit("f.csv").unwrap();

    assert!(eventually(Duration::from_secs(5), || {
        h.transport.requests_to("http://hooks.test/up").len() == 1
    }));
    workers.shutdown();
    assert_eq!(h.orders_with(OrderStatus::NewOrder).len(), 1);
}

#[test]
fn missing_upload_is_rejected_at_intake() {
    let h = harness();
    let err = h.pipeline.intake().submit("never-uploaded.csv").unwrap_err();
    assert!(matches!(err, crate::error::PipelineError::NotFound(_)));
    assert!(h.queue.is_empty());
}

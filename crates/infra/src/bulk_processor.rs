//! Bulk Row Processor: turns one ingestion task into orders.
//!
//! Rows are validated independently. A bad row never aborts the batch, not
//! even one that is not valid UTF-8; it is collected as raw bytes and
//! re-exported verbatim with the header into a quarantine file once the whole
//! file has been walked. Failures that are not row-local (object fetch,
//! header, catalog outage) fail the task so the work queue redelivers it.
//! Each order is stored together with its row's [`IdempotencyKey`] in one
//! write, so a redelivered task skips rows that already became orders.

use std::sync::Arc;

use chrono::Utc;
use csv::{ByteRecord, ReaderBuilder, StringRecord, WriterBuilder};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use orderflow_core::OrderId;
use orderflow_events::Delivery;
use orderflow_inventory::Catalog;
use orderflow_orders::{CsvSchema, IngestionTask, ORDER_CREATED, Order, RowRejection};

use crate::error::PipelineError;
use crate::object_store::{ObjectStore, quarantine_key};
use crate::publisher::OrderEventPublisher;
use crate::store::{IdempotencyKey, OrderStore};
use crate::webhooks::WebhookDispatcher;

/// What one task produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub created: Vec<OrderId>,
    pub quarantined: usize,
    pub skipped_duplicates: usize,
    pub quarantine_key: Option<String>,
}

enum RowOutcome {
    Created(OrderId),
    Duplicate,
    Rejected(RowRejection),
}

pub struct BulkRowProcessor {
    objects: Arc<dyn ObjectStore>,
    catalog: Arc<dyn Catalog>,
    orders: Arc<dyn OrderStore>,
    publisher: OrderEventPublisher,
    webhooks: Arc<WebhookDispatcher>,
}

impl BulkRowProcessor {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        catalog: Arc<dyn Catalog>,
        orders: Arc<dyn OrderStore>,
        publisher: OrderEventPublisher,
        webhooks: Arc<WebhookDispatcher>,
    ) -> Self {
        Self {
            objects,
            catalog,
            orders,
            publisher,
            webhooks,
        }
    }

    /// Process one queue delivery.
    ///
    /// A body that is not a valid ingestion task yields an empty report: the
    /// message can never succeed, so it is acknowledged and dropped.
    #[instrument(skip(self, delivery), fields(message_id = %delivery.message_id, receive_count = delivery.receive_count), err)]
    pub fn process(&self, delivery: &Delivery) -> Result<BatchReport, PipelineError> {
        let task = match IngestionTask::parse(&delivery.body) {
            Ok(task) => task,
            Err(e) => {
                error!(error = %e, body = %delivery.body, "dropping malformed ingestion task");
                return Ok(BatchReport::default());
            }
        };

        let bytes = self.objects.get(&task.bucket, &task.key)?;
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(bytes.as_slice());
        let mut records = reader.byte_records();

        let raw_header = match records.next() {
            Some(record) => record.map_err(|e| csv_error(&task, e))?,
            None => return Err(PipelineError::Validation(format!("{} is empty", task.key))),
        };
        let header = StringRecord::from_byte_record(raw_header)
            .map_err(|e| PipelineError::Validation(format!("{}: header is not valid UTF-8: {e}", task.key)))?;
        let header_fields: Vec<&str> = header.iter().collect();
        let schema = CsvSchema::from_header(&header_fields)?;

        let mut report = BatchReport::default();
        let mut rejected: Vec<ByteRecord> = Vec::new();

        for (index, raw) in records.enumerate() {
            let raw = raw.map_err(|e| csv_error(&task, e))?;
            // Line numbers count the header as line 1.
            let line = index + 2;

            let (outcome, raw) = match StringRecord::from_byte_record(raw) {
                Ok(record) => {
                    let outcome = self.process_row(delivery, &task, index, &schema, &record)?;
                    (outcome, record.into_byte_record())
                }
                Err(e) => {
                    let field = e.utf8_error().field();
                    (RowOutcome::Rejected(RowRejection::InvalidEncoding { field }), e.into_byte_record())
                }
            };

            match outcome {
                RowOutcome::Created(order_id) => report.created.push(order_id),
                RowOutcome::Duplicate => {
                    info!(line, "row already ingested, skipping");
                    report.skipped_duplicates += 1;
                }
                RowOutcome::Rejected(reason) => {
                    warn!(line, reason = %reason, "row quarantined");
                    rejected.push(raw);
                }
            }
        }

        report.quarantined = rejected.len();
        if !rejected.is_empty() {
            report.quarantine_key = self.write_quarantine(&task, header.as_byte_record(), &rejected);
        }

        info!(
            key = %task.key,
            created = report.created.len(),
            quarantined = report.quarantined,
            skipped = report.skipped_duplicates,
            "ingestion task processed"
        );
        Ok(report)
    }

    fn process_row(
        &self,
        delivery: &Delivery,
        task: &IngestionTask,
        index: usize,
        schema: &CsvSchema,
        record: &StringRecord,
    ) -> Result<RowOutcome, PipelineError> {
        let fields: Vec<&str> = record.iter().collect();
        let new_order = match schema.extract(&fields) {
            Ok(new_order) => new_order,
            Err(reason) => return Ok(RowOutcome::Rejected(reason)),
        };

        if !self.catalog.sku_exists(&new_order.sku_id)? {
            return Ok(RowOutcome::Rejected(RowRejection::UnknownSku(new_order.sku_id)));
        }
        if !self.catalog.hub_exists(&new_order.hub_id)? {
            return Ok(RowOutcome::Rejected(RowRejection::UnknownHub(new_order.hub_id)));
        }

        let key = IdempotencyKey::for_row(&delivery.message_id, &task.bucket, &task.key, index);
        let order = Order::place(new_order, Utc::now());
        match self.orders.insert_ingested(&order, &key) {
            Ok(true) => {}
            Ok(false) => return Ok(RowOutcome::Duplicate),
            Err(e) => {
                error!(idempotency_key = %key, error = %e, "failed to persist order");
                return Ok(RowOutcome::Rejected(RowRejection::PersistFailed(e.to_string())));
            }
        }
        info!(order_id = %order.id(), tenant_id = %order.tenant_id(), "order created");

        // The order is durable from here on; downstream failures are logged only.
        let _ = self.publisher.publish_created(&order);
        drop(self.webhooks.notify(order.tenant_id(), ORDER_CREATED, &order));

        Ok(RowOutcome::Created(order.id()))
    }

    fn write_quarantine(&self, task: &IngestionTask, header: &ByteRecord, rows: &[ByteRecord]) -> Option<String> {
        let key = quarantine_key(&task.key, Utc::now());
        let body = match encode_csv(header, rows) {
            Ok(body) => body,
            Err(e) => {
                error!(key = %key, error = %e, "failed to encode quarantine file");
                return None;
            }
        };

        match self.objects.put(&task.bucket, &key, body) {
            Ok(()) => {
                info!(bucket = %task.bucket, key = %key, rows = rows.len(), "quarantine file written");
                Some(key)
            }
            Err(e) => {
                error!(bucket = %task.bucket, key = %key, error = %e, "failed to write quarantine file");
                None
            }
        }
    }
}

fn encode_csv(header: &ByteRecord, rows: &[ByteRecord]) -> Result<Vec<u8>, String> {
    // Short rows are quarantined as-is, so the writer must accept ragged records.
    let mut writer = WriterBuilder::new().flexible(true).from_writer(Vec::new());
    writer.write_byte_record(header).map_err(|e| e.to_string())?;
    for row in rows {
        writer.write_byte_record(row).map_err(|e| e.to_string())?;
    }
    writer.into_inner().map_err(|e| e.to_string())
}

fn csv_error(task: &IngestionTask, e: csv::Error) -> PipelineError {
    PipelineError::Validation(format!("{}: unreadable csv: {e}", task.key))
}

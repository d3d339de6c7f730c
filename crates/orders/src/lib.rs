//! Orders domain module.
//!
//! Business rules for bulk-ingested orders, implemented purely as
//! deterministic domain logic (no IO, no HTTP, no storage): the order
//! lifecycle, ingestion row validation, the order-created event and webhook
//! subscription/payload shapes.

pub mod event;
pub mod ingestion;
pub mod order;
pub mod webhook;

pub use event::{ORDER_CREATED, ORDER_UPDATED, OrderCreatedEvent};
pub use ingestion::{CsvSchema, IngestionTask, REQUIRED_COLUMNS, RowRejection};
pub use order::{FinalizationProgress, NewOrder, Order, OrderStatus, Quantity};
pub use webhook::{NewSubscription, WebhookPayload, WebhookSubscription};

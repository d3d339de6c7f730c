//! Infrastructure layer: the order pipeline services and their backends.
//!
//! - [`intake`] validates an upload and enqueues an ingestion task
//! - [`bulk_processor`] turns a task into orders and a quarantine file
//! - [`publisher`] emits `order.created`
//! - [`finalizer`] reserves stock, confirms orders and notifies webhooks
//! - [`webhooks`] fans notifications out over a bounded delivery pool
//! - [`workers`] run the queue and bus consumers
//! - [`pipeline`] wires all of the above together

pub mod bulk_processor;
pub mod config;
pub mod error;
pub mod event_bus;
pub mod finalizer;
pub mod intake;
pub mod inventory;
pub mod object_store;
pub mod pipeline;
pub mod publisher;
pub mod store;
pub mod webhooks;
pub mod workers;

pub use bulk_processor::{BatchReport, BulkRowProcessor};
pub use config::{ConfigError, PipelineConfig, PoolSize};
pub use error::PipelineError;
pub use finalizer::{Deadline, FinalizeOutcome, OrderFinalizer};
pub use intake::{IngestionReceipt, IntakeValidator};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineWorkers};
pub use publisher::OrderEventPublisher;

#[cfg(test)]
mod integration_tests;

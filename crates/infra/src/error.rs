//! Pipeline-level error taxonomy.
//!
//! Every stage converts its collaborator errors into [`PipelineError`] so the
//! workers can log one shape. Classification does not change retry
//! behaviour: the retry wrapper retries every failure the same way.

use orderflow_core::DomainError;
use orderflow_events::{BusError, QueueError};
use orderflow_inventory::{CatalogError, LedgerError};

use crate::config::ConfigError;
use crate::object_store::ObjectStoreError;
use crate::store::StoreError;
use crate::webhooks::TransportError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    /// Malformed input (row, task body, request).
    #[error("validation error: {0}")]
    Validation(String),

    /// Referenced object, SKU, hub, inventory record or order is absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Insufficient inventory or a state conflict.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Network/datastore failure; worth retrying.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Startup/connection failure; the process should not continue.
    #[error("fatal: {0}")]
    Fatal(String),

    /// A deadline elapsed before downstream calls completed.
    #[error("timed out: {0}")]
    TimedOut(String),
}

impl PipelineError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PipelineError::Transient(_) | PipelineError::TimedOut(_))
    }
}

/// Domain errors are deterministic: retrying cannot fix them.
impl From<DomainError> for PipelineError {
    fn from(e: DomainError) -> Self {
        PipelineError::Validation(e.to_string())
    }
}

impl From<LedgerError> for PipelineError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::NotFound(_) => PipelineError::NotFound(e.to_string()),
            LedgerError::Conflict { .. } => PipelineError::Conflict(e.to_string()),
            LedgerError::InvalidQuantity(_) => PipelineError::Validation(e.to_string()),
            LedgerError::Unavailable(_) => PipelineError::Transient(e.to_string()),
            LedgerError::TimedOut(_) => PipelineError::TimedOut(e.to_string()),
        }
    }
}

impl From<CatalogError> for PipelineError {
    fn from(e: CatalogError) -> Self {
        PipelineError::Transient(e.to_string())
    }
}

impl From<StoreError> for PipelineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(_) => PipelineError::NotFound(e.to_string()),
            StoreError::Conflict(_) => PipelineError::Conflict(e.to_string()),
            StoreError::Invalid(_) => PipelineError::Validation(e.to_string()),
            StoreError::Corrupt(_) => PipelineError::Fatal(e.to_string()),
            StoreError::Backend(_) => PipelineError::Transient(e.to_string()),
            StoreError::TimedOut(_) => PipelineError::TimedOut(e.to_string()),
        }
    }
}

impl From<ObjectStoreError> for PipelineError {
    fn from(e: ObjectStoreError) -> Self {
        match e {
            ObjectStoreError::NotFound { .. } => PipelineError::NotFound(e.to_string()),
            ObjectStoreError::InvalidKey(_) => PipelineError::Validation(e.to_string()),
            ObjectStoreError::Io(_) => PipelineError::Transient(e.to_string()),
        }
    }
}

impl From<QueueError> for PipelineError {
    fn from(e: QueueError) -> Self {
        PipelineError::Transient(e.to_string())
    }
}

impl From<BusError> for PipelineError {
    fn from(e: BusError) -> Self {
        PipelineError::Transient(e.to_string())
    }
}

impl From<TransportError> for PipelineError {
    fn from(e: TransportError) -> Self {
        PipelineError::Transient(e.to_string())
    }
}

impl From<ConfigError> for PipelineError {
    fn from(e: ConfigError) -> Self {
        PipelineError::Fatal(e.to_string())
    }
}

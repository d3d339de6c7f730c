//! Persistence contracts for orders (with their ingestion dedup keys) and
//! webhook registrations, with in-memory and Postgres implementations.

mod in_memory;
mod postgres;

pub use in_memory::{InMemoryOrderStore, InMemoryWebhookRegistry};
pub use postgres::{PostgresOrderStore, PostgresWebhookRegistry, apply_schema, map_sqlx_error};

use sha2::{Digest, Sha256};

use orderflow_core::{OrderId, SubscriptionId, TenantId};
use orderflow_orders::{NewSubscription, Order, WebhookSubscription};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid input: {0}")]
    Invalid(String),

    /// Stored data could not be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("store backend error: {0}")]
    Backend(String),

    /// A statement, lock wait or connection checkout ran past its bound.
    #[error("store call timed out: {0}")]
    TimedOut(String),
}

/// Orders persisted by the bulk row processor and mutated by the finalizer.
pub trait OrderStore: Send + Sync {
    /// Conflict if the ID already exists.
    fn insert(&self, order: &Order) -> Result<(), StoreError>;

    /// Record ingestion row `key` and insert its order as one atomic write.
    /// `false` when the row was already ingested; nothing is written then.
    fn insert_ingested(&self, order: &Order, key: &IdempotencyKey) -> Result<bool, StoreError>;

    fn get(&self, id: OrderId) -> Result<Order, StoreError>;

    /// Persist status, finalization progress and `updated_at`.
    fn save(&self, order: &Order) -> Result<(), StoreError>;

    fn list_by_tenant(&self, tenant_id: &TenantId) -> Result<Vec<Order>, StoreError>;
}

/// Identity of one ingestion row within one queue delivery lineage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// SHA-256 over queue message ID, bucket, key and row index.
    ///
    /// A redelivered task carries the same message ID, so its rows map to the
    /// same keys; a fresh intake submission gets a new message ID.
    pub fn for_row(message_id: &str, bucket: &str, key: &str, row_index: usize) -> Self {
        let mut hasher = Sha256::new();
        for part in [message_id, bucket, key] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update((row_index as u64).to_be_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Webhook registrations. Read-only to the order pipeline.
pub trait WebhookRegistry: Send + Sync {
    fn register(&self, request: NewSubscription) -> Result<WebhookSubscription, StoreError>;

    /// Active subscriptions of `tenant_id` that list `event`.
    fn active_for(&self, tenant_id: &TenantId, event: &str) -> Result<Vec<WebhookSubscription>, StoreError>;

    fn list(&self, tenant_id: &TenantId) -> Result<Vec<WebhookSubscription>, StoreError>;

    fn deactivate(&self, id: SubscriptionId) -> Result<(), StoreError>;
}

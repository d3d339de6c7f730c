use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use orderflow_core::{HubCode, SellerId, SkuCode, TenantId};

/// Composite identity of an inventory record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InventoryKey {
    pub tenant_id: TenantId,
    pub seller_id: SellerId,
    pub hub_code: HubCode,
    pub sku_code: SkuCode,
}

impl InventoryKey {
    pub fn new(tenant_id: TenantId, seller_id: SellerId, hub_code: HubCode, sku_code: SkuCode) -> Self {
        Self {
            tenant_id,
            seller_id,
            hub_code,
            sku_code,
        }
    }
}

impl core::fmt::Display for InventoryKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.tenant_id, self.seller_id, self.hub_code, self.sku_code
        )
    }
}

/// Stock on hand for one key. `quantity` is never negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub id: Uuid,
    #[serde(flatten)]
    pub key: InventoryKey,
    pub quantity: i64,
    pub updated_at: DateTime<Utc>,
}

/// Conditional-decrement request.
///
/// `reference` identifies the consumer (an order ID). A reference that already
/// consumed against the key gets its original outcome back instead of a
/// second decrement.
///
/// `deadline` bounds how long the ledger may wait for the key; it is
/// process-local and never crosses the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumeRequest {
    #[serde(flatten)]
    pub key: InventoryKey,
    pub quantity: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip)]
    pub deadline: Option<Instant>,
}

impl ConsumeRequest {
    pub fn new(key: InventoryKey, quantity: i64) -> Self {
        Self {
            key,
            quantity,
            reference: None,
            deadline: None,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Time left before the deadline; `None` when the request has none.
    pub fn time_left(&self) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumeOutcome {
    pub remaining: i64,
    /// True when the reference had already consumed; nothing was decremented.
    #[serde(default, skip_serializing_if = "core::ops::Not::not")]
    pub replayed: bool,
}

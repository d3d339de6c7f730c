use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orderflow_core::{DomainError, HubCode, OrderId, SellerId, SkuCode, TenantId};

/// Ordered quantity. Always strictly positive.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Quantity(i64);

impl Quantity {
    pub fn new(value: i64) -> Result<Self, DomainError> {
        if value <= 0 {
            return Err(DomainError::validation(format!(
                "quantity must be greater than zero, got {value}"
            )));
        }
        Ok(Self(value))
    }

    /// Parse a decimal integer (surrounding whitespace allowed).
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let value: i64 = raw
            .trim()
            .parse()
            .map_err(|_| DomainError::validation(format!("quantity is not an integer: {raw:?}")))?;
        Self::new(value)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for Quantity {
    type Error = DomainError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Quantity> for i64 {
    fn from(q: Quantity) -> Self {
        q.0
    }
}

impl core::fmt::Display for Quantity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Order status lifecycle: `on_hold` → `new_order`, never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    OnHold,
    NewOrder,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::OnHold => "on_hold",
            OrderStatus::NewOrder => "new_order",
        }
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on_hold" => Ok(OrderStatus::OnHold),
            "new_order" => Ok(OrderStatus::NewOrder),
            other => Err(DomainError::validation(format!("unknown order status: {other}"))),
        }
    }
}

/// Which finalization side effects have already been applied.
///
/// Persisted with the order so a redelivered event resumes after the last
/// completed step instead of consuming inventory twice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizationProgress {
    pub inventory_consumed: bool,
    pub notified: bool,
}

impl FinalizationProgress {
    pub fn is_complete(&self) -> bool {
        self.inventory_consumed && self.notified
    }
}

/// A validated ingestion row, not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    pub tenant_id: TenantId,
    pub seller_id: SellerId,
    pub hub_id: HubCode,
    pub sku_id: SkuCode,
    pub quantity: Quantity,
}

/// A persisted order.
///
/// Created by the bulk row processor with status `on_hold`; afterwards only
/// the finalizer mutates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    tenant_id: TenantId,
    seller_id: SellerId,
    hub_id: HubCode,
    sku_id: SkuCode,
    quantity: Quantity,
    status: OrderStatus,
    progress: FinalizationProgress,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Order {
    /// Assign an identity to a validated row. Status starts at `on_hold`.
    pub fn place(new: NewOrder, at: DateTime<Utc>) -> Self {
        Self {
            id: OrderId::new(),
            tenant_id: new.tenant_id,
            seller_id: new.seller_id,
            hub_id: new.hub_id,
            sku_id: new.sku_id,
            quantity: new.quantity,
            status: OrderStatus::OnHold,
            progress: FinalizationProgress::default(),
            created_at: at,
            updated_at: at,
        }
    }

    /// Rebuild an order loaded from storage.
    pub fn restore(
        id: OrderId,
        new: NewOrder,
        status: OrderStatus,
        progress: FinalizationProgress,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            tenant_id: new.tenant_id,
            seller_id: new.seller_id,
            hub_id: new.hub_id,
            sku_id: new.sku_id,
            quantity: new.quantity,
            status,
            progress,
            created_at,
            updated_at,
        }
    }

    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn seller_id(&self) -> &SellerId {
        &self.seller_id
    }

    pub fn hub_id(&self) -> &HubCode {
        &self.hub_id
    }

    pub fn sku_id(&self) -> &SkuCode {
        &self.sku_id
    }

    pub fn quantity(&self) -> Quantity {
        self.quantity
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn progress(&self) -> FinalizationProgress {
        self.progress
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Record that stock for this order has been taken from the ledger.
    pub fn mark_inventory_consumed(&mut self, at: DateTime<Utc>) {
        self.progress.inventory_consumed = true;
        self.updated_at = at;
    }

    /// Move to `new_order`. Requires consumed inventory; idempotent.
    pub fn confirm(&mut self, at: DateTime<Utc>) -> Result<(), DomainError> {
        if !self.progress.inventory_consumed {
            return Err(DomainError::invariant(format!(
                "order {} cannot become new_order before inventory is consumed",
                self.id
            )));
        }
        if self.status != OrderStatus::NewOrder {
            self.status = OrderStatus::NewOrder;
            self.updated_at = at;
        }
        Ok(())
    }

    /// Explicitly keep the order on hold (insufficient stock).
    pub fn hold(&mut self, at: DateTime<Utc>) -> Result<(), DomainError> {
        if self.status == OrderStatus::NewOrder {
            return Err(DomainError::invariant(format!(
                "order {} is already new_order and cannot go back on hold",
                self.id
            )));
        }
        self.updated_at = at;
        Ok(())
    }

    pub fn mark_notified(&mut self, at: DateTime<Utc>) {
        self.progress.notified = true;
        self.updated_at = at;
    }
}

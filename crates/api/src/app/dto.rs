use serde::Deserialize;

use orderflow_core::TenantId;
use orderflow_inventory::InventoryKey;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct SubmitCsvRequest {
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct SetStockRequest {
    #[serde(flatten)]
    pub key: InventoryKey,
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct TenantQuery {
    pub tenant_id: TenantId,
}

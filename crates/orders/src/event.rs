use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orderflow_core::{HubCode, OrderId, SellerId, SkuCode, TenantId};

use crate::order::{Order, Quantity};

/// Topic / webhook event name for freshly persisted orders.
pub const ORDER_CREATED: &str = "order.created";

/// Webhook event name for orders whose status changed during finalization.
pub const ORDER_UPDATED: &str = "order.updated";

/// Event: an order row was persisted with status `on_hold`.
///
/// Published on the `order.created` topic keyed by order ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreatedEvent {
    pub order_id: OrderId,
    pub tenant_id: TenantId,
    pub seller_id: SellerId,
    pub hub_id: HubCode,
    pub sku_id: SkuCode,
    pub quantity: Quantity,
    pub created_at: DateTime<Utc>,
}

impl From<&Order> for OrderCreatedEvent {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.id(),
            tenant_id: order.tenant_id().clone(),
            seller_id: order.seller_id().clone(),
            hub_id: order.hub_id().clone(),
            sku_id: order.sku_id().clone(),
            quantity: order.quantity(),
            created_at: order.created_at(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::NewOrder;

    #[test]
    fn wire_shape_uses_flat_snake_case_fields() {
        let order = Order::place(
            NewOrder {
                tenant_id: TenantId::new("t1").unwrap(),
                seller_id: SellerId::new("s1").unwrap(),
                hub_id: HubCode::new("H1").unwrap(),
                sku_id: SkuCode::new("K1").unwrap(),
                quantity: Quantity::new(2).unwrap(),
            },
            Utc::now(),
        );
        let json = serde_json::to_value(OrderCreatedEvent::from(&order)).unwrap();
        assert_eq!(json["order_id"], order.id().to_string());
        assert_eq!(json["tenant_id"], "t1");
        assert_eq!(json["hub_id"], "H1");
        assert_eq!(json["sku_id"], "K1");
        assert_eq!(json["quantity"], 2);
        assert!(json["created_at"].is_string());
    }
}

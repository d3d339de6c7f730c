use std::sync::Arc;

use tracing::{debug, error};

use orderflow_events::{EventBus, Message};
use orderflow_orders::{ORDER_CREATED, Order, OrderCreatedEvent};

use crate::error::PipelineError;

/// Publishes one `order.created` event per persisted order, keyed by order ID.
#[derive(Clone)]
pub struct OrderEventPublisher {
    bus: Arc<dyn EventBus<Message>>,
}

impl OrderEventPublisher {
    pub fn new(bus: Arc<dyn EventBus<Message>>) -> Self {
        Self { bus }
    }

    /// The order is already persisted when this runs, so callers log a
    /// failure instead of undoing the row.
    pub fn publish_created(&self, order: &Order) -> Result<(), PipelineError> {
        let event = OrderCreatedEvent::from(order);
        let message = Message::json(ORDER_CREATED, order.id().to_string(), &event)
            .map_err(|e| PipelineError::Validation(format!("encode order.created: {e}")))?;
        let message_id = message.id();

        self.bus.publish(message).map_err(|e| {
            error!(order_id = %order.id(), error = %e, "failed to publish order.created");
            PipelineError::from(e)
        })?;
        debug!(order_id = %order.id(), %message_id, "published order.created");
        Ok(())
    }
}

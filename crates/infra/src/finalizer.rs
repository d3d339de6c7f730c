//! Order Finalizer: consumes `order.created`, reserves stock, confirms the
//! order and notifies webhooks.
//!
//! The work is a resumable state machine over the order's
//! [`FinalizationProgress`]. Each completed step is written back before the
//! next one starts, and the ledger consumption carries the order ID as its
//! reference, so a redelivered event picks up where the last attempt stopped
//! and never consumes stock twice.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use orderflow_events::{HandlerError, Message, MessageHandler};
use orderflow_inventory::{ConsumeRequest, InventoryKey, InventoryLedger, LedgerError};
use orderflow_orders::{ORDER_UPDATED, Order, OrderCreatedEvent, OrderStatus};

use crate::error::PipelineError;
use crate::store::OrderStore;
use crate::webhooks::WebhookDispatcher;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FinalizeOutcome {
    /// Stock was reserved and the order moved to `new_order`.
    /// `remaining` is absent when an earlier attempt already consumed.
    Confirmed { remaining: Option<i64> },
    /// Not enough stock; the order stays `on_hold`.
    OnHold { available: i64, requested: i64 },
    /// A previous delivery already finished this order.
    AlreadyFinalized,
}

/// Wall-clock budget for one finalization attempt. It is checked before
/// every downstream call and handed to the ledger so a contended key cannot
/// hold the attempt past it.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.started.elapsed())
    }

    pub fn expires_at(&self) -> Instant {
        self.started + self.budget
    }

    pub fn check(&self, step: &str) -> Result<(), PipelineError> {
        if self.remaining().is_zero() {
            return Err(PipelineError::TimedOut(format!(
                "{step}: finalization exceeded {}ms",
                self.budget.as_millis()
            )));
        }
        Ok(())
    }
}

pub struct OrderFinalizer {
    orders: Arc<dyn OrderStore>,
    ledger: Arc<dyn InventoryLedger>,
    webhooks: Arc<WebhookDispatcher>,
    timeout: Duration,
}

impl OrderFinalizer {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        ledger: Arc<dyn InventoryLedger>,
        webhooks: Arc<WebhookDispatcher>,
        timeout: Duration,
    ) -> Self {
        Self {
            orders,
            ledger,
            webhooks,
            timeout,
        }
    }

    #[instrument(skip(self, message), fields(message_id = %message.id(), attempt = message.attempt()), err)]
    pub fn finalize(&self, message: &Message) -> Result<FinalizeOutcome, PipelineError> {
        let event: OrderCreatedEvent = message
            .decode()
            .map_err(|e| PipelineError::Validation(format!("invalid order.created payload: {e}")))?;
        let deadline = Deadline::after(self.timeout);

        deadline.check("load order")?;
        let mut order = self.orders.get(event.order_id)?;
        let progress = order.progress();

        if order.status() == OrderStatus::NewOrder && progress.notified {
            info!(order_id = %order.id(), "order already finalized");
            return Ok(FinalizeOutcome::AlreadyFinalized);
        }

        let mut remaining = None;
        if !progress.inventory_consumed {
            match self.reserve(&order, &deadline)? {
                Reservation::Consumed(left) => remaining = Some(left),
                Reservation::Short { available, requested } => {
                    deadline.check("hold order")?;
                    order.hold(Utc::now())?;
                    self.orders.save(&order)?;
                    info!(order_id = %order.id(), available, requested, "insufficient stock, order on hold");
                    return Ok(FinalizeOutcome::OnHold { available, requested });
                }
            }
            order.mark_inventory_consumed(Utc::now());
        }

        if order.status() != OrderStatus::NewOrder {
            order.confirm(Utc::now())?;
            deadline.check("confirm order")?;
            self.orders.save(&order)?;
            info!(order_id = %order.id(), "order confirmed");
        }

        if !order.progress().notified {
            deadline.check("notify")?;
            let current = self.orders.get(order.id())?;
            drop(self.webhooks.notify(current.tenant_id(), ORDER_UPDATED, &current));
            order.mark_notified(Utc::now());
            self.orders.save(&order)?;
        }

        Ok(FinalizeOutcome::Confirmed { remaining })
    }

    fn reserve(&self, order: &Order, deadline: &Deadline) -> Result<Reservation, PipelineError> {
        let key = InventoryKey::new(
            order.tenant_id().clone(),
            order.seller_id().clone(),
            order.hub_id().clone(),
            order.sku_id().clone(),
        );
        let requested = order.quantity().get();

        deadline.check("inventory lookup")?;
        let record = self.ledger.get(&key)?;
        if record.quantity < requested {
            debug!(order_id = %order.id(), available = record.quantity, requested, "stock looks short");
        }

        // The conditional consume is authoritative: it also recognises an
        // earlier consumption by this order after stock has since dropped.
        deadline.check("inventory consume")?;
        let request = ConsumeRequest::new(key, requested)
            .with_reference(order.id().to_string())
            .with_deadline(deadline.expires_at());
        match self.ledger.consume(&request) {
            Ok(outcome) => {
                if outcome.replayed {
                    info!(order_id = %order.id(), "inventory already consumed for order");
                }
                Ok(Reservation::Consumed(outcome.remaining))
            }
            // Another order took the stock between lookup and consume.
            Err(LedgerError::Conflict { available, requested }) => Ok(Reservation::Short { available, requested }),
            Err(e) => Err(e.into()),
        }
    }
}

enum Reservation {
    Consumed(i64),
    Short { available: i64, requested: i64 },
}

/// Bus adapter: undecodable events are logged and acknowledged, every other
/// failure is returned so the message is redelivered.
impl MessageHandler for OrderFinalizer {
    fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        match self.finalize(message) {
            Ok(_) => Ok(()),
            Err(PipelineError::Validation(reason)) => {
                error!(message_id = %message.id(), reason = %reason, "dropping undecodable order.created");
                Ok(())
            }
            Err(e) => {
                if e.is_transient() {
                    warn!(message_id = %message.id(), error = %e, "finalization failed, will retry");
                }
                Err(Box::new(e))
            }
        }
    }
}

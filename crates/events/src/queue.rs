//! Work queue abstraction (point-to-point, visibility timeout semantics).
//!
//! Unlike the event bus, each queued message is handed to exactly one consumer
//! at a time. A received message becomes invisible for the visibility timeout;
//! if the consumer neither acks nor nacks in time it becomes visible again.
//! After `max_receives` deliveries a message is moved to the dead-letter set.

use std::sync::Arc;
use std::time::Duration;

/// One delivery of a queued message.
///
/// `receipt` identifies this particular delivery; acking a stale receipt
/// (the message was redelivered since) is a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub message_id: String,
    pub receipt: String,
    pub body: String,
    /// 1 on first delivery.
    pub receive_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("work queue lock poisoned")]
    Poisoned,

    #[error("work queue backend error: {0}")]
    Backend(String),
}

pub trait WorkQueue: Send + Sync {
    /// Enqueue a message body; returns the message ID.
    fn send(&self, body: String) -> Result<String, QueueError>;

    /// Receive up to `max` visible messages, hiding them for `visibility`.
    ///
    /// Never blocks; returns an empty vec when nothing is visible.
    fn receive(&self, max: usize, visibility: Duration) -> Result<Vec<Delivery>, QueueError>;

    /// Delete a processed message.
    fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Make the message visible again immediately.
    fn nack(&self, delivery: &Delivery) -> Result<(), QueueError>;
}

impl<Q> WorkQueue for Arc<Q>
where
    Q: WorkQueue + ?Sized,
{
    fn send(&self, body: String) -> Result<String, QueueError> {
        (**self).send(body)
    }

    fn receive(&self, max: usize, visibility: Duration) -> Result<Vec<Delivery>, QueueError> {
        (**self).receive(max, visibility)
    }

    fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        (**self).ack(delivery)
    }

    fn nack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        (**self).nack(delivery)
    }
}

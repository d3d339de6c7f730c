//! Event publishing/subscription abstraction (mechanics only).
//!
//! The bus carries facts that already happened (an order was persisted) to
//! asynchronous consumers (the order finalizer).
//!
//! ## Delivery Guarantees
//!
//! - **At-least-once**: a message that is not acknowledged is delivered again.
//!   Consumers must tolerate duplicates.
//! - **Per-key ordering only**: messages sharing a key are published to the same
//!   partition; nothing is promised across keys.
//! - **No persistence contract**: durability depends on the implementation
//!   (in-memory for tests, Redis Streams in production).

use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Settles a received message with its transport.
///
/// `ack` marks the message processed. `nack` hands it back for redelivery.
pub trait Acknowledge<M>: Send + Sync {
    fn ack(&self, message: &M);
    fn nack(&self, message: M);
}

/// A subscription to one topic of an event bus.
///
/// The receiver is behind a mutex so a pool of worker threads can share one
/// subscription; each message is handed to exactly one of them.
///
/// ## Usage Pattern
///
/// ```ignore
/// let sub = bus.subscribe("order.created");
/// loop {
///     match sub.recv_timeout(Duration::from_millis(250)) {
///         Ok(msg) => match handle(&msg) {
///             Ok(()) => sub.ack(&msg),
///             Err(_) => sub.nack(msg),
///         },
///         Err(RecvTimeoutError::Timeout) => continue,   // check for shutdown
///         Err(RecvTimeoutError::Disconnected) => break, // bus closed
///     }
/// }
/// ```
pub struct Subscription<M> {
    receiver: Mutex<Receiver<M>>,
    acknowledger: Arc<dyn Acknowledge<M>>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>, acknowledger: Arc<dyn Acknowledge<M>>) -> Self {
        Self {
            receiver: Mutex::new(receiver),
            acknowledger,
        }
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, RecvTimeoutError> {
        let receiver = self
            .receiver
            .lock()
            .map_err(|_| RecvTimeoutError::Disconnected)?;
        receiver.recv_timeout(timeout)
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, TryRecvError> {
        let receiver = self.receiver.lock().map_err(|_| TryRecvError::Disconnected)?;
        receiver.try_recv()
    }

    pub fn ack(&self, message: &M) {
        self.acknowledger.ack(message);
    }

    pub fn nack(&self, message: M) {
        self.acknowledger.nack(message);
    }
}

impl<M> core::fmt::Debug for Subscription<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    /// Internal lock poisoning.
    #[error("event bus lock poisoned")]
    Poisoned,

    #[error("serialization error: {0}")]
    Serialization(String),

    /// Transport failure (connection, command rejected).
    #[error("event bus backend error: {0}")]
    Backend(String),
}

/// Domain-agnostic event bus (pub/sub abstraction).
///
/// ```text
/// Bulk Row Processor ──publish──▶ EventBus ──subscribe(topic)──▶ Order Finalizer
/// ```
///
/// `publish()` can fail (connection lost, lock poisoned). The caller decides
/// whether that failure is fatal; for order creation it is logged, because
/// the order itself is already persisted.
///
/// The trait requires `Send + Sync` so one bus instance can be shared by every
/// worker thread.
pub trait EventBus<M>: Send + Sync {
    fn publish(&self, message: M) -> Result<(), BusError>;

    fn subscribe(&self, topic: &str) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    fn publish(&self, message: M) -> Result<(), BusError> {
        (**self).publish(message)
    }

    fn subscribe(&self, topic: &str) -> Subscription<M> {
        (**self).subscribe(topic)
    }
}

//! Messaging mechanics: envelopes, pub/sub bus, work queue, handlers, retries.
//!
//! Everything here is transport-agnostic. Durable implementations (Redis
//! Streams) live in `orderflow-infra`.

pub mod bus;
pub mod handler;
pub mod in_memory_bus;
pub mod in_memory_queue;
pub mod message;
pub mod queue;
pub mod retry;

pub use bus::{Acknowledge, BusError, EventBus, Subscription};
pub use handler::{HandlerError, MessageHandler};
pub use in_memory_bus::InMemoryEventBus;
pub use in_memory_queue::{DeadLetter, InMemoryWorkQueue};
pub use message::Message;
pub use queue::{Delivery, QueueError, WorkQueue};
pub use retry::{RetryHandler, RetryPolicy};

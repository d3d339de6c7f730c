//! Redis Streams implementations of the event bus and the work queue.
//!
//! The contracts and in-memory implementations live in `orderflow-events`.

#[cfg(feature = "redis")]
mod redis_queue;
#[cfg(feature = "redis")]
mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_queue::RedisWorkQueue;
#[cfg(feature = "redis")]
pub use redis_streams::{RedisStreamsError, RedisStreamsEventBus, StreamClient};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope for a message travelling over the event bus.
///
/// Notes:
/// - `key` is the partition key (the order ID for order events), so consumers of
///   a partitioned log see events of one key in publish order.
/// - `payload` is opaque bytes; JSON helpers are provided.
/// - `attempt` counts deliveries of this message to the current subscriber,
///   starting at 1. Redelivery after a `nack` increments it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    id: Uuid,
    topic: String,
    key: String,
    payload: Vec<u8>,
    attempt: u32,
    published_at: DateTime<Utc>,
}

impl Message {
    pub fn new(topic: impl Into<String>, key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id: Uuid::now_v7(),
            topic: topic.into(),
            key: key.into(),
            payload,
            attempt: 1,
            published_at: Utc::now(),
        }
    }

    /// Serialize `value` as the JSON payload of a new message.
    pub fn json<T: Serialize>(
        topic: impl Into<String>,
        key: impl Into<String>,
        value: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(topic, key, serde_json::to_vec(value)?))
    }

    /// Rebuild a message from its stored parts (used by durable transports).
    pub fn from_parts(
        id: Uuid,
        topic: impl Into<String>,
        key: impl Into<String>,
        payload: Vec<u8>,
        attempt: u32,
        published_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            topic: topic.into(),
            key: key.into(),
            payload,
            attempt: attempt.max(1),
            published_at,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn published_at(&self) -> DateTime<Utc> {
        self.published_at
    }

    /// Decode the JSON payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }

    /// Same message, next delivery attempt.
    pub fn redelivered(mut self) -> Self {
        self.attempt = self.attempt.saturating_add(1);
        self
    }
}

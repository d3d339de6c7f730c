//! Work queue over one Redis stream with a single consumer group.
//!
//! Delivery IDs are stream entry IDs. Visibility is the pending-entry idle
//! time: an entry received but not acked becomes claimable again once idle
//! for longer than the visibility timeout. `nack` marks the entry idle
//! straight away so the next `receive` picks it up.

use std::time::Duration;

use tracing::{debug, instrument};
use uuid::Uuid;

use orderflow_events::{Delivery, QueueError, WorkQueue};

use super::redis_streams::{RedisStreamsError, StreamClient, StreamEntry};

const BODY_FIELD: &str = "body";

#[derive(Debug, Clone)]
pub struct RedisWorkQueue {
    client: StreamClient,
    stream: String,
    group: String,
    consumer: String,
    max_receives: u64,
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl RedisWorkQueue {
    /// Connects lazily; creates the stream and consumer group if missing.
    pub fn new(redis_url: &str, stream: impl Into<String>, max_receives: u32) -> Result<Self, RedisStreamsError> {
        let stream = stream.into();
        let group = "orderflow-ingestion".to_string();
        let client = StreamClient::open(redis_url)?;
        client.ensure_group(&stream, &group)?;
        Ok(Self {
            client,
            stream,
            group,
            consumer: format!("consumer-{}", Uuid::now_v7()),
            max_receives: u64::from(max_receives.max(1)),
        })
    }

    fn delivery(entry: StreamEntry, receive_count: u64) -> Delivery {
        Delivery {
            message_id: entry.id.clone(),
            receipt: entry.id.clone(),
            body: entry.text(BODY_FIELD).unwrap_or_default(),
            receive_count: u32::try_from(receive_count).unwrap_or(u32::MAX),
        }
    }

    #[instrument(skip(self), fields(stream = %self.stream), err)]
    fn receive_sync(&self, max: usize, visibility: Duration) -> Result<Vec<Delivery>, RedisStreamsError> {
        let idle = millis(visibility);
        let mut out = Vec::new();

        let pending = self.client.pending(&self.stream, &self.group, idle, max)?;
        let ids: Vec<String> = pending.iter().map(|p| p.id.clone()).collect();
        for entry in self.client.claim(&self.stream, &self.group, &self.consumer, idle, &ids)? {
            let previous = pending
                .iter()
                .find(|p| p.id == entry.id)
                .map(|p| p.deliveries)
                .unwrap_or(1);
            if previous >= self.max_receives {
                self.client.dead_letter(&self.stream, &self.group, &entry, previous, true)?;
                continue;
            }
            out.push(Self::delivery(entry, previous + 1));
        }

        if out.len() < max {
            for entry in self
                .client
                .read_new(&self.stream, &self.group, &self.consumer, max - out.len(), None)?
            {
                out.push(Self::delivery(entry, 1));
            }
        }
        Ok(out)
    }
}

impl WorkQueue for RedisWorkQueue {
    fn send(&self, body: String) -> Result<String, QueueError> {
        let id = self.client.add(&self.stream, &[(BODY_FIELD, body.as_bytes())])?;
        debug!(stream = %self.stream, entry_id = %id, "task enqueued");
        Ok(id)
    }

    fn receive(&self, max: usize, visibility: Duration) -> Result<Vec<Delivery>, QueueError> {
        Ok(self.receive_sync(max.max(1), visibility)?)
    }

    fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.client
            .ack(&self.stream, &self.group, std::slice::from_ref(&delivery.receipt), true)?;
        Ok(())
    }

    fn nack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        // Idle for a day: older than any visibility timeout in use.
        let idle = millis(Duration::from_secs(24 * 60 * 60));
        self.client
            .release(&self.stream, &self.group, &self.consumer, &delivery.receipt, idle)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn delivery_uses_entry_id_and_body_field() {
        let entry = StreamEntry {
            id: "17-1".into(),
            fields: HashMap::from([(BODY_FIELD.to_string(), b"{\"Bucket\":\"b\",\"Key\":\"k\"}".to_vec())]),
        };
        let d = RedisWorkQueue::delivery(entry, 2);
        assert_eq!(d.message_id, "17-1");
        assert_eq!(d.receipt, "17-1");
        assert_eq!(d.receive_count, 2);
        assert!(d.body.contains("Bucket"));
    }
}

//! Redis Streams-backed event bus (durable, at-least-once delivery).
//!
//! - **Stream per topic**: `orderflow:events:<topic>`; one stream keeps
//!   publish order, so messages sharing a key are consumed in order.
//! - **Consumer groups**: every subscriber of a topic joins the bus's group,
//!   so each message goes to one consumer.
//! - **Redelivery**: a nacked or abandoned entry stays pending and is claimed
//!   again once idle for `pending_timeout`; the stream's delivery counter
//!   becomes the message attempt.
//! - **Dead-letter**: entries delivered more than `max_retries` times are
//!   copied to `<stream>:dlq` and acknowledged.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use redis::Value;
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

use orderflow_events::{Acknowledge, BusError, EventBus, Message, QueueError, Subscription};

const DEFAULT_PREFIX: &str = "orderflow:events";
const DEFAULT_GROUP: &str = "orderflow";
const DEFAULT_MAX_RETRIES: u64 = 5;
const DEFAULT_PENDING_TIMEOUT_MS: u64 = 30_000;
const POLL_BLOCK_MS: u64 = 100;
const POLL_COUNT: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum RedisStreamsError {
    #[error("redis connection error: {0}")]
    Connection(String),

    #[error("redis command error: {0}")]
    Command(String),

    #[error("malformed stream entry: {0}")]
    Deserialization(String),
}

impl From<RedisStreamsError> for BusError {
    fn from(e: RedisStreamsError) -> Self {
        BusError::Backend(e.to_string())
    }
}

impl From<RedisStreamsError> for QueueError {
    fn from(e: RedisStreamsError) -> Self {
        QueueError::Backend(e.to_string())
    }
}

/// One stream entry: its ID and field map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StreamEntry {
    pub id: String,
    pub fields: HashMap<String, Vec<u8>>,
}

impl StreamEntry {
    pub fn text(&self, field: &str) -> Option<String> {
        self.fields
            .get(field)
            .map(|v| String::from_utf8_lossy(v).into_owned())
    }
}

/// One row of `XPENDING <stream> <group> [IDLE ms] - + count`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PendingEntry {
    pub id: String,
    pub idle_ms: u64,
    pub deliveries: u64,
}

/// Thin synchronous wrapper over the stream commands both the bus and the
/// work queue use.
#[derive(Debug, Clone)]
pub struct StreamClient {
    client: Arc<redis::Client>,
}

impl StreamClient {
    pub fn open(redis_url: &str) -> Result<Self, RedisStreamsError> {
        let client = redis::Client::open(redis_url).map_err(|e| RedisStreamsError::Connection(e.to_string()))?;
        Ok(Self {
            client: Arc::new(client),
        })
    }

    fn conn(&self) -> Result<redis::Connection, RedisStreamsError> {
        self.client
            .get_connection()
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))
    }

    /// `XGROUP CREATE … MKSTREAM`; an existing group is not an error.
    pub fn ensure_group(&self, stream: &str, group: &str) -> Result<(), RedisStreamsError> {
        let mut conn = self.conn()?;
        let created: redis::RedisResult<Value> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query(&mut conn);
        match created {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(RedisStreamsError::Command(format!("XGROUP CREATE {stream}: {e}"))),
        }
    }

    pub fn add(&self, stream: &str, fields: &[(&str, &[u8])]) -> Result<String, RedisStreamsError> {
        let mut conn = self.conn()?;
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream).arg("*");
        for (name, value) in fields {
            cmd.arg(*name).arg(*value);
        }
        cmd.query(&mut conn)
            .map_err(|e| RedisStreamsError::Command(format!("XADD {stream}: {e}")))
    }

    pub(crate) fn pending(
        &self,
        stream: &str,
        group: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> Result<Vec<PendingEntry>, RedisStreamsError> {
        let mut conn = self.conn()?;
        let reply: Value = redis::cmd("XPENDING")
            .arg(stream)
            .arg(group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(count)
            .query(&mut conn)
            .map_err(|e| RedisStreamsError::Command(format!("XPENDING {stream}: {e}")))?;
        Ok(parse_pending(reply))
    }

    /// Take ownership of idle pending entries; increments their delivery count.
    pub(crate) fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        ids: &[String],
    ) -> Result<Vec<StreamEntry>, RedisStreamsError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn()?;
        let reply: Value = redis::cmd("XCLAIM")
            .arg(stream)
            .arg(group)
            .arg(consumer)
            .arg(min_idle_ms)
            .arg(ids)
            .query(&mut conn)
            .map_err(|e| RedisStreamsError::Command(format!("XCLAIM {stream}: {e}")))?;
        Ok(parse_entries(reply))
    }

    /// Mark an entry as idle for `idle_ms` without counting a delivery, so the
    /// next reclaim pass picks it up.
    pub(crate) fn release(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        id: &str,
        idle_ms: u64,
    ) -> Result<(), RedisStreamsError> {
        let mut conn = self.conn()?;
        let _: Value = redis::cmd("XCLAIM")
            .arg(stream)
            .arg(group)
            .arg(consumer)
            .arg(0)
            .arg(id)
            .arg("IDLE")
            .arg(idle_ms)
            .arg("JUSTID")
            .query(&mut conn)
            .map_err(|e| RedisStreamsError::Command(format!("XCLAIM {stream} {id}: {e}")))?;
        Ok(())
    }

    pub(crate) fn read_new(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: Option<u64>,
    ) -> Result<Vec<StreamEntry>, RedisStreamsError> {
        let mut conn = self.conn()?;
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP").arg(group).arg(consumer).arg("COUNT").arg(count);
        if let Some(block) = block_ms {
            cmd.arg("BLOCK").arg(block);
        }
        let reply: Value = cmd
            .arg("STREAMS")
            .arg(stream)
            .arg(">")
            .query(&mut conn)
            .map_err(|e| RedisStreamsError::Command(format!("XREADGROUP {stream}: {e}")))?;
        Ok(parse_read_reply(reply))
    }

    /// `XACK`, optionally followed by `XDEL` when no other group reads the stream.
    pub(crate) fn ack(&self, stream: &str, group: &str, ids: &[String], delete: bool) -> Result<(), RedisStreamsError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn()?;
        let _: u64 = redis::cmd("XACK")
            .arg(stream)
            .arg(group)
            .arg(ids)
            .query(&mut conn)
            .map_err(|e| RedisStreamsError::Command(format!("XACK {stream}: {e}")))?;
        if delete {
            let _: u64 = redis::cmd("XDEL")
                .arg(stream)
                .arg(ids)
                .query(&mut conn)
                .map_err(|e| RedisStreamsError::Command(format!("XDEL {stream}: {e}")))?;
        }
        Ok(())
    }

    /// Copy an entry to the dead-letter stream, then acknowledge the original.
    pub(crate) fn dead_letter(
        &self,
        stream: &str,
        group: &str,
        entry: &StreamEntry,
        deliveries: u64,
        delete: bool,
    ) -> Result<(), RedisStreamsError> {
        let dlq = format!("{stream}:dlq");
        let deliveries = deliveries.to_string();
        let failed_at = Utc::now().to_rfc3339();
        let mut fields: Vec<(&str, &[u8])> = vec![
            ("original_id", entry.id.as_bytes()),
            ("deliveries", deliveries.as_bytes()),
            ("failed_at", failed_at.as_bytes()),
        ];
        for (name, value) in &entry.fields {
            fields.push((name.as_str(), value.as_slice()));
        }
        self.add(&dlq, &fields)?;
        self.ack(stream, group, std::slice::from_ref(&entry.id), delete)?;
        warn!(stream, entry_id = %entry.id, deliveries = %deliveries, "entry moved to dead-letter stream");
        Ok(())
    }
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::Data(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Value::Status(s) => Some(s.clone()),
        _ => None,
    }
}

fn number(value: &Value) -> Option<u64> {
    match value {
        Value::Int(n) => u64::try_from(*n).ok(),
        Value::Data(bytes) => std::str::from_utf8(bytes).ok()?.parse().ok(),
        _ => None,
    }
}

fn items(value: Value) -> Vec<Value> {
    match value {
        Value::Bulk(items) => items,
        _ => Vec::new(),
    }
}

/// `[[id, [field, value, …]], …]`. Deleted entries come back as nil and are skipped.
pub(crate) fn parse_entries(reply: Value) -> Vec<StreamEntry> {
    items(reply)
        .into_iter()
        .filter_map(|entry| {
            let mut parts = items(entry).into_iter();
            let id = text(&parts.next()?)?;
            let mut fields = HashMap::new();
            let mut raw = items(parts.next()?).into_iter();
            while let (Some(name), Some(value)) = (raw.next(), raw.next()) {
                if let (Some(name), Value::Data(value)) = (text(&name), value) {
                    fields.insert(name, value);
                }
            }
            Some(StreamEntry { id, fields })
        })
        .collect()
}

/// `XREADGROUP` reply for one stream: `[[stream, entries]]`, or nil on timeout.
pub(crate) fn parse_read_reply(reply: Value) -> Vec<StreamEntry> {
    items(reply)
        .into_iter()
        .flat_map(|stream| {
            let mut parts = items(stream).into_iter();
            parts.nth(1).map(parse_entries).unwrap_or_default()
        })
        .collect()
}

pub(crate) fn parse_pending(reply: Value) -> Vec<PendingEntry> {
    items(reply)
        .into_iter()
        .filter_map(|row| {
            let row = items(row);
            Some(PendingEntry {
                id: text(row.first()?)?,
                idle_ms: number(row.get(2)?)?,
                deliveries: number(row.get(3)?)?,
            })
        })
        .collect()
}

/// Durable bus over Redis Streams.
#[derive(Debug, Clone)]
pub struct RedisStreamsEventBus {
    client: StreamClient,
    prefix: String,
    group: String,
    max_retries: u64,
    pending_timeout_ms: u64,
}

impl RedisStreamsEventBus {
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, RedisStreamsError> {
        Ok(Self {
            client: StreamClient::open(redis_url.as_ref())?,
            prefix: DEFAULT_PREFIX.to_string(),
            group: DEFAULT_GROUP.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            pending_timeout_ms: DEFAULT_PENDING_TIMEOUT_MS,
        })
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u64) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn with_pending_timeout(mut self, timeout: Duration) -> Self {
        self.pending_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    fn stream(&self, topic: &str) -> String {
        format!("{}:{}", self.prefix, topic)
    }

    #[instrument(skip(self, message), fields(topic = message.topic(), message_id = %message.id()), err)]
    fn publish_sync(&self, message: &Message) -> Result<String, RedisStreamsError> {
        let id = message.id().to_string();
        let published_at = message.published_at().to_rfc3339();
        self.client.add(
            &self.stream(message.topic()),
            &[
                ("id", id.as_bytes()),
                ("key", message.key().as_bytes()),
                ("published_at", published_at.as_bytes()),
                ("payload", message.payload()),
            ],
        )
    }

    fn decode(topic: &str, entry: &StreamEntry, attempt: u64) -> Result<Message, RedisStreamsError> {
        let id = entry
            .text("id")
            .and_then(|s| Uuid::parse_str(&s).ok())
            .ok_or_else(|| RedisStreamsError::Deserialization(format!("{}: missing id", entry.id)))?;
        let published_at = entry
            .text("published_at")
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let payload = entry.fields.get("payload").cloned().unwrap_or_default();
        Ok(Message::from_parts(
            id,
            topic,
            entry.text("key").unwrap_or_default(),
            payload,
            u32::try_from(attempt).unwrap_or(u32::MAX),
            published_at,
        ))
    }
}

impl EventBus<Message> for RedisStreamsEventBus {
    fn publish(&self, message: Message) -> Result<(), BusError> {
        let entry_id = self.publish_sync(&message)?;
        debug!(topic = message.topic(), entry_id = %entry_id, "published to stream");
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Subscription<Message> {
        let stream = self.stream(topic);
        if let Err(e) = self.client.ensure_group(&stream, &self.group) {
            error!(stream = %stream, group = %self.group, error = %e, "failed to create consumer group");
        }

        let acker = Arc::new(StreamAcker {
            client: self.client.clone(),
            stream: stream.clone(),
            group: self.group.clone(),
            consumer: format!("consumer-{}", Uuid::now_v7()),
            pending_timeout_ms: self.pending_timeout_ms,
            entries: Mutex::new(HashMap::new()),
        });

        let (tx, rx) = mpsc::channel();
        let poller = Poller {
            topic: topic.to_string(),
            max_retries: self.max_retries,
            acker: acker.clone(),
            tx,
        };
        if let Err(e) = thread::Builder::new()
            .name(format!("redis-sub-{topic}"))
            .spawn(move || poller.run())
        {
            error!(stream = %stream, error = %e, "failed to spawn stream poller");
        }

        Subscription::new(rx, acker)
    }
}

/// Maps delivered messages back to their stream entry for XACK.
struct StreamAcker {
    client: StreamClient,
    stream: String,
    group: String,
    consumer: String,
    pending_timeout_ms: u64,
    entries: Mutex<HashMap<Uuid, String>>,
}

impl StreamAcker {
    fn take_entry(&self, message: &Message) -> Option<String> {
        self.entries.lock().ok()?.remove(&message.id())
    }
}

impl Acknowledge<Message> for StreamAcker {
    fn ack(&self, message: &Message) {
        let Some(entry_id) = self.take_entry(message) else {
            return;
        };
        if let Err(e) = self.client.ack(&self.stream, &self.group, &[entry_id], false) {
            error!(stream = %self.stream, message_id = %message.id(), error = %e, "failed to acknowledge entry");
        }
    }

    fn nack(&self, message: Message) {
        let Some(entry_id) = self.take_entry(&message) else {
            return;
        };
        let released = self.client.release(
            &self.stream,
            &self.group,
            &self.consumer,
            &entry_id,
            self.pending_timeout_ms,
        );
        if let Err(e) = released {
            // Still pending; it is reclaimed once its idle time passes the timeout.
            warn!(stream = %self.stream, message_id = %message.id(), error = %e, "failed to release entry");
        }
    }
}

struct Poller {
    topic: String,
    max_retries: u64,
    acker: Arc<StreamAcker>,
    tx: mpsc::Sender<Message>,
}

impl Poller {
    fn run(self) {
        // The subscription owns the only other reference to the acker.
        while Arc::strong_count(&self.acker) > 1 {
            if let Err(e) = self.poll() {
                error!(stream = %self.acker.stream, error = %e, "stream poll failed");
                thread::sleep(Duration::from_millis(POLL_BLOCK_MS));
            }
        }
        debug!(stream = %self.acker.stream, "stream poller stopped");
    }

    fn poll(&self) -> Result<(), RedisStreamsError> {
        let a = &self.acker;
        let mut batch: Vec<(StreamEntry, u64)> = Vec::new();

        let pending = a.client.pending(&a.stream, &a.group, a.pending_timeout_ms, POLL_COUNT)?;
        let mut reclaim = Vec::new();
        let mut deliveries = HashMap::new();
        for p in pending {
            deliveries.insert(p.id.clone(), p.deliveries);
            reclaim.push(p.id);
        }
        for entry in a.client.claim(&a.stream, &a.group, &a.consumer, a.pending_timeout_ms, &reclaim)? {
            let previous = deliveries.get(&entry.id).copied().unwrap_or(1);
            if previous >= self.max_retries {
                a.client.dead_letter(&a.stream, &a.group, &entry, previous, false)?;
                continue;
            }
            batch.push((entry, previous + 1));
        }

        if batch.is_empty() {
            for entry in a.client.read_new(&a.stream, &a.group, &a.consumer, POLL_COUNT, Some(POLL_BLOCK_MS))? {
                batch.push((entry, 1));
            }
        }

        for (entry, attempt) in batch {
            let message = match RedisStreamsEventBus::decode(&self.topic, &entry, attempt) {
                Ok(message) => message,
                Err(e) => {
                    error!(stream = %a.stream, error = %e, "dropping undecodable entry");
                    a.client.dead_letter(&a.stream, &a.group, &entry, attempt, false)?;
                    continue;
                }
            };
            if let Ok(mut entries) = a.entries.lock() {
                entries.insert(message.id(), entry.id.clone());
            }
            if self.tx.send(message).is_err() {
                return Ok(());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(s: &str) -> Value {
        Value::Data(s.as_bytes().to_vec())
    }

    fn entry(id: &str, fields: &[(&str, &str)]) -> Value {
        let mut raw = Vec::new();
        for (k, v) in fields {
            raw.push(data(k));
            raw.push(data(v));
        }
        Value::Bulk(vec![data(id), Value::Bulk(raw)])
    }

    #[test]
    fn parses_read_group_reply() {
        let reply = Value::Bulk(vec![Value::Bulk(vec![
            data("orderflow:events:order.created"),
            Value::Bulk(vec![
                entry("1-0", &[("key", "o-1"), ("payload", "{}")]),
                entry("2-0", &[("key", "o-2")]),
            ]),
        ])]);

        let entries = parse_read_reply(reply);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, "1-0");
        assert_eq!(entries[0].text("key").as_deref(), Some("o-1"));
        assert_eq!(entries[1].text("payload"), None);
    }

    #[test]
    fn read_timeout_is_empty() {
        assert!(parse_read_reply(Value::Nil).is_empty());
    }

    #[test]
    fn claim_reply_skips_deleted_entries() {
        let reply = Value::Bulk(vec![entry("1-0", &[("body", "x")]), Value::Nil]);
        let entries = parse_entries(reply);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].text("body").as_deref(), Some("x"));
    }

    #[test]
    fn parses_pending_rows() {
        let reply = Value::Bulk(vec![Value::Bulk(vec![
            data("5-0"),
            data("consumer-a"),
            Value::Int(61_000),
            Value::Int(3),
        ])]);
        assert_eq!(
            parse_pending(reply),
            vec![PendingEntry {
                id: "5-0".into(),
                idle_ms: 61_000,
                deliveries: 3,
            }]
        );
    }

    #[test]
    fn decodes_message_with_attempt_from_delivery_count() {
        let id = Uuid::now_v7();
        let raw = entry(
            "9-0",
            &[
                ("id", &id.to_string()),
                ("key", "order-1"),
                ("published_at", "2024-01-01T00:00:00Z"),
                ("payload", "{\"a\":1}"),
            ],
        );
        let e = parse_entries(Value::Bulk(vec![raw])).remove(0);

        let m = RedisStreamsEventBus::decode("order.created", &e, 3).unwrap();
        assert_eq!(m.id(), id);
        assert_eq!(m.topic(), "order.created");
        assert_eq!(m.key(), "order-1");
        assert_eq!(m.attempt(), 3);
        assert_eq!(m.payload(), b"{\"a\":1}");
    }

    #[test]
    fn entry_without_id_is_rejected() {
        let e = parse_entries(Value::Bulk(vec![entry("9-0", &[("key", "k")])])).remove(0);
        assert!(RedisStreamsEventBus::decode("t", &e, 1).is_err());
    }
}

//! In-memory event bus for tests/dev.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, mpsc};

use tracing::warn;

use crate::bus::{Acknowledge, BusError, EventBus, Subscription};
use crate::message::Message;

const DEFAULT_MAX_DELIVERIES: u32 = 5;
const DEFAULT_HISTORY: usize = 1024;

/// In-memory pub/sub bus.
///
/// - No IO / no async
/// - Each subscription receives every message published to its topic
/// - `nack` puts the message back on the same subscription (attempt + 1)
///   until it has been delivered `max_deliveries` times; after that it goes
///   to the dead-letter list
/// - Only the most recent `history` published messages are kept for
///   inspection
#[derive(Debug)]
pub struct InMemoryEventBus {
    topics: Mutex<HashMap<String, Vec<mpsc::Sender<Message>>>>,
    published: Mutex<VecDeque<Message>>,
    dead: Arc<Mutex<Vec<Message>>>,
    max_deliveries: u32,
    history: usize,
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            published: Mutex::new(VecDeque::new()),
            dead: Arc::new(Mutex::new(Vec::new())),
            max_deliveries: DEFAULT_MAX_DELIVERIES,
            history: DEFAULT_HISTORY,
        }
    }
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 0 is treated as 1. Applies to subscriptions created afterwards.
    pub fn with_max_deliveries(mut self, max_deliveries: u32) -> Self {
        self.max_deliveries = max_deliveries.max(1);
        self
    }

    /// How many published messages to keep; 0 keeps none.
    pub fn with_history(mut self, history: usize) -> Self {
        self.history = history;
        self
    }

    /// The most recent published messages, oldest first.
    pub fn published(&self) -> Vec<Message> {
        self.published
            .lock()
            .map(|p| p.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Messages published to one topic.
    pub fn published_to(&self, topic: &str) -> Vec<Message> {
        self.published()
            .into_iter()
            .filter(|m| m.topic() == topic)
            .collect()
    }

    /// Messages that were nacked on their last allowed delivery.
    pub fn dead_letters(&self) -> Vec<Message> {
        self.dead.lock().map(|d| d.clone()).unwrap_or_default()
    }
}

struct Requeue {
    sender: mpsc::Sender<Message>,
    dead: Arc<Mutex<Vec<Message>>>,
    max_deliveries: u32,
}

impl Acknowledge<Message> for Requeue {
    fn ack(&self, _message: &Message) {}

    fn nack(&self, message: Message) {
        if message.attempt() >= self.max_deliveries {
            warn!(
                topic = %message.topic(),
                message_id = %message.id(),
                deliveries = message.attempt(),
                "message moved to dead letters"
            );
            if let Ok(mut dead) = self.dead.lock() {
                dead.push(message);
            }
            return;
        }
        // Subscription dropped: the message is lost, as it would be for a
        // deleted consumer group.
        let _ = self.sender.send(message.redelivered());
    }
}

impl EventBus<Message> for InMemoryEventBus {
    fn publish(&self, message: Message) -> Result<(), BusError> {
        {
            let mut topics = self.topics.lock().map_err(|_| BusError::Poisoned)?;
            if let Some(subs) = topics.get_mut(message.topic()) {
                // Drop any dead subscribers while publishing.
                subs.retain(|tx| tx.send(message.clone()).is_ok());
            }
        }

        if self.history > 0 {
            let mut published = self.published.lock().map_err(|_| BusError::Poisoned)?;
            if published.len() == self.history {
                published.pop_front();
            }
            published.push_back(message);
        }
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Subscription<Message> {
        let (tx, rx) = mpsc::channel();

        // If the lock is poisoned, we still return a subscription;
        // it just won't receive messages until the process restarts.
        if let Ok(mut topics) = self.topics.lock() {
            topics.entry(topic.to_string()).or_default().push(tx.clone());
        }

        Subscription::new(
            rx,
            Arc::new(Requeue {
                sender: tx,
                dead: self.dead.clone(),
                max_deliveries: self.max_deliveries,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn delivers_only_to_matching_topic() {
        let bus = InMemoryEventBus::new();
        let orders = bus.subscribe("order.created");
        let other = bus.subscribe("something.else");

        bus.publish(Message::new("order.created", "o-1", b"{}".to_vec()))
            .unwrap();

        let got = orders.recv_timeout(Duration::from_millis(100)).unwrap();
        assert_eq!(got.key(), "o-1");
        assert!(other.try_recv().is_err());
    }

    #[test]
    fn nack_redelivers_with_incremented_attempt() {
        let bus = InMemoryEventBus::new();
        let sub = bus.subscribe("t");
        bus.publish(Message::new("t", "k", Vec::new())).unwrap();

        let first = sub.recv_timeout(Duration::from_millis(100)).unwrap();
        sub.nack(first.clone());
        let second = sub.recv_timeout(Duration::from_millis(100)).unwrap();

        assert_eq!(second.id(), first.id());
        assert_eq!(second.attempt(), 2);
        sub.ack(&second);
        assert!(sub.try_recv().is_err());
    }

    #[test]
    fn nack_on_last_delivery_dead_letters() {
        let bus = InMemoryEventBus::new().with_max_deliveries(3);
        let sub = bus.subscribe("t");
        bus.publish(Message::new("t", "k", Vec::new())).unwrap();

        for expected in 1..=3 {
            let got = sub.recv_timeout(Duration::from_millis(100)).unwrap();
            assert_eq!(got.attempt(), expected);
            sub.nack(got);
        }

        assert!(sub.try_recv().is_err());
        let dead = bus.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].key(), "k");
        assert_eq!(dead[0].attempt(), 3);
    }

    #[test]
    fn records_published_messages() {
        let bus = InMemoryEventBus::new();
        bus.publish(Message::new("a", "1", Vec::new())).unwrap();
        bus.publish(Message::new("b", "2", Vec::new())).unwrap();
        assert_eq!(bus.published().len(), 2);
        assert_eq!(bus.published_to("b").len(), 1);
    }

    #[test]
    fn published_history_is_bounded() {
        let bus = InMemoryEventBus::new().with_history(2);
        for key in ["1", "2", "3"] {
            bus.publish(Message::new("a", key, Vec::new())).unwrap();
        }
        let keys: Vec<String> = bus.published().iter().map(|m| m.key().to_string()).collect();
        assert_eq!(keys, ["2", "3"]);

        let silent = InMemoryEventBus::new().with_history(0);
        silent.publish(Message::new("a", "1", Vec::new())).unwrap();
        assert!(silent.published().is_empty());
    }
}

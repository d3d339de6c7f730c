//! In-memory work queue for tests/dev.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;
use uuid::Uuid;

use crate::queue::{Delivery, QueueError, WorkQueue};

/// Messages that exceeded `max_receives`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub message_id: String,
    pub body: String,
    pub receive_count: u32,
}

#[derive(Debug)]
struct Entry {
    id: String,
    body: String,
    receive_count: u32,
    receipt: Option<String>,
    invisible_until: Option<Instant>,
}

impl Entry {
    fn visible(&self, now: Instant) -> bool {
        self.invisible_until.is_none_or(|t| t <= now)
    }
}

#[derive(Debug, Default)]
struct State {
    entries: VecDeque<Entry>,
    dead: Vec<DeadLetter>,
}

/// In-memory queue with visibility timeouts and a dead-letter set.
#[derive(Debug)]
pub struct InMemoryWorkQueue {
    state: Mutex<State>,
    max_receives: u32,
}

impl Default for InMemoryWorkQueue {
    fn default() -> Self {
        Self::new(5)
    }
}

impl InMemoryWorkQueue {
    /// `max_receives` of 0 is treated as 1.
    pub fn new(max_receives: u32) -> Self {
        Self {
            state: Mutex::new(State::default()),
            max_receives: max_receives.max(1),
        }
    }

    /// Messages not yet deleted (visible or in flight).
    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Messages currently hidden by a visibility timeout.
    pub fn in_flight(&self) -> usize {
        let now = Instant::now();
        self.state
            .lock()
            .map(|s| s.entries.iter().filter(|e| !e.visible(now)).count())
            .unwrap_or(0)
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state
            .lock()
            .map(|s| s.dead.clone())
            .unwrap_or_default()
    }
}

impl WorkQueue for InMemoryWorkQueue {
    fn send(&self, body: String) -> Result<String, QueueError> {
        let id = Uuid::now_v7().to_string();
        let mut state = self.state.lock().map_err(|_| QueueError::Poisoned)?;
        state.entries.push_back(Entry {
            id: id.clone(),
            body,
            receive_count: 0,
            receipt: None,
            invisible_until: None,
        });
        Ok(id)
    }

    fn receive(&self, max: usize, visibility: Duration) -> Result<Vec<Delivery>, QueueError> {
        let now = Instant::now();
        let mut state = self.state.lock().map_err(|_| QueueError::Poisoned)?;
        let State { entries, dead } = &mut *state;

        // Dead-letter anything visible that already used up its receives.
        entries.retain(|e| {
            if e.visible(now) && e.receive_count >= self.max_receives {
                warn!(
                    message_id = %e.id,
                    receive_count = e.receive_count,
                    "moving message to dead-letter set"
                );
                dead.push(DeadLetter {
                    message_id: e.id.clone(),
                    body: e.body.clone(),
                    receive_count: e.receive_count,
                });
                false
            } else {
                true
            }
        });

        let mut out = Vec::new();
        for entry in entries.iter_mut() {
            if out.len() >= max {
                break;
            }
            if !entry.visible(now) {
                continue;
            }
            let receipt = Uuid::now_v7().to_string();
            entry.receive_count += 1;
            entry.receipt = Some(receipt.clone());
            entry.invisible_until = Some(now + visibility);
            out.push(Delivery {
                message_id: entry.id.clone(),
                receipt,
                body: entry.body.clone(),
                receive_count: entry.receive_count,
            });
        }
        Ok(out)
    }

    fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut state = self.state.lock().map_err(|_| QueueError::Poisoned)?;
        state
            .entries
            .retain(|e| e.receipt.as_deref() != Some(delivery.receipt.as_str()));
        Ok(())
    }

    fn nack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut state = self.state.lock().map_err(|_| QueueError::Poisoned)?;
        if let Some(entry) = state
            .entries
            .iter_mut()
            .find(|e| e.receipt.as_deref() == Some(delivery.receipt.as_str()))
        {
            entry.invisible_until = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VIS: Duration = Duration::from_secs(30);

    #[test]
    fn received_message_is_hidden_until_acked() {
        let q = InMemoryWorkQueue::new(5);
        let id = q.send("hello".into()).unwrap();

        let got = q.receive(10, VIS).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].message_id, id);
        assert_eq!(got[0].receive_count, 1);
        assert!(q.receive(10, VIS).unwrap().is_empty());
        assert_eq!(q.in_flight(), 1);

        q.ack(&got[0]).unwrap();
        assert!(q.is_empty());
    }

    #[test]
    fn nack_makes_message_visible_again() {
        let q = InMemoryWorkQueue::new(5);
        q.send("x".into()).unwrap();
        let first = q.receive(1, VIS).unwrap().remove(0);
        q.nack(&first).unwrap();

        let second = q.receive(1, VIS).unwrap().remove(0);
        assert_eq!(second.message_id, first.message_id);
        assert_eq!(second.receive_count, 2);
        assert_ne!(second.receipt, first.receipt);
    }

    #[test]
    fn expired_visibility_redelivers() {
        let q = InMemoryWorkQueue::new(5);
        q.send("x".into()).unwrap();
        let first = q.receive(1, Duration::ZERO).unwrap();
        assert_eq!(first.len(), 1);
        let again = q.receive(1, VIS).unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].receive_count, 2);
    }

    #[test]
    fn stale_receipt_ack_is_ignored() {
        let q = InMemoryWorkQueue::new(5);
        q.send("x".into()).unwrap();
        let stale = q.receive(1, Duration::ZERO).unwrap().remove(0);
        let _fresh = q.receive(1, VIS).unwrap().remove(0);
        q.ack(&stale).unwrap();
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn exhausted_message_is_dead_lettered() {
        let q = InMemoryWorkQueue::new(2);
        q.send("poison".into()).unwrap();
        for _ in 0..2 {
            let d = q.receive(1, VIS).unwrap().remove(0);
            q.nack(&d).unwrap();
        }
        assert!(q.receive(1, VIS).unwrap().is_empty());
        let dead = q.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].body, "poison");
        assert_eq!(dead[0].receive_count, 2);
        assert!(q.is_empty());
    }

    #[test]
    fn receive_respects_max() {
        let q = InMemoryWorkQueue::new(5);
        for i in 0..5 {
            q.send(format!("m{i}")).unwrap();
        }
        let got = q.receive(3, VIS).unwrap();
        assert_eq!(got.len(), 3);
        assert_eq!(got[0].body, "m0");
    }
}

//! Bounded delivery pool.
//!
//! A fixed number of worker threads drain a bounded channel of delivery jobs.
//! Submitting never blocks: when the channel is full the job is dropped and
//! reported as [`DeliveryStatus::Dropped`].

use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::{error, info, warn};

use orderflow_core::SubscriptionId;
use orderflow_events::RetryPolicy;

use super::transport::{WebhookRequest, WebhookTransport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    Delivered { status: u16 },
    Failed { error: String },
    /// The pool was saturated or shut down; never attempted.
    Dropped,
}

/// Result of one subscription's delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub subscription_id: SubscriptionId,
    pub url: String,
    pub attempts: u32,
    pub status: DeliveryStatus,
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self.status, DeliveryStatus::Delivered { .. })
    }
}

pub(super) struct DeliveryJob {
    pub subscription_id: SubscriptionId,
    pub request: WebhookRequest,
    pub retry: RetryPolicy,
    pub reply: mpsc::Sender<DeliveryOutcome>,
}

pub struct DeliveryPool {
    sender: Option<SyncSender<DeliveryJob>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl core::fmt::Debug for DeliveryPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeliveryPool")
            .field("workers", &self.workers.len())
            .finish_non_exhaustive()
    }
}

impl DeliveryPool {
    /// Spawn `workers` threads sharing a channel of `capacity` pending jobs.
    pub fn new(workers: usize, capacity: usize, transport: Arc<dyn WebhookTransport>) -> Self {
        let (sender, receiver) = mpsc::sync_channel::<DeliveryJob>(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..workers.max(1))
            .filter_map(|i| {
                let receiver = receiver.clone();
                let transport = transport.clone();
                thread::Builder::new()
                    .name(format!("webhook-{i}"))
                    .spawn(move || delivery_loop(receiver, transport))
                    .map_err(|e| error!(error = %e, "failed to spawn webhook worker"))
                    .ok()
            })
            .collect();

        Self {
            sender: Some(sender),
            workers,
        }
    }

    pub(super) fn submit(&self, job: DeliveryJob) {
        let Some(sender) = &self.sender else {
            reject(job, "pool shut down");
            return;
        };
        match sender.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => reject(job, "delivery queue full"),
            Err(TrySendError::Disconnected(job)) => reject(job, "delivery workers gone"),
        }
    }

    /// Stop accepting jobs, finish queued ones, join the workers.
    pub fn shutdown(mut self) {
        self.close();
    }

    fn close(&mut self) {
        self.sender.take();
        for w in self.workers.drain(..) {
            let _ = w.join();
        }
    }
}

impl Drop for DeliveryPool {
    fn drop(&mut self) {
        self.close();
    }
}

fn reject(job: DeliveryJob, reason: &str) {
    error!(
        subscription_id = %job.subscription_id,
        url = %job.request.url,
        reason,
        "webhook delivery dropped"
    );
    let _ = job.reply.send(DeliveryOutcome {
        subscription_id: job.subscription_id,
        url: job.request.url,
        attempts: 0,
        status: DeliveryStatus::Dropped,
    });
}

fn delivery_loop(receiver: Arc<Mutex<Receiver<DeliveryJob>>>, transport: Arc<dyn WebhookTransport>) {
    loop {
        let job = {
            let Ok(rx) = receiver.lock() else {
                return;
            };
            match rx.recv() {
                Ok(job) => job,
                Err(_) => return, // pool closed
            }
        };
        let outcome = deliver(&*transport, &job);
        let _ = job.reply.send(outcome);
    }
}

fn deliver(transport: &dyn WebhookTransport, job: &DeliveryJob) -> DeliveryOutcome {
    let max = job.retry.max_attempts();
    let mut attempts = 0;
    let result = job.retry.run(|attempt| {
        attempts = attempt;
        transport.deliver(&job.request).inspect_err(|e| {
            warn!(
                subscription_id = %job.subscription_id,
                url = %job.request.url,
                attempt,
                max_attempts = max,
                error = %e,
                "webhook delivery attempt failed"
            );
        })
    });

    let status = match result {
        Ok(status) => {
            info!(
                subscription_id = %job.subscription_id,
                url = %job.request.url,
                status,
                "webhook delivered"
            );
            DeliveryStatus::Delivered { status }
        }
        Err(e) => {
            error!(
                subscription_id = %job.subscription_id,
                url = %job.request.url,
                error = %e,
                "webhook delivery failed"
            );
            DeliveryStatus::Failed { error: e.to_string() }
        }
    };

    DeliveryOutcome {
        subscription_id: job.subscription_id,
        url: job.request.url.clone(),
        attempts,
        status,
    }
}

use std::sync::Arc;
use std::sync::mpsc::RecvTimeoutError;

use tracing::{debug, error};

use orderflow_events::{Message, MessageHandler, Subscription};

use super::{SharedStats, TICK, WorkerPoolHandle, stopping};
use crate::config::PoolSize;
use crate::error::PipelineError;

/// Consumes one event bus subscription.
#[derive(Debug)]
pub struct BusWorkerPool;

impl BusWorkerPool {
    /// All threads share `subscription`; each message goes to exactly one.
    /// Exits when the bus side of the subscription is dropped.
    pub fn spawn(
        name: &str,
        subscription: Subscription<Message>,
        size: PoolSize,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<WorkerPoolHandle, PipelineError> {
        let stats = SharedStats::default();
        let worker_stats = stats.clone();
        let subscription = Arc::new(subscription);
        let pool = name.to_string();

        WorkerPoolHandle::spawn(name, size.threads(), stats, move |stop| {
            while !stopping(&stop) {
                let message = match subscription.recv_timeout(TICK) {
                    Ok(message) => message,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                };

                worker_stats.started();
                match handler.handle(&message) {
                    Ok(()) => {
                        worker_stats.finished(true);
                        debug!(pool = %pool, message_id = %message.id(), "message handled");
                        subscription.ack(&message);
                    }
                    Err(e) => {
                        worker_stats.finished(false);
                        error!(
                            pool = %pool,
                            message_id = %message.id(),
                            topic = message.topic(),
                            attempt = message.attempt(),
                            error = %e,
                            "message failed, returning to bus"
                        );
                        subscription.nack(message);
                    }
                }
            }
        })
    }
}

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{error, warn};

use orderflow_events::{Delivery, WorkQueue};

use super::{SharedStats, TICK, WorkerPoolHandle, stopping};
use crate::config::PoolSize;
use crate::error::PipelineError;

/// Consumes the ingestion work queue.
#[derive(Debug)]
pub struct QueueWorkerPool;

impl QueueWorkerPool {
    /// Each thread receives one delivery at a time, hiding it for `visibility`.
    /// A failed delivery is nacked; the queue decides when it comes back and
    /// when it is dead-lettered.
    pub fn spawn<H>(
        name: &str,
        queue: Arc<dyn WorkQueue>,
        size: PoolSize,
        visibility: Duration,
        handler: H,
    ) -> Result<WorkerPoolHandle, PipelineError>
    where
        H: Fn(&Delivery) -> Result<(), PipelineError> + Send + Sync + 'static,
    {
        let stats = SharedStats::default();
        let worker_stats = stats.clone();
        let pool = name.to_string();

        WorkerPoolHandle::spawn(name, size.threads(), stats, move |stop| {
            while !stopping(&stop) {
                let batch = match queue.receive(1, visibility) {
                    Ok(batch) => batch,
                    Err(e) => {
                        warn!(pool = %pool, error = %e, "work queue receive failed");
                        thread::sleep(TICK);
                        continue;
                    }
                };
                if batch.is_empty() {
                    thread::sleep(TICK);
                    continue;
                }

                for delivery in batch {
                    worker_stats.started();
                    let result = handler(&delivery);
                    worker_stats.finished(result.is_ok());

                    let settled = match result {
                        Ok(()) => queue.ack(&delivery),
                        Err(e) => {
                            error!(
                                pool = %pool,
                                message_id = %delivery.message_id,
                                receive_count = delivery.receive_count,
                                error = %e,
                                "queue message failed"
                            );
                            queue.nack(&delivery)
                        }
                    };
                    if let Err(e) = settled {
                        warn!(pool = %pool, message_id = %delivery.message_id, error = %e, "failed to settle delivery");
                    }
                }
            }
        })
    }
}

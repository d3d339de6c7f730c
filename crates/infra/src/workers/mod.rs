//! Background worker pools.
//!
//! Both pools run `workers × concurrency` plain threads. Every thread pulls
//! one message at a time, runs the handler, then acks on success or nacks on
//! failure so the transport redelivers. Handlers must be idempotent.

mod bus_worker;
mod queue_worker;

pub use bus_worker::BusWorkerPool;
pub use queue_worker::QueueWorkerPool;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{error, info};

use crate::error::PipelineError;

/// How long an idle worker waits before re-checking for shutdown.
pub(crate) const TICK: Duration = Duration::from_millis(100);

/// Pool runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub received: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub in_flight: usize,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct SharedStats(Arc<Mutex<WorkerStats>>);

impl SharedStats {
    fn update(&self, f: impl FnOnce(&mut WorkerStats)) {
        if let Ok(mut stats) = self.0.lock() {
            f(&mut stats);
        }
    }

    pub(crate) fn started(&self) {
        self.update(|s| {
            s.received += 1;
            s.in_flight += 1;
        });
    }

    pub(crate) fn finished(&self, ok: bool) {
        self.update(|s| {
            s.in_flight = s.in_flight.saturating_sub(1);
            if ok {
                s.succeeded += 1;
            } else {
                s.failed += 1;
            }
        });
    }

    fn snapshot(&self) -> WorkerStats {
        self.0.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

/// Handle to control and join a running pool.
#[derive(Debug)]
pub struct WorkerPoolHandle {
    name: String,
    stop: Arc<AtomicBool>,
    joins: Vec<thread::JoinHandle<()>>,
    stats: SharedStats,
    started: Instant,
}

impl WorkerPoolHandle {
    /// Spawn `threads` copies of `body`, each receiving the stop flag.
    pub(crate) fn spawn<F>(name: &str, threads: usize, stats: SharedStats, body: F) -> Result<Self, PipelineError>
    where
        F: Fn(Arc<AtomicBool>) + Send + Sync + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let body = Arc::new(body);
        let mut joins = Vec::with_capacity(threads);

        for i in 0..threads.max(1) {
            let thread_stop = stop.clone();
            let body = body.clone();
            let spawned = thread::Builder::new()
                .name(format!("{name}-{i}"))
                .spawn(move || body(thread_stop));
            match spawned {
                Ok(join) => joins.push(join),
                Err(e) => {
                    error!(pool = name, error = %e, "failed to spawn worker thread");
                    stop.store(true, Ordering::SeqCst);
                    for join in joins {
                        let _ = join.join();
                    }
                    return Err(PipelineError::Fatal(format!("spawn {name} worker: {e}")));
                }
            }
        }

        info!(pool = name, threads = joins.len(), "worker pool started");
        Ok(Self {
            name: name.to_string(),
            stop,
            joins,
            stats,
            started: Instant::now(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn threads(&self) -> usize {
        self.joins.len()
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats.snapshot()
    }

    /// Request graceful shutdown and wait for in-flight messages to finish.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        for join in self.joins.drain(..) {
            let _ = join.join();
        }
        if !self.name.is_empty() {
            info!(pool = %self.name, "worker pool stopped");
        }
    }
}

impl Drop for WorkerPoolHandle {
    fn drop(&mut self) {
        if !self.joins.is_empty() {
            self.stop_and_join();
        }
    }
}

pub(crate) fn stopping(stop: &AtomicBool) -> bool {
    stop.load(Ordering::SeqCst)
}

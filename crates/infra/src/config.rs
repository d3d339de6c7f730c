//! Configuration loading and representation.
//!
//! Values come from environment variables with defaults; tests build a config
//! in code with the `with_*` setters.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use orderflow_events::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Worker pool sizing: `workers × concurrency` items in flight at most.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSize {
    pub workers: usize,
    pub concurrency: usize,
}

impl PoolSize {
    pub fn new(workers: usize, concurrency: usize) -> Self {
        Self {
            workers: workers.max(1),
            concurrency: concurrency.max(1),
        }
    }

    pub fn threads(&self) -> usize {
        self.workers * self.concurrency
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub bucket: String,
    pub queue_pool: PoolSize,
    pub queue_visibility: Duration,
    pub queue_max_receives: u32,
    pub bus_pool: PoolSize,
    pub retry: RetryPolicy,
    pub finalizer_timeout: Duration,
    pub webhook_workers: usize,
    pub webhook_queue: usize,
    pub webhook_timeout: Duration,
    pub webhook_retry: RetryPolicy,
    pub ims_base_url: Option<String>,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub object_root: Option<String>,
    pub listen_addr: SocketAddr,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            bucket: "orders".to_string(),
            queue_pool: PoolSize::new(2, 2),
            queue_visibility: Duration::from_secs(30),
            queue_max_receives: 5,
            bus_pool: PoolSize::new(2, 2),
            retry: RetryPolicy::fixed(3, Duration::from_millis(1000)),
            finalizer_timeout: Duration::from_millis(5000),
            webhook_workers: 4,
            webhook_queue: 256,
            webhook_timeout: Duration::from_millis(5000),
            webhook_retry: RetryPolicy::fixed(1, Duration::from_millis(1000)),
            ims_base_url: None,
            database_url: None,
            redis_url: None,
            object_root: None,
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

impl PipelineConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (used by tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let d = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let webhook_retries: u32 = parse(&get, "ORDERFLOW_WEBHOOK_RETRIES", 0)?;
        let retry_delay_ms: u64 = parse(&get, "ORDERFLOW_RETRY_DELAY_MS", d.retry.delay.as_millis() as u64)?;

        Ok(Self {
            bucket: get("ORDERFLOW_BUCKET").unwrap_or(d.bucket),
            queue_pool: PoolSize::new(
                parse(&get, "ORDERFLOW_QUEUE_WORKERS", d.queue_pool.workers)?,
                parse(&get, "ORDERFLOW_QUEUE_CONCURRENCY", d.queue_pool.concurrency)?,
            ),
            queue_visibility: Duration::from_secs(parse(
                &get,
                "ORDERFLOW_QUEUE_VISIBILITY_SECS",
                d.queue_visibility.as_secs(),
            )?),
            queue_max_receives: parse(&get, "ORDERFLOW_QUEUE_MAX_RECEIVES", d.queue_max_receives)?,
            bus_pool: PoolSize::new(
                parse(&get, "ORDERFLOW_BUS_WORKERS", d.bus_pool.workers)?,
                parse(&get, "ORDERFLOW_BUS_CONCURRENCY", d.bus_pool.concurrency)?,
            ),
            retry: RetryPolicy::fixed(
                parse(&get, "ORDERFLOW_RETRY_ATTEMPTS", d.retry.attempts)?,
                Duration::from_millis(retry_delay_ms),
            ),
            finalizer_timeout: Duration::from_millis(parse(
                &get,
                "ORDERFLOW_FINALIZER_TIMEOUT_MS",
                d.finalizer_timeout.as_millis() as u64,
            )?),
            webhook_workers: parse(&get, "ORDERFLOW_WEBHOOK_WORKERS", d.webhook_workers)?.max(1),
            webhook_queue: parse(&get, "ORDERFLOW_WEBHOOK_QUEUE", d.webhook_queue)?.max(1),
            webhook_timeout: Duration::from_millis(parse(
                &get,
                "ORDERFLOW_WEBHOOK_TIMEOUT_MS",
                d.webhook_timeout.as_millis() as u64,
            )?),
            // Retries are on top of the first delivery.
            webhook_retry: RetryPolicy::fixed(webhook_retries + 1, Duration::from_millis(retry_delay_ms)),
            ims_base_url: get("ORDERFLOW_IMS_BASE_URL"),
            database_url: get("DATABASE_URL"),
            redis_url: get("REDIS_URL"),
            object_root: get("ORDERFLOW_OBJECT_ROOT"),
            listen_addr: parse(&get, "ORDERFLOW_LISTEN_ADDR", d.listen_addr)?,
        })
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    pub fn with_queue_pool(mut self, workers: usize, concurrency: usize) -> Self {
        self.queue_pool = PoolSize::new(workers, concurrency);
        self
    }

    pub fn with_bus_pool(mut self, workers: usize, concurrency: usize) -> Self {
        self.bus_pool = PoolSize::new(workers, concurrency);
        self
    }

    pub fn with_queue_visibility(mut self, visibility: Duration) -> Self {
        self.queue_visibility = visibility;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_finalizer_timeout(mut self, timeout: Duration) -> Self {
        self.finalizer_timeout = timeout;
        self
    }

    pub fn with_webhook_pool(mut self, workers: usize, queue: usize) -> Self {
        self.webhook_workers = workers.max(1);
        self.webhook_queue = queue.max(1);
        self
    }

    pub fn with_webhook_retry(mut self, retry: RetryPolicy) -> Self {
        self.webhook_retry = retry;
        self
    }
}

fn parse<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw,
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> Result<PipelineConfig, ConfigError> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        PipelineConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn empty_environment_yields_defaults() {
        assert_eq!(load(&[]).unwrap(), PipelineConfig::default());
    }

    #[test]
    fn reads_overrides() {
        let cfg = load(&[
            ("ORDERFLOW_BUCKET", "uploads"),
            ("ORDERFLOW_QUEUE_WORKERS", "3"),
            ("ORDERFLOW_QUEUE_CONCURRENCY", "4"),
            ("ORDERFLOW_RETRY_ATTEMPTS", "5"),
            ("ORDERFLOW_RETRY_DELAY_MS", "10"),
            ("ORDERFLOW_WEBHOOK_RETRIES", "2"),
            ("DATABASE_URL", "postgres://localhost/orders"),
            ("ORDERFLOW_LISTEN_ADDR", "127.0.0.1:9000"),
        ])
        .unwrap();
        assert_eq!(cfg.bucket, "uploads");
        assert_eq!(cfg.queue_pool.threads(), 12);
        assert_eq!(cfg.retry, RetryPolicy::fixed(5, Duration::from_millis(10)));
        assert_eq!(cfg.webhook_retry.attempts, 3);
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/orders"));
        assert_eq!(cfg.listen_addr.port(), 9000);
    }

    #[test]
    fn malformed_number_is_an_error() {
        let err = load(&[("ORDERFLOW_BUS_WORKERS", "many")]).unwrap_err();
        let ConfigError::Invalid { key, .. } = err;
        assert_eq!(key, "ORDERFLOW_BUS_WORKERS");
    }

    #[test]
    fn zero_workers_are_clamped() {
        let cfg = load(&[("ORDERFLOW_QUEUE_WORKERS", "0")]).unwrap();
        assert_eq!(cfg.queue_pool.workers, 1);
    }
}

//! Retry wrapper for message handlers.

use std::thread;
use std::time::Duration;

use tracing::{error, warn};

use crate::handler::{HandlerError, MessageHandler};
use crate::message::Message;

/// Fixed-delay retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first (0 is treated as 1).
    pub attempts: u32,
    /// Sleep between failed attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(3, Duration::from_secs(1))
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn no_retry() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    pub fn max_attempts(&self) -> u32 {
        self.attempts.max(1)
    }

    /// Run `op` until it succeeds or attempts are exhausted.
    ///
    /// Sleeps `delay` between attempts, never after the last one. Returns the
    /// last error.
    pub fn run<T, E, F>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
    {
        let max = self.max_attempts();
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(v) => return Ok(v),
                Err(e) if attempt >= max => return Err(e),
                Err(_) => {
                    if !self.delay.is_zero() {
                        thread::sleep(self.delay);
                    }
                    attempt += 1;
                }
            }
        }
    }
}

/// Wraps a handler and retries it in place before giving up.
///
/// When every attempt fails the last error is returned, so the worker nacks
/// and the bus redelivers later.
pub struct RetryHandler<H> {
    inner: H,
    policy: RetryPolicy,
}

impl<H: MessageHandler> RetryHandler<H> {
    pub fn new(inner: H, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }
}

impl<H: MessageHandler> MessageHandler for RetryHandler<H> {
    fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        let max = self.policy.max_attempts();
        let result = self.policy.run(|attempt| {
            self.inner.handle(message).inspect_err(|e| {
                warn!(
                    message_id = %message.id(),
                    topic = message.topic(),
                    attempt,
                    max_attempts = max,
                    error = %e,
                    "handler attempt failed"
                );
            })
        });
        if let Err(e) = &result {
            error!(
                message_id = %message.id(),
                topic = message.topic(),
                error = %e,
                "handler failed after {max} attempts"
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    use super::*;

    fn flaky(fail_first: u32, calls: Arc<AtomicU32>) -> impl MessageHandler {
        move |_: &Message| -> Result<(), HandlerError> {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= fail_first {
                Err(format!("failure {n}").into())
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let h = RetryHandler::new(flaky(2, calls.clone()), RetryPolicy::fixed(3, Duration::ZERO));
        h.handle(&Message::new("t", "k", Vec::new())).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn gives_up_with_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let h = RetryHandler::new(flaky(10, calls.clone()), RetryPolicy::fixed(3, Duration::ZERO));
        let err = h.handle(&Message::new("t", "k", Vec::new())).unwrap_err();
        assert_eq!(err.to_string(), "failure 3");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn zero_attempts_still_runs_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let h = RetryHandler::new(flaky(10, calls.clone()), RetryPolicy::fixed(0, Duration::ZERO));
        assert!(h.handle(&Message::new("t", "k", Vec::new())).is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn no_sleep_after_last_attempt() {
        let policy = RetryPolicy::fixed(2, Duration::from_millis(200));
        let start = Instant::now();
        let r: Result<(), &str> = policy.run(|_| Err("nope"));
        assert!(r.is_err());
        let took = start.elapsed();
        assert!(took >= Duration::from_millis(200));
        assert!(took < Duration::from_millis(400));
    }
}

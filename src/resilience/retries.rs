//! Retry logic.
//!
//! # Responsibilities
//! - Bound the number of attempts (`max_retry + 1`)
//! - Sleep a fixed wait between attempts
//! - Grant one immediate retry for transient errors raised early in a call
//!
//! # Design Decisions
//! - The quick retry does not consume the configured retry budget
//! - Every retry after the first attempt asks for a fresh connection

use std::future::Future;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::ClientConfig;
use crate::error::TransportError;

/// A transient error raised within this window gets an immediate retry.
pub const QUICK_RETRY_WINDOW: Duration = Duration::from_millis(200);

/// One attempt handed to the operation being retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    /// 1-based attempt number.
    pub number: u32,
    /// Whether the attempt should avoid reusing a pooled connection.
    pub fresh: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retry: u32,
    pub wait: Duration,
}

impl RetryPolicy {
    pub fn new(max_retry: u32, wait: Duration) -> Self {
        Self { max_retry, wait }
    }

    /// Total attempts allowed.
    pub fn attempts(&self) -> u32 {
        self.max_retry.saturating_add(1)
    }

    /// Sleep between two attempts.
    pub async fn pause(&self) {
        if !self.wait.is_zero() {
            tokio::time::sleep(self.wait).await;
        }
    }

    /// Whether `err`, raised `started.elapsed()` into the call, earns the quick retry.
    pub fn quick_retry(err: &TransportError, started: Instant) -> bool {
        err.is_transient() && started.elapsed() < QUICK_RETRY_WINDOW
    }

    /// Run `op` under the policy.
    ///
    /// The first attempt may reuse a connection. A transient failure inside
    /// [`QUICK_RETRY_WINDOW`] is retried at once; after that up to
    /// `max_retry` attempts follow, each after `wait`.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, TransportError>
    where
        F: FnMut(Attempt) -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let started = Instant::now();
        let mut number = 1;
        let mut result = op(Attempt { number, fresh: false }).await;

        if let Err(e) = &result {
            if Self::quick_retry(e, started) {
                debug!(error = %e, "Transient failure, retrying on a fresh connection");
                number += 1;
                result = op(Attempt { number, fresh: true }).await;
            }
        }

        let mut remaining = self.max_retry;
        while result.is_err() && remaining > 0 {
            self.pause().await;
            remaining -= 1;
            number += 1;
            result = op(Attempt { number, fresh: true }).await;
        }
        result
    }
}

impl From<&ClientConfig> for RetryPolicy {
    fn from(config: &ClientConfig) -> Self {
        Self::new(config.max_retry, config.wait_to_retry())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let calls = AtomicU32::new(0);
        let out = policy
            .run(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<_, TransportError>(attempt.number) }
            })
            .await
            .unwrap();
        assert_eq!(out, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn quick_retry_is_free() {
        let policy = RetryPolicy::new(0, Duration::from_millis(1));
        let seen = std::sync::Mutex::new(Vec::new());
        let out = policy
            .run(|attempt| {
                seen.lock().unwrap().push(attempt);
                async move {
                    if attempt.number == 1 {
                        Err(TransportError::Closed)
                    } else {
                        Ok(attempt.number)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(out, 2);
        let seen = seen.lock().unwrap();
        assert!(!seen[0].fresh);
        assert!(seen[1].fresh);
    }

    #[tokio::test]
    async fn permanent_errors_use_the_budget() {
        let policy = RetryPolicy::new(2, Duration::from_millis(20));
        let calls = AtomicU32::new(0);
        let started = Instant::now();
        let err = policy
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(TransportError::Codec("bad".into())) }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Codec(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn attempts_is_retries_plus_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).attempts(), 1);
        assert_eq!(RetryPolicy::new(2, Duration::ZERO).attempts(), 3);
        assert_eq!(RetryPolicy::new(u32::MAX, Duration::ZERO).attempts(), u32::MAX);
    }
}

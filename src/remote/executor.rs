// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Retrying executor for blocking remote store operations.
//!
//! Every call against the store is a blocking HTTP round trip. The executor
//! moves each attempt onto tokio's blocking pool so request handling never
//! waits on the network, and bounds the number of attempts in flight with a
//! semaphore sized to the HTTP client's connection budget.
//!
//! ## Retry policy
//!
//! - Transient failures (network, timeout, 5xx, 408, 429) are retried up to
//!   `max_attempts` total attempts.
//! - Delay before retry `n` (0-based) is `base_delay * 2^n`, with uniform
//!   jitter of ±10%.
//! - Terminal failures are returned immediately.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Semaphore;
use tracing::warn;

use super::RemoteError;

/// Default number of attempts per operation.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay for exponential backoff.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(200);

/// Default per-attempt time budget.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default worker pool bound.
pub const DEFAULT_POOL_SIZE: usize = 8;

/// Jitter applied around each backoff delay.
const JITTER_RATIO: f64 = 0.10;

/// Retry settings for [`RemoteCallExecutor`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the failed attempt `attempt` (0-based), jitter included.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.base_delay.saturating_mul(2u32.saturating_pow(attempt));
        let jitter = rand::thread_rng().gen_range(-JITTER_RATIO..=JITTER_RATIO);
        base.mul_f64(1.0 + jitter)
    }
}

/// Runs blocking remote operations on a bounded worker pool with retry.
#[derive(Debug)]
pub struct RemoteCallExecutor {
    policy: RetryPolicy,
    permits: Arc<Semaphore>,
}

impl RemoteCallExecutor {
    pub fn new(policy: RetryPolicy, pool_size: usize) -> Self {
        Self {
            policy,
            permits: Arc::new(Semaphore::new(pool_size.max(1))),
        }
    }

    /// Execute `op`, retrying transient failures per the policy.
    ///
    /// On exhaustion the last underlying failure is returned, with
    /// `attempts` recording how many were made.
    pub async fn execute<T, F>(&self, op: F) -> Result<T, RemoteError>
    where
        T: Send + 'static,
        F: Fn() -> Result<T, RemoteError> + Send + Sync + 'static,
    {
        let op = Arc::new(op);
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            let error = match self.attempt(Arc::clone(&op)).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            attempt += 1;

            if !error.is_transient() {
                return Err(error.with_attempts(attempt));
            }
            if attempt >= max_attempts {
                warn!(attempts = attempt, error = %error, "Remote call failed, retries exhausted");
                return Err(error.with_attempts(attempt));
            }

            let delay = self.policy.backoff(attempt - 1);
            warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Remote call failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// One attempt: wait for a pool slot, run on the blocking pool, enforce the timeout.
    async fn attempt<T, F>(&self, op: Arc<F>) -> Result<T, RemoteError>
    where
        T: Send + 'static,
        F: Fn() -> Result<T, RemoteError> + Send + Sync + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| RemoteError::aborted("remote worker pool closed"))?;

        // The permit travels with the blocking job, so a timed-out attempt
        // keeps its slot until the underlying call actually returns.
        let job = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            op()
        });

        match tokio::time::timeout(self.policy.attempt_timeout, job).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(RemoteError::aborted(format!(
                "remote operation aborted: {join_error}"
            ))),
            Err(_) => Err(RemoteError::timeout(format!(
                "remote operation exceeded {}ms",
                self.policy.attempt_timeout.as_millis()
            ))),
        }
    }
}

impl Default for RemoteCallExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default(), DEFAULT_POOL_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            attempt_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn always_transient_makes_exactly_max_attempts() {
        let executor = RemoteCallExecutor::new(fast_policy(3), 2);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<(), _> = executor
            .execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(RemoteError::status(503, "unavailable", None))
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.attempts, 3);
        assert_eq!(err.status_code, Some(503));
    }

    #[tokio::test]
    async fn terminal_failure_is_not_retried() {
        let executor = RemoteCallExecutor::new(fast_policy(5), 2);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let err = executor
            .execute(move || -> Result<(), _> {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(RemoteError::status(400, "bad request", Some("PGRST100".into())))
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.error_code.as_deref(), Some("PGRST100"));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let executor = RemoteCallExecutor::new(fast_policy(3), 2);
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let value = executor
            .execute(move || {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(RemoteError::network("connection reset"))
                } else {
                    Ok(42)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn slow_attempt_counts_as_timeout() {
        let executor = RemoteCallExecutor::new(
            RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
                attempt_timeout: Duration::from_millis(20),
            },
            4,
        );
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let err = executor
            .execute(move || -> Result<(), _> {
                counter.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(100));
                Ok(())
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind, super::super::FailureKind::Timeout);
        assert_eq!(err.attempts, 2);
    }

    #[tokio::test]
    async fn pool_bounds_concurrent_attempts() {
        let executor = Arc::new(RemoteCallExecutor::new(fast_policy(1), 2));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let executor = Arc::clone(&executor);
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                executor
                    .execute(move || {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(20));
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn backoff_doubles_within_jitter() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            attempt_timeout: Duration::from_secs(1),
        };
        for attempt in 0..4u32 {
            let expected = 100.0 * 2f64.powi(attempt as i32);
            let delay = policy.backoff(attempt).as_secs_f64() * 1000.0;
            assert!(delay >= expected * 0.9 - 0.001, "attempt {attempt}: {delay}");
            assert!(delay <= expected * 1.1 + 0.001, "attempt {attempt}: {delay}");
        }
    }
}

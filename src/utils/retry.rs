use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::warn;

/// Exponential backoff with additive jitter, capped at `max_delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            max_jitter: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Retries without sleeping between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based):
    /// `min(base * 2^(retry-1) + jitter, max_delay)`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let jitter = if self.max_jitter.is_zero() {
            Duration::ZERO
        } else {
            let max_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
            Duration::from_millis(rand::rng().random_range(0..=max_ms))
        };

        self.backoff(retry).saturating_add(jitter).min(self.max_delay)
    }

    fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

#[derive(Debug, Error)]
#[error("{operation} failed after {attempts} attempt(s): {source}")]
pub struct RetryError<E> {
    pub operation: String,
    pub attempts: u32,
    pub source: E,
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        self.source
    }
}

/// Runs `op` until it succeeds or `policy.max_attempts` is reached.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_with_backoff_when(policy, operation, op, |_| true).await
}

/// Like [`retry_with_backoff`], but stops early when `should_retry` rejects
/// the error.
pub async fn retry_with_backoff_when<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
    should_retry: P,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= max_attempts || !should_retry(&err) => {
                return Err(RetryError {
                    operation: operation.to_string(),
                    attempts: attempt,
                    source: err,
                });
            }
            Err(err) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    operation,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "attempt failed, retrying"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use tokio_test::{assert_err, assert_ok};

    use super::*;

    #[tokio::test]
    async fn succeeds_on_third_attempt() {
        let calls = AtomicU32::new(0);

        let result = retry_with_backoff(&RetryPolicy::immediate(3), "flaky", || {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if call < 3 {
                    Err(std::io::Error::other("boom"))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(assert_ok!(result), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = retry_with_backoff(&RetryPolicy::immediate(4), "send", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(std::io::Error::other("down")) }
        })
        .await;

        let err = assert_err!(result);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(err.attempts, 4);
        assert_eq!(err.operation, "send");
        assert_eq!(err.to_string(), "send failed after 4 attempt(s): down");
    }

    #[tokio::test]
    async fn non_retriable_error_stops_immediately() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = retry_with_backoff_when(
            &RetryPolicy::immediate(3),
            "resolve",
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone")) }
            },
            |err| err.kind() != std::io::ErrorKind::NotFound,
        )
        .await;

        assert_eq!(assert_err!(result).attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_attempts_still_runs_once() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = retry_with_backoff(&RetryPolicy::immediate(0), "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(std::io::Error::other("x")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delay_doubles_and_caps_without_jitter() {
        let policy = RetryPolicy {
            max_jitter: Duration::ZERO,
            ..RetryPolicy::default()
        };

        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(5), Duration::from_millis(10_000));
        assert_eq!(policy.delay_for(40), Duration::from_millis(10_000));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::default();

        for _ in 0..100 {
            let delay = policy.delay_for(2);
            assert!(delay >= Duration::from_millis(2000));
            assert!(delay <= Duration::from_millis(3000));
        }
        for _ in 0..100 {
            let delay = policy.delay_for(4);
            assert!(delay >= Duration::from_millis(8000));
            assert!(delay <= Duration::from_millis(9000));
        }
        assert_eq!(policy.delay_for(5), Duration::from_millis(10_000));
    }
}

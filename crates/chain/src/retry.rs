//! Generic retry combinator for chain calls.
//!
//! Wraps any async closure returning `Result<T, ChainError>` with bounded
//! exponential backoff. The retryable set is a predicate over the typed
//! error, so callers can narrow it (e.g. read-only calls never retry a
//! revert) without subclassing anything.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::ChainError;

/// Default attempt budget when none is configured.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Exponential backoff policy with jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Lower bound for any computed delay.
    pub min_wait: Duration,
    /// Upper bound for any computed delay.
    pub max_wait: Duration,
    /// Fraction of the delay that may be shaved off randomly (0.0 disables).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            min_wait: Duration::from_secs(4),
            max_wait: Duration::from_secs(11),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Create a policy without jitter.
    pub fn new(max_attempts: u32, min_wait: Duration, max_wait: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            min_wait,
            max_wait: max_wait.max(min_wait),
            jitter: 0.0,
        }
    }

    /// Set the jitter fraction (clamped to [0, 1]).
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Policy that never sleeps. Used by tests and one-shot tools.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    /// Deterministic backoff for the given (1-based) failed attempt:
    /// `min_wait * 2^(attempt-1)`, clamped to `[min_wait, max_wait]`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let raw = self.min_wait.saturating_mul(1u32 << exp);
        raw.clamp(self.min_wait, self.max_wait)
    }

    /// Backoff with jitter applied, still within `[min_wait, max_wait]`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let backoff = self.backoff(attempt);
        if self.jitter <= 0.0 || backoff.is_zero() {
            return backoff;
        }
        let factor = 1.0 - rand::thread_rng().gen_range(0.0..=self.jitter);
        backoff.mul_f64(factor).clamp(self.min_wait, self.max_wait)
    }

    /// Run `op` with the default retryable predicate.
    pub async fn run<T, F, Fut>(&self, op_name: &str, op: F) -> Result<T, ChainError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ChainError>>,
    {
        self.run_if(op_name, ChainError::is_retryable, op).await
    }

    /// Run `op`, retrying only errors accepted by `retry_if`.
    ///
    /// The closure receives the 1-based attempt number so it can re-read
    /// state (nonce, gas price) on every attempt.
    pub async fn run_if<T, F, Fut, P>(
        &self,
        op_name: &str,
        retry_if: P,
        mut op: F,
    ) -> Result<T, ChainError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ChainError>>,
        P: Fn(&ChainError) -> bool,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_attempts && retry_if(&err) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        op = op_name,
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        remaining = self.max_attempts - attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying chain operation"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_is_exponential_and_bounded() {
        let policy = RetryPolicy::new(5, Duration::from_secs(4), Duration::from_secs(11));
        assert_eq!(policy.backoff(1), Duration::from_secs(4));
        assert_eq!(policy.backoff(2), Duration::from_secs(8));
        assert_eq!(policy.backoff(3), Duration::from_secs(11));
        assert_eq!(policy.backoff(10), Duration::from_secs(11));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_millis(800))
            .with_jitter(0.5);
        for attempt in 1..8 {
            let delay = policy.delay_for(attempt);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(800));
        }
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = RetryPolicy::immediate(3)
            .run("flaky", |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(ChainError::Timeout(10))
                    } else {
                        Ok(42u64)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_stops_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::immediate(3)
            .run("down", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ChainError::Transport("connection refused".into())) }
            })
            .await;

        assert!(matches!(result, Err(ChainError::Transport(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_error_surfaces_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::immediate(5)
            .run("broke", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ChainError::InsufficientFunds("0 wei".into())) }
            })
            .await;

        assert!(matches!(result, Err(ChainError::InsufficientFunds(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempt_number_is_passed_through() {
        let mut seen = Vec::new();
        let _ = RetryPolicy::immediate(3)
            .run_if(
                "count",
                |_| true,
                |attempt| {
                    seen.push(attempt);
                    async { Err::<(), _>(ChainError::Decode("x".into())) }
                },
            )
            .await;
        assert_eq!(seen, vec![1, 2, 3]);
    }
}

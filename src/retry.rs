// src/retry.rs
// Bounded retry with exponential backoff and jitter around a single
// AI-backed call. A permanently failing backend sees exactly
// `max_retries + 1` attempts; a permanent error stops the sequence at once.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;
use crate::error::AgentCallError;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub factor: f64,
    pub attempt_timeout: Duration,
    /// Upper bound of the uniform jitter added to each backoff sleep.
    pub max_jitter: Duration,
}

impl RetryPolicy {
    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            base_delay: Duration::from_millis(cfg.base_delay_ms),
            factor: cfg.backoff_factor,
            attempt_timeout: Duration::from_secs(cfg.attempt_timeout_secs),
            max_jitter: Duration::from_millis(250),
        }
    }

    /// Delay before retry number `attempt` (0-based): base * factor^attempt.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.base_delay.mul_f64(self.factor.powi(attempt as i32))
    }
}

impl RetryPolicy {
    /// Fast policy for tests: millisecond delays, no meaningful jitter.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(1),
            factor: 1.0,
            attempt_timeout: Duration::from_millis(200),
            max_jitter: Duration::from_millis(1),
        }
    }
}

/// Run `op` under the policy. Transient errors and per-attempt timeouts are
/// retried with backoff; permanent errors and exhaustion surface to the
/// caller (who substitutes the heuristic variant).
pub async fn call_with_retry<F, Fut, T>(policy: &RetryPolicy, mut op: F) -> Result<T, AgentCallError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AgentCallError>>,
{
    let mut attempt: u32 = 0;
    loop {
        let outcome = tokio::time::timeout(policy.attempt_timeout, op()).await;
        let err = match outcome {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) if !e.is_transient() => return Err(e),
            Ok(Err(e)) => e,
            Err(_) => AgentCallError::Timeout(policy.attempt_timeout),
        };

        if attempt >= policy.max_retries {
            return Err(err);
        }

        let delay = policy.backoff_delay(attempt);
        let jitter = Duration::from_millis(
            rand::rng().random_range(0..=policy.max_jitter.as_millis().max(1) as u64),
        );
        tracing::debug!(
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "agent call failed, retrying after backoff"
        );
        tokio::time::sleep(delay + jitter).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_grows_multiplicatively() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            factor: 2.0,
            attempt_timeout: Duration::from_secs(1),
            max_jitter: Duration::from_millis(0),
        };
        assert_eq!(policy.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn exhaustion_after_exactly_max_retries_plus_one_attempts() {
        for max_retries in [0u32, 1, 3] {
            let calls = AtomicU32::new(0);
            let policy = RetryPolicy::immediate(max_retries);
            let res: Result<(), _> = call_with_retry(&policy, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(AgentCallError::Transient("503".into())) }
            })
            .await;
            assert!(res.is_err());
            assert_eq!(calls.load(Ordering::SeqCst), max_retries + 1);
        }
    }

    #[tokio::test]
    async fn permanent_error_short_circuits() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::immediate(5);
        let res: Result<(), _> = call_with_retry(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AgentCallError::Permanent("bad credential".into())) }
        })
        .await;
        assert!(matches!(res, Err(AgentCallError::Permanent(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::immediate(3);
        let res = call_with_retry(&policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(AgentCallError::Transient("rate limited".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(res.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn per_attempt_timeout_counts_as_transient() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_retries: 1,
            base_delay: Duration::from_millis(1),
            factor: 1.0,
            attempt_timeout: Duration::from_millis(10),
            max_jitter: Duration::from_millis(1),
        };
        let res: Result<(), _> = call_with_retry(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            }
        })
        .await;
        assert!(matches!(res, Err(AgentCallError::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}

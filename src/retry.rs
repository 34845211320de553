//! Bounded retry with exponential backoff.
//!
//! Delay before retry `n` (1-based) is `base_delay * multiplier^(n-1)`,
//! capped at `max_delay`. Only errors the caller classifies as transient
//! are retried; anything else fails on the spot.

use std::future::Future;
use std::time::Duration;

/// Retry policy injected from configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Always >= 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// A policy that retries immediately, for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay to wait before the given retry (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = self.multiplier.powi(retry.saturating_sub(1) as i32);
        let millis = (self.base_delay.as_millis() as f64 * factor).min(u64::MAX as f64);
        Duration::from_millis(millis as u64).min(self.max_delay)
    }
}

/// Outcome of a retried operation.
#[derive(Debug)]
pub struct Retried<T, E> {
    pub result: Result<T, E>,
    /// Number of retries performed (attempts - 1).
    pub retries: u32,
}

/// Run `op` until it succeeds, fails permanently, or attempts run out.
pub async fn retry<T, E, F, Fut, P>(policy: &RetryPolicy, mut op: F, is_transient: P) -> Retried<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        if attempt > 0 {
            let delay = policy.delay_for(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        match op(attempt).await {
            Ok(value) => {
                return Retried {
                    result: Ok(value),
                    retries: attempt,
                }
            }
            Err(e) if is_transient(&e) && attempt + 1 < max_attempts => {
                tracing::warn!(attempt = attempt + 1, max_attempts, error = %e, "transient failure, retrying");
                attempt += 1;
            }
            Err(e) => {
                return Retried {
                    result: Err(e),
                    retries: attempt,
                }
            }
        }
    }
}

//! Bounded retry with fixed backoff.
//!
//! Used at every call site that waits on something outside the process:
//! client connect, catalogue fetch, and health polling.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Attempt budget and delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Values below 1 are treated as 1.
    pub max_attempts: u32,
    /// Delay between consecutive attempts
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Single attempt, no delay.
    pub const fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    const fn attempts(&self) -> u32 {
        if self.max_attempts == 0 {
            1
        } else {
            self.max_attempts
        }
    }
}

/// Run `op` until it succeeds, returns a non-retryable error, or the
/// attempt budget runs out. The last error is returned.
///
/// `op` receives the 1-based attempt number.
pub async fn retry_with_backoff<T, E, Op, Fut, P>(
    policy: RetryPolicy,
    label: &str,
    mut op: Op,
    mut is_retryable: P,
) -> Result<T, E>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&E) -> bool,
    E: Display,
{
    let max_attempts = policy.attempts();
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts && is_retryable(&e) => {
                debug!(
                    operation = label,
                    attempt,
                    max_attempts,
                    error = %e,
                    "Attempt failed, retrying"
                );
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

//! Bounded retry with linear backoff.
//!
//! One policy type serves both capture polling and provider calls; the
//! caller supplies the predicate that decides which errors are worth
//! another attempt.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::config::{CaptureConfig, ProviderConfig};

/// Attempt limit and base delay. The wait after attempt `n` is
/// `base_delay * n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// At least one attempt is always made.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Clipboard polling after a synthetic copy.
    pub fn capture(config: &CaptureConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
        )
    }

    /// Provider calls.
    pub fn provider(config: &ProviderConfig) -> Self {
        Self::new(config.max_attempts, config.retry_delay())
    }

    /// Delay before the attempt following `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }

    /// Run `operation` until it succeeds, fails with an error
    /// `is_retryable` rejects, or attempts run out. The last error is
    /// returned.
    ///
    /// `operation` receives the 1-based attempt number.
    pub async fn execute<T, E, F, Fut, P>(
        &self,
        op: &str,
        mut operation: F,
        is_retryable: P,
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.max_attempts || !is_retryable(&e) => {
                    tracing::debug!(op, attempt, error = %e, "giving up");
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.delay_after(attempt);
                    tracing::debug!(
                        op,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

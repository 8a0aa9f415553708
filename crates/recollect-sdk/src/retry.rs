//! Retry with exponential backoff for write conflicts and transient
//! storage failures.

use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::{SDKError, SDKResult};

/// Bounded retry policy
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms.max(config.initial_backoff_ms)),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    fn is_retryable(err: &SDKError) -> bool {
        err.is_conflict() || err.is_transient()
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent.
    ///
    /// An exhausted conflict budget surfaces as `SDKError::Conflict`; other
    /// retryable errors are returned as last seen.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> SDKResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SDKResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if !Self::is_retryable(&err) => return Err(err),
                Err(err) if attempt >= self.max_attempts => {
                    tracing::warn!(operation, attempts = attempt, error = %err, "Retry budget exhausted");
                    if err.is_conflict() {
                        return Err(SDKError::conflict(format!(
                            "{operation} gave up after {attempt} attempts: {err}"
                        )));
                    }
                    return Err(err);
                }
                Err(err) => {
                    let delay = self.backoff(attempt);
                    tracing::debug!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

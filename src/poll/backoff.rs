//! Retry with exponential backoff
//!
//! Used where each attempt is expensive and failures are mostly "not up
//! yet", e.g. SSH handshakes against an emulated device that is still
//! booting. Unlike [`await_condition`](super::await_condition) the delay grows
//! between attempts, and the caller decides which errors are worth retrying.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::errors::{Error, Result};

/// Retry configuration with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total time budget for all attempts
    pub budget: Duration,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (2.0 doubles each time)
    pub backoff_multiplier: f64,
    /// Description for logging purposes
    pub description: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            budget: Duration::from_secs(25 * 60),
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5 * 60),
            backoff_multiplier: 2.0,
            description: "operation".to_string(),
        }
    }
}

impl RetryConfig {
    /// Budget-bound doubling backoff starting at one second
    pub fn with_budget(budget: Duration) -> Self {
        Self { budget, ..Self::default() }
    }

    /// Create a custom retry config with a description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        Duration::from_millis(((delay.as_millis() as f64) * self.backoff_multiplier) as u64)
            .min(self.max_delay)
    }
}

/// Retry `f` until it succeeds, fails with a non-retryable error, or the
/// budget is spent.
///
/// `is_retryable` decides per error whether another attempt is worthwhile;
/// errors it rejects are returned unchanged. When the budget runs out the
/// last retryable error is folded into an [`Error::Timeout`].
pub async fn retry_with_backoff<F, Fut, T, R>(
    config: &RetryConfig,
    mut f: F,
    is_retryable: R,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    R: Fn(&Error) -> bool,
{
    let started = Instant::now();
    let deadline = started + config.budget;
    let mut delay = config.initial_delay;
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        let err = match f().await {
            Ok(value) => {
                if attempts > 1 {
                    debug!(attempts, description = %config.description, "Retry succeeded");
                }
                return Ok(value);
            }
            Err(e) if is_retryable(&e) => e,
            Err(e) => return Err(e),
        };

        let now = Instant::now();
        if now >= deadline {
            warn!(
                attempts,
                error = %err,
                description = %config.description,
                "Retry budget exhausted"
            );
            return Err(Error::Timeout {
                awaited: format!("{} (last error: {})", config.description, err),
                waited: now - started,
                attempts,
            });
        }

        let pause = delay.min(deadline - now);
        debug!(
            attempts,
            delay_ms = pause.as_millis(),
            error = %err,
            description = %config.description,
            "Retry attempt failed, will retry"
        );
        sleep(pause).await;
        delay = config.next_delay(delay);
    }
}

//! Retry logic with exponential backoff
//!
//! Only server faults (HTTP 5xx) are retried. Client errors, transport
//! failures and undecodable responses propagate on the first attempt.

use std::future::Future;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::{Error, Result};

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Whether retries are enabled
    pub enabled: bool,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Upper bound for any single delay
    pub max_backoff: Duration,
    /// Backoff multiplier
    pub multiplier: f32,
    /// Randomize delays
    pub jitter: bool,
}

impl RetryPolicy {
    /// Create from config
    #[must_use]
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            enabled: config.enabled,
            max_retries: config.max_retries,
            initial_backoff: config.initial_backoff,
            max_backoff: config.max_backoff,
            multiplier: config.multiplier,
            jitter: config.jitter,
        }
    }

    /// Create the delay sequence for one logical request
    ///
    /// Every delay is at most `max_backoff`, jittered or not.
    pub fn create_backoff(&self) -> impl Iterator<Item = Duration> + Send + use<> {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.initial_backoff)
            .with_max_delay(self.max_backoff)
            .with_factor(self.multiplier)
            .with_max_times(self.max_retries as usize);

        // backon adds jitter on top of the capped delay
        let backoff: ExponentialBackoff = if self.jitter {
            builder.with_jitter().build()
        } else {
            builder.build()
        };
        let cap = self.max_backoff;
        backoff.map(move |delay| delay.min(cap))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&RetryConfig::default())
    }
}

/// Execute a future with retry logic
///
/// # Errors
///
/// Returns the last error from `f` if all retry attempts are exhausted or
/// the error is not retryable.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, name: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if !policy.enabled {
        return f().await;
    }

    let mut backoff = policy.create_backoff();
    let mut attempts = 0u32;

    loop {
        attempts += 1;

        match f().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !is_retryable(&e) {
                    return Err(e);
                }

                let Some(delay) = backoff.next() else {
                    warn!(
                        operation = name,
                        attempts = attempts,
                        error = %e,
                        "Retry attempts exhausted"
                    );
                    return Err(e);
                };

                debug!(
                    operation = name,
                    attempt = attempts,
                    delay_ms = delay.as_millis(),
                    error = %e,
                    "Retrying after backoff"
                );
                sleep(delay).await;
            }
        }
    }
}

/// Check if an error is retryable
fn is_retryable(error: &Error) -> bool {
    error.is_server_error()
}

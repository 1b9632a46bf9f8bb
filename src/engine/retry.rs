//! Exponential backoff for units of work that lost a race on the store.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::{OrderError, Result};

#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Single attempt, no backoff.
    pub fn none() -> Self {
        Self { max_attempts: 1, ..Self::default() }
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        delay.mul_f64(self.multiplier).min(self.max_delay)
    }
}

/// Runs `operation` until it succeeds, fails with a non-transient error, or
/// runs out of attempts. Contention left over after the last attempt is
/// reported as a storage error.
pub async fn retry_transient<F, Fut, T>(config: &RetryConfig, op: &'static str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(op, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_transient() && attempt < config.max_attempts => {
                tracing::warn!(op, attempt, error = %err, delay_ms = delay.as_millis() as u64, "transient failure, retrying");
                sleep(delay).await;
                delay = config.next_delay(delay);
            }
            Err(OrderError::Contention(msg)) => {
                tracing::error!(op, attempt, error = %msg, "contention persisted after all attempts");
                return Err(OrderError::Persistence(format!("gave up after {attempt} attempts: {msg}")));
            }
            Err(err) => return Err(err),
        }
    }
}

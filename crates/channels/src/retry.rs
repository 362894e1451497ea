//! Bounded retry for transport-level failures.

use crate::error::{Error, Result};
use std::thread;
use std::time::Duration;

/// Retry settings for a single HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first one)
    pub max_attempts: u32,
    /// Delay between attempts, multiplied by the attempt number
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryConfig {
    /// Create a config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay before the attempt following `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay * (attempt + 1)
    }
}

/// Execute an operation, retrying retryable errors up to `max_attempts` times.
///
/// Non-retryable errors are returned immediately.
pub fn with_retry<T, F>(config: &RetryConfig, mut operation: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut last_error: Option<Error> = None;

    for attempt in 0..config.max_attempts {
        match operation() {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !e.is_retryable() {
                    return Err(e);
                }

                if attempt + 1 >= config.max_attempts {
                    last_error = Some(e);
                    break;
                }

                let delay = config.delay_for_attempt(attempt);
                log::debug!(
                    "Attempt {}/{} failed: {}. Retrying in {:?}",
                    attempt + 1,
                    config.max_attempts,
                    e,
                    delay
                );
                thread::sleep(delay);
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::Other("retry exhausted".to_string())))
}

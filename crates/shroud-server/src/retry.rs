//! Bounded retry with exponential backoff at the store boundary.

use std::time::Duration;

use shroud_core::Environment;

use crate::storage::StorageError;

/// Retry policy for store operations.
///
/// Only transient errors (`StorageError::Io`) are retried. Conflicts and
/// serialization errors are returned immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Backoff after the first failure
    pub initial_backoff: Duration,
    /// Upper bound on a single backoff
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(25),
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Backoff before attempt `failed + 1`, after `failed` failures.
    ///
    /// Doubles from `initial_backoff`, capped at `max_backoff`.
    pub fn backoff(&self, failed: u32) -> Duration {
        let exponent = failed.saturating_sub(1).min(31);
        self.initial_backoff.saturating_mul(1u32 << exponent).min(self.max_backoff)
    }

    /// Run `op` until it succeeds, fails non-transiently, or attempts run out.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: every attempt failed transiently
    /// - any non-transient error from `op`, unchanged
    pub async fn run<E, T, F>(&self, env: &E, mut op: F) -> Result<T, StorageError>
    where
        E: Environment,
        F: FnMut() -> Result<T, StorageError>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = self.backoff(attempt);
                    tracing::debug!(attempt, ?delay, error = %err, "store operation failed, retrying");
                    env.sleep(delay).await;
                },
                Err(err) if err.is_transient() => {
                    tracing::warn!(attempts = attempt, error = %err, "store unavailable, giving up");
                    return Err(StorageError::Unavailable {
                        attempts: attempt,
                        last_error: err.to_string(),
                    });
                },
                Err(err) => return Err(err),
            }
        }
    }
}

//! Bounded retry with exponential backoff for transient backend errors.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::StorageError;

/// Retry policy for storage requests.
#[derive(Debug, Clone)]
pub struct RetrySettings {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Backoff multiplier applied per retry.
    pub backoff_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            backoff_multiplier: 2.0,
        }
    }
}

/// Run `operation`, retrying transient failures per `settings`.
///
/// Only errors whose `is_retryable()` is true are retried; the final error
/// is returned unchanged so bucket/key context survives.
pub async fn with_retries<T, F, Fut>(
    settings: &RetrySettings,
    action: &str,
    mut operation: F,
) -> Result<T, StorageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    let mut backoff: Duration = settings.initial_backoff;
    let mut attempt: u32 = 1;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retryable() && attempt < settings.max_attempts => {
                warn!(
                    action,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    %error,
                    "transient storage error, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff = Duration::from_secs_f64(
                    backoff.as_secs_f64() * settings.backoff_multiplier,
                );
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

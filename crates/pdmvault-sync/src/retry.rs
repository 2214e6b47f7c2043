//! Retry and timeout helpers
//!
//! Retryable failures (`Io`, `Network`) are retried with exponential
//! backoff: base, 2×base, 4×base, ... Everything else is returned at once.

use std::future::Future;
use std::time::Duration;

use pdmvault_core::ports::CatalogError;
use pdmvault_core::EngineError;
use tracing::{info, warn};

/// Base delay for exponential backoff (1 second)
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// How often and how patiently to retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// No retries at all
    pub fn none() -> Self {
        Self::new(0)
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Executes an async operation, retrying retryable errors with backoff
pub async fn with_retry<F, Fut, T>(
    operation_name: &str,
    policy: RetryPolicy,
    f: F,
) -> Result<T, EngineError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(
                        operation = operation_name,
                        attempt, "Operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) if attempt < policy.max_retries && err.is_retryable() => {
                let delay = policy.delay(attempt);
                warn!(
                    operation = operation_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retryable error, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Bounds a future by `limit`, turning expiry into a retryable network error
pub async fn with_timeout<F, T>(operation_name: &str, limit: Duration, f: F) -> Result<T, EngineError>
where
    F: Future<Output = Result<T, EngineError>>,
{
    match tokio::time::timeout(limit, f).await {
        Ok(result) => result,
        Err(_) => {
            warn!(operation = operation_name, timeout_ms = limit.as_millis() as u64, "Operation timed out");
            Err(EngineError::timeout(operation_name))
        }
    }
}

/// How calls to the remote collaborators are bounded
///
/// Reads and content-addressed uploads are retried; conditional writes
/// are only bounded by the timeout, never re-issued blindly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallPolicy {
    pub retry: RetryPolicy,
    pub timeout: Duration,
}

impl CallPolicy {
    pub fn new(retry: RetryPolicy, timeout: Duration) -> Self {
        Self { retry, timeout }
    }

    /// Runs an idempotent remote call with timeout and retries
    pub async fn read<T, F, Fut>(&self, operation_name: &str, f: F) -> Result<T, EngineError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, CatalogError>>,
    {
        let f = &f;
        let limit = self.timeout;
        with_retry(operation_name, self.retry, move || async move {
            with_timeout(operation_name, limit, async move {
                f().await.map_err(EngineError::from)
            })
            .await
        })
        .await
    }

    /// Runs a conditional remote write once, bounded by the timeout
    pub async fn write<T, Fut>(&self, operation_name: &str, f: Fut) -> Result<T, EngineError>
    where
        Fut: Future<Output = Result<T, CatalogError>>,
    {
        with_timeout(operation_name, self.timeout, async move {
            f.await.map_err(EngineError::from)
        })
        .await
    }
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self::new(RetryPolicy::default(), Duration::from_secs(30))
    }
}

//! Bounded timeout retry
//!
//! A resolution gets at most one retry, only after a retryable error
//! (a timeout), and the retry runs with its own, shorter timeout. There is
//! no backoff between attempts: the whole sequence has to fit inside the
//! request deadline.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::ResolverConfig;
use crate::error::RetryableError;

/// Timeout budget per attempt
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Timeout of the first attempt
    pub primary_timeout: Duration,
    /// Timeout of the single retry, `None` disables it
    pub retry_timeout: Option<Duration>,
}

impl RetryPolicy {
    /// Create a policy from explicit timeouts
    pub fn new(primary_timeout: Duration, retry_timeout: Option<Duration>) -> Self {
        Self {
            primary_timeout,
            retry_timeout,
        }
    }

    /// Execute an async operation with the bounded retry
    ///
    /// `operation` receives the timeout of the current attempt.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: Fn(Duration) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError + std::fmt::Display,
    {
        let err = match operation(self.primary_timeout).await {
            Ok(result) => return Ok(result),
            Err(err) => err,
        };

        let retry_timeout = match self.retry_timeout {
            Some(timeout) if err.is_retryable() => timeout,
            _ => return Err(err),
        };

        debug!(
            retry_timeout_ms = retry_timeout.as_millis() as u64,
            error = %err,
            "Retrying after timeout"
        );

        operation(retry_timeout).await.map_err(|err| {
            warn!(attempts = 2, error = %err, "Retry exhausted");
            err
        })
    }
}

impl From<&ResolverConfig> for RetryPolicy {
    fn from(config: &ResolverConfig) -> Self {
        Self::new(config.timeout(), config.retry_timeout())
    }
}

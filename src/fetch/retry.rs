use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use super::FetchError;

/// What to do with a failed call.
///
/// A rate limit changes *timing* (sleep, retry); server overload
/// changes *future batch shape* (propagate so the batch controller can
/// shrink). Conflating the two either shrinks batches on transient
/// rate limits or retries forever against a genuinely overloaded
/// server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDirective {
    Delay(Duration),
    ShrinkBatch,
    Permanent,
}

#[derive(Debug, Error)]
pub enum RetryError {
    /// Overload must reach the caller without sleeping here.
    #[error("server overloaded")]
    Overloaded,
    #[error("retries exhausted: {0}")]
    Exhausted(FetchError),
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    base_delay: Duration,
    max_retries: u32,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(base_delay: Duration, max_retries: u32) -> Self {
        Self {
            base_delay,
            max_retries,
        }
    }

    /// Exponential backoff: `base * 2^attempt`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }

    /// Classify one failure given how many retries already happened.
    #[must_use]
    pub fn classify(&self, error: &FetchError, attempt: u32) -> RetryDirective {
        match error {
            FetchError::Overloaded => RetryDirective::ShrinkBatch,
            _ if attempt >= self.max_retries => RetryDirective::Permanent,
            FetchError::RateLimited { retry_after } => {
                RetryDirective::Delay(retry_after.unwrap_or_else(|| self.backoff(attempt)))
            }
            FetchError::Http { .. } | FetchError::Network(_) => {
                RetryDirective::Delay(self.backoff(attempt))
            }
        }
    }

    /// Drive `op` to completion under this policy.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) => match self.classify(&error, attempt) {
                    RetryDirective::Delay(delay) => {
                        warn!(attempt, ?delay, %error, "fetch failed, backing off");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    RetryDirective::ShrinkBatch => return Err(RetryError::Overloaded),
                    RetryDirective::Permanent => return Err(RetryError::Exhausted(error)),
                },
            }
        }
    }
}

//! Bounded retries with exponential backoff
//!
//! Only errors that report themselves as retryable are retried; everything
//! else surfaces on the first failure. Each attempt can carry its own
//! timeout, and an elapsed timeout counts as a retryable failure.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::warn;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (excluding the initial request).
    pub max_attempts: u32,
    /// Base delay for exponential backoff.
    pub base_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Whether to add up to 25% jitter to each delay.
    pub add_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            add_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that never retries.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default().with_max_attempts(0)
    }

    /// Set the maximum number of retry attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the base delay for exponential backoff.
    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the maximum delay between retries.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub fn with_jitter(mut self, enable: bool) -> Self {
        self.add_jitter = enable;
        self
    }

    /// Delay before retry number `attempt` (0-based).
    ///
    /// `base_delay * 2^attempt`, capped at `max_delay`, plus jitter when enabled.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt);
        let delay = self
            .base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        if !self.add_jitter {
            return delay;
        }

        let jitter_range = delay.as_millis() as u64 / 4;
        if jitter_range == 0 {
            return delay;
        }
        // Sub-second wall-clock nanos are good enough to spread retries
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as u64;
        delay + Duration::from_millis(nanos % jitter_range)
    }
}

/// Retry policy that determines whether to retry a request.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a new retry policy with the given configuration.
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Get the delay before the next retry attempt.
    #[must_use]
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        self.config.delay_for_attempt(attempt)
    }

    /// Check if more retries are allowed.
    #[must_use]
    pub fn can_retry(&self, attempt: u32) -> bool {
        attempt < self.config.max_attempts
    }

    /// Get the retry configuration.
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

/// Trait for errors that can indicate whether they're retryable.
pub trait RetryableError {
    /// Returns true if this error is retryable.
    fn is_retryable(&self) -> bool;
}

/// Execute an async operation with retry logic.
pub async fn with_retry<F, Fut, T, E>(config: RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError,
{
    let policy = RetryPolicy::new(config);
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                if !err.is_retryable() || !policy.can_retry(attempt) {
                    return Err(err);
                }

                let delay = policy.retry_delay(attempt);
                warn!(
                    attempt = attempt + 1,
                    max_attempts = policy.config().max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after transient error"
                );

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Like [`with_retry`], with every attempt bounded by `attempt_timeout`.
///
/// A timed-out attempt is converted into `E` and retried like any other
/// retryable failure.
pub async fn with_retry_and_timeout<F, Fut, T, E>(
    config: RetryConfig,
    attempt_timeout: Duration,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError + From<tokio::time::error::Elapsed>,
{
    with_retry(config, || {
        let attempt = operation();
        async move {
            match timeout(attempt_timeout, attempt).await {
                Ok(result) => result,
                Err(elapsed) => Err(E::from(elapsed)),
            }
        }
    })
    .await
}

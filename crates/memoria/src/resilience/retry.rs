//! Retry with exponential backoff
//!
//! A memoized computation configured with `retry_count = n` runs at most
//! `n + 1` times. The delay before retry `k` (1-based) is
//! `backoff × 2^(k−1)`, so three retries with a two second backoff wait
//! 2s, 4s and 8s. Only the final failure is reported to callers.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, instrument, warn};

/// Backoff strategy for calculating retry delays
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffStrategy {
    /// Retry immediately
    None,
    /// Exponential backoff: `initial_delay * base^retry`
    Exponential { initial_delay: Duration, base: f64 },
}

impl BackoffStrategy {
    /// Calculate the delay before retry number `retry` (0-based)
    #[must_use]
    pub fn calculate_delay(&self, retry: u32) -> Duration {
        match self {
            Self::None => Duration::ZERO,
            Self::Exponential { initial_delay, base } => {
                let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
                let seconds = initial_delay.as_secs_f64() * base.powi(exponent);
                Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
            }
        }
    }
}

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Backoff strategy for calculating delays
    pub backoff: BackoffStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 1, backoff: BackoffStrategy::None }
    }
}

impl RetryConfig {
    /// Doubling backoff starting at `backoff_in_seconds`
    ///
    /// Negative or non-finite backoffs are treated as zero; parameter
    /// validation rejects them before a façade is built.
    #[must_use]
    pub fn from_backoff_seconds(retry_count: u32, backoff_in_seconds: f64) -> Self {
        let initial_delay = Duration::try_from_secs_f64(backoff_in_seconds).unwrap_or_default();
        let backoff = if initial_delay.is_zero() {
            BackoffStrategy::None
        } else {
            BackoffStrategy::Exponential { initial_delay, base: 2.0 }
        };
        Self { max_attempts: retry_count.saturating_add(1), backoff }
    }
}

/// The last error after every attempt failed
#[derive(Debug)]
pub struct RetryExhausted<E> {
    /// Attempts made, including the first
    pub attempts: u32,
    /// Error from the final attempt
    pub last_error: E,
}

/// Runs an operation until it succeeds or attempts run out
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Create a new retry executor with the given configuration
    #[must_use]
    pub const fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Execute an async operation with retry logic, sleeping on the runtime
    ///
    /// # Errors
    ///
    /// Returns [`RetryExhausted`] with the last error once every attempt failed.
    #[instrument(skip(self, operation), fields(max_attempts = self.config.max_attempts))]
    pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> Result<T, RetryExhausted<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("Operation succeeded after {} retries", attempt - 1);
                    }
                    return Ok(value);
                }
                Err(error) => match self.next_delay(attempt, &error) {
                    Some(delay) => {
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => return Err(RetryExhausted { attempts: attempt, last_error: error }),
                },
            }
        }
    }

    /// Execute a blocking operation with retry logic, sleeping the thread
    ///
    /// # Errors
    ///
    /// Returns [`RetryExhausted`] with the last error once every attempt failed.
    #[instrument(skip(self, operation), fields(max_attempts = self.config.max_attempts))]
    pub fn execute_blocking<F, T, E>(&self, mut operation: F) -> Result<T, RetryExhausted<E>>
    where
        F: FnMut() -> Result<T, E>,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match operation() {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("Operation succeeded after {} retries", attempt - 1);
                    }
                    return Ok(value);
                }
                Err(error) => match self.next_delay(attempt, &error) {
                    Some(delay) => {
                        std::thread::sleep(delay);
                        attempt += 1;
                    }
                    None => return Err(RetryExhausted { attempts: attempt, last_error: error }),
                },
            }
        }
    }

    fn next_delay<E: std::fmt::Display>(&self, attempt: u32, error: &E) -> Option<Duration> {
        if attempt >= self.config.max_attempts {
            if self.config.max_attempts > 1 {
                warn!("All retry attempts exhausted after {} tries, last error: {}", attempt, error);
            }
            return None;
        }
        let delay = self.config.backoff.calculate_delay(attempt - 1);
        warn!("Operation failed (attempt {}), retrying after {:?}: {}", attempt, delay, error);
        Some(delay)
    }
}

//! Retry policy implementation with fixed and exponential backoff.
//!
//! This module provides configurable retry strategies for handling
//! transient failures, plus an async driver that runs an operation under a
//! policy as a bounded loop with an explicit attempt counter.
//!
//! # Example
//!
//! ```
//! use stagelink_core::retry::{BackoffStrategy, RetryConfig, RetryPolicy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new(
//!     RetryConfig::default()
//!         .with_max_attempts(Some(3))
//!         .with_initial_delay(Duration::from_millis(100))
//!         .with_backoff(BackoffStrategy::Exponential { multiplier: 2.0 }),
//! );
//!
//! assert_eq!(policy.delay_for(1), Duration::from_millis(100));
//! assert_eq!(policy.delay_for(2), Duration::from_millis(200));
//! ```

#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_truncation)]

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BackoffStrategy {
    /// Fixed delay between retries.
    Fixed,
    /// Exponential increase: delay = initial * (multiplier ^ (attempt - 1)).
    Exponential {
        /// Multiplier for each retry (typically 2.0).
        multiplier: f64,
    },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Fixed
    }
}

/// Configuration for retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (`None` = unlimited).
    pub max_attempts: Option<u32>,
    /// Initial delay before the first retry.
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Backoff strategy to use.
    #[serde(default)]
    pub backoff: BackoffStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff: BackoffStrategy::Fixed,
        }
    }
}

impl RetryConfig {
    /// Sets the maximum number of retry attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Retry policy for handling transient failures.
///
/// The policy calculates delays between retry attempts using the configured
/// backoff strategy and bounds the number of attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Creates a new retry policy with the given configuration.
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Creates a policy that retries indefinitely with a fixed one second
    /// delay, the default for design fetches.
    #[must_use]
    pub fn indefinite() -> Self {
        Self::new(RetryConfig::default())
    }

    /// Returns the maximum number of retries, if bounded.
    #[must_use]
    pub fn max_attempts(&self) -> Option<u32> {
        self.config.max_attempts
    }

    /// Returns true if the given number of completed attempts permits
    /// another retry.
    #[must_use]
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.config.max_attempts.map_or(true, |max| attempt < max)
    }

    /// Calculates the delay before the given retry attempt (1-indexed).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let initial_ms = self.config.initial_delay.as_millis() as f64;
        let delay_ms = match self.config.backoff {
            BackoffStrategy::Fixed => initial_ms,
            BackoffStrategy::Exponential { multiplier } => {
                initial_ms * multiplier.powi(attempt as i32 - 1)
            }
        };

        Duration::from_millis(delay_ms as u64).min(self.config.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::indefinite()
    }
}

/// Runs `operation` under `policy`, sleeping between attempts.
///
/// `is_retryable` classifies failures: a non-retryable error is returned
/// immediately without consuming the retry budget.
///
/// # Errors
///
/// Returns the last error once the policy's attempt budget is exhausted or a
/// non-retryable error occurs.
pub async fn retry<T, E, F, Fut, R>(
    policy: &RetryPolicy,
    mut operation: F,
    mut is_retryable: R,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    R: FnMut(&E) -> bool,
{
    let mut attempt: u32 = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if !is_retryable(&error) || !policy.should_retry(attempt) {
                    return Err(error);
                }
                attempt = attempt.saturating_add(1);
                let delay = policy.delay_for(attempt);
                debug!(
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retrying after failure"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

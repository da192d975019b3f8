//! Retry policies for on-demand channels.

use std::fmt::Debug;
use std::time::Duration;

use crate::error::ClientError;

/// Decides whether a failed operation is tried again on a fresh channel.
///
/// Only called for errors where [`ClientError::is_retryable`] holds.
/// `attempt` counts failures so far and starts at 1.
pub trait RetryPolicy: Debug + Send + Sync {
    /// Delay before the next attempt, or `None` to give up.
    fn next_delay(&self, attempt: u32, error: &ClientError) -> Option<Duration>;
}

/// Never retries.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn next_delay(&self, _attempt: u32, _error: &ClientError) -> Option<Duration> {
        None
    }
}

/// Retries up to `max_retries` times with a constant delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedRetry {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for FixedRetry {
    /// One immediate retry.
    fn default() -> Self {
        Self {
            max_retries: 1,
            delay: Duration::ZERO,
        }
    }
}

impl FixedRetry {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }
}

impl RetryPolicy for FixedRetry {
    fn next_delay(&self, attempt: u32, _error: &ClientError) -> Option<Duration> {
        (attempt <= self.max_retries).then_some(self.delay)
    }
}

/// Retries with exponentially growing delays, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialBackoff {
    /// Delay before the first retry.
    pub initial: Duration,
    /// Upper bound for any delay.
    pub max: Duration,
    /// Growth factor between retries.
    pub multiplier: f64,
    pub max_retries: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(10),
            multiplier: 2.0,
            max_retries: 5,
        }
    }
}

impl ExponentialBackoff {
    /// Builder: set the initial delay.
    pub fn with_initial(mut self, initial: Duration) -> Self {
        self.initial = initial;
        self
    }

    /// Builder: set the maximum delay.
    pub fn with_max(mut self, max: Duration) -> Self {
        self.max = max;
        self
    }

    /// Builder: set the multiplier. Values below 1.0 are raised to 1.0.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    /// Builder: set the retry limit.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Delay before retry number `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base = self.initial.as_secs_f64();
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let delay = base * self.multiplier.powi(exponent);
        let max = self.max.as_secs_f64();

        Duration::from_secs_f64(delay.min(max))
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32, _error: &ClientError) -> Option<Duration> {
        (attempt <= self.max_retries).then(|| self.delay(attempt))
    }
}

//! Retry policies for the driver loop

use std::fmt;
use std::time::Duration;

/// Decides how long to wait before re-invoking a failed step
///
/// `attempt` counts consecutive failures, starting at 1. Returning `None`
/// gives up and the target is marked failed.
pub trait RetryPolicy: Send + Sync + fmt::Debug {
    fn next_delay(&self, attempt: u32) -> Option<Duration>;
}

/// Wait the same interval between attempts
#[derive(Debug, Clone)]
pub struct FixedInterval {
    pub interval: Duration,
    /// Maximum number of attempts (0 = infinite)
    pub max_attempts: u32,
}

impl FixedInterval {
    /// Retry forever every `interval`
    pub fn forever(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: 0,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }
}

impl Default for FixedInterval {
    fn default() -> Self {
        Self::forever(Duration::from_secs(5))
    }
}

impl RetryPolicy for FixedInterval {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if self.max_attempts > 0 && attempt >= self.max_attempts {
            return None;
        }
        Some(self.interval)
    }
}

/// Exponential backoff, capped at `max_delay`
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Maximum number of attempts (0 = infinite)
    pub max_attempts: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            max_attempts: 0,
        }
    }
}

impl ExponentialBackoff {
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if self.max_attempts > 0 && attempt >= self.max_attempts {
            return None;
        }
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Some(Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64())))
    }
}

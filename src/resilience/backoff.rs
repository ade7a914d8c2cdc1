//! Backoff policy
//!
//! Pure computation of the next retry state. No clocks, no side effects.

use std::time::Duration;

/// Remaining retry budget and the delay before the next attempt
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryState {
    remaining: u32,
    delay: Duration,
    factor: f64,
}

impl RetryState {
    /// Create a retry state. Factors below 1 (or not finite) are treated as 1,
    /// so delays never shrink.
    pub fn new(remaining: u32, delay: Duration, factor: f64) -> Self {
        let factor = if factor.is_finite() && factor >= 1.0 {
            factor
        } else {
            1.0
        };
        Self {
            remaining,
            delay,
            factor,
        }
    }

    /// Same delay before every retry
    pub fn constant(remaining: u32, delay: Duration) -> Self {
        Self::new(remaining, delay, 1.0)
    }

    /// Delay doubles after every retry
    pub fn exponential(remaining: u32, delay: Duration) -> Self {
        Self::new(remaining, delay, 2.0)
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }
}

impl Default for RetryState {
    /// 2 retries, 1s apart
    fn default() -> Self {
        Self::constant(2, Duration::from_millis(1000))
    }
}

/// Result of advancing a retry state
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    Next(RetryState),
    Exhausted,
}

/// Derives successive retry states
pub struct BackoffPolicy;

impl BackoffPolicy {
    /// `remaining == 0` is exhausted; otherwise one fewer retry and the delay
    /// scaled by the factor.
    pub fn next(state: RetryState) -> Backoff {
        if state.remaining == 0 {
            return Backoff::Exhausted;
        }
        let scaled = state.delay.as_secs_f64() * state.factor;
        let delay = Duration::try_from_secs_f64(scaled).unwrap_or(Duration::MAX);
        Backoff::Next(RetryState {
            remaining: state.remaining - 1,
            delay,
            factor: state.factor,
        })
    }
}

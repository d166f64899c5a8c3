//! Backoff policies and injectable waiting
//!
//! Policies are pure: `next_delay(attempt)` depends only on the attempt
//! index, so schedules are testable without sleeping.

use std::time::Duration;

/// Computes the wait before the next attempt
pub trait BackoffPolicy: Send + Sync {
    /// Wait after the zero-based `attempt` failed (or polled empty)
    fn next_delay(&self, attempt: u32) -> Duration;
}

/// Exponential backoff with Fibonacci-growing exponents
///
/// Waits 2, 4, 8, 32, 256... seconds: the exponent follows 1, 2, 3, 5, 8...
/// Each wait is capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    pub max_delay: Duration,
}

impl ExponentialBackoff {
    pub fn new(max_delay: Duration) -> Self {
        Self { max_delay }
    }

    /// Exponent for `attempt`, `None` once it no longer fits in a u64 shift
    fn exponent(attempt: u32) -> Option<u32> {
        let (mut previous, mut current) = (1u32, 1u32);
        for _ in 0..attempt {
            let next = previous.checked_add(current).filter(|n| *n < 64)?;
            previous = current;
            current = next;
        }
        Some(current)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Duration {
        match Self::exponent(attempt) {
            Some(exponent) => Duration::from_secs(1u64 << exponent).min(self.max_delay),
            None => self.max_delay,
        }
    }
}

/// Linearly growing waits: `initial + increment * attempt`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearBackoff {
    pub initial: Duration,
    pub increment: Duration,
}

impl LinearBackoff {
    pub fn new(initial: Duration, increment: Duration) -> Self {
        Self { initial, increment }
    }
}

impl Default for LinearBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_secs(5))
    }
}

impl BackoffPolicy for LinearBackoff {
    fn next_delay(&self, attempt: u32) -> Duration {
        self.initial
            .saturating_add(self.increment.saturating_mul(attempt))
    }
}

/// Blocks the current thread between attempts
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Real blocking sleep
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

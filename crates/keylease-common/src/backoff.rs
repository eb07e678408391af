// Exponential backoff policy for lock acquisition retries

use std::time::Duration;

/// Growth factor applied between two consecutive delays
pub const DEFAULT_FACTOR: u32 = 2;

/// The maximum delay is this multiple of the initial delay
pub const DEFAULT_MAX_MULTIPLIER: u32 = 10;

/// Exponential backoff: `initial`, then `previous * factor`, clamped at `max`.
///
/// The sequence is non-decreasing and bounded, and fully determined by the
/// number of calls to [`next_backoff`](Self::next_backoff).
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    factor: u32,
    attempt: u32,
}

impl ExponentialBackoff {
    /// Backoff doubling from `initial` up to `10 × initial`
    pub fn new(initial: Duration) -> Self {
        Self::with_limits(
            initial,
            initial.saturating_mul(DEFAULT_MAX_MULTIPLIER),
            DEFAULT_FACTOR,
        )
    }

    pub fn with_limits(initial: Duration, max: Duration, factor: u32) -> Self {
        Self {
            initial,
            max: max.max(initial),
            factor: factor.max(1),
            attempt: 0,
        }
    }

    pub fn initial(&self) -> Duration {
        self.initial
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Next delay in the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let next = self.delay_for_attempt(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        next
    }

    /// Delay before retry number `attempt` (zero-based), without advancing
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let mut delay = self.initial;
        for _ in 0..attempt {
            if delay >= self.max {
                break;
            }
            delay = delay.saturating_mul(self.factor).min(self.max);
        }
        delay
    }

    /// Restart the sequence from the initial delay
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        Some(self.next_backoff())
    }
}

//! Exponential reconnection backoff.

use std::time::Duration;

/// Upper bound for a single reconnection delay, in seconds.
pub const MAX_BACKOFF_SECS: u64 = 64;

/// Reconnection attempt counter.
///
/// The delay for attempt `n` is `min(64, 2^n)` seconds. The counter only
/// moves forward through [`Backoff::next_delay`] and goes back to zero
/// through [`Backoff::reset`], which the manager calls on a successful open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Backoff {
    attempt: u32,
}

impl Backoff {
    /// Delay for a given attempt number.
    #[must_use]
    pub fn delay_for_attempt(attempt: u32) -> Duration {
        // 2^6 already reaches the cap; clamping the shift keeps it from overflowing.
        let secs = 1_u64 << attempt.min(6);
        Duration::from_secs(secs.min(MAX_BACKOFF_SECS))
    }

    /// Number of reconnections scheduled since the last successful open.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay for the current attempt; advances the counter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = Self::delay_for_attempt(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Back to attempt zero.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

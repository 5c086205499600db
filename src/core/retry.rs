//! Exponential backoff retry policy.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Outcome of consulting the policy after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Reschedule the task for this instant.
    RetryAt(DateTime<Utc>),
    /// Attempts are exhausted; the task stays `Failed`.
    Exhausted,
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts allowed before a task is terminally failed.
    pub max_attempts: u32,
    /// Delay before the first retry; doubled for every further attempt.
    pub base_delay: Duration,
}

/// Exponent ceiling; `2^20` times any sane base delay is already years.
const MAX_EXPONENT: u32 = 20;

impl RetryPolicy {
    /// Create a policy.
    #[must_use]
    pub const fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// `base_delay * 2^exponent`, saturating instead of overflowing.
    #[must_use]
    pub fn backoff(&self, exponent: u32) -> Duration {
        let factor = 1_u32 << exponent.min(MAX_EXPONENT);
        self.base_delay.saturating_mul(factor)
    }

    /// Decide what happens after a failure, given the attempt count *after* the
    /// failed attempt was recorded.
    ///
    /// The first failure waits `base_delay`, the second `2 * base_delay`, and so on.
    /// A retry time past the end of the calendar saturates; it never exhausts the task.
    #[must_use]
    pub fn decide(&self, attempts: u32, now: DateTime<Utc>) -> RetryDecision {
        if attempts >= self.max_attempts {
            return RetryDecision::Exhausted;
        }
        let delay = self.backoff(attempts.saturating_sub(1));
        let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
        RetryDecision::RetryAt(
            now.checked_add_signed(delay)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        )
    }

    /// Whether another attempt is allowed after `attempts` attempts.
    #[must_use]
    pub const fn has_attempts_left(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(5 * 60))
    }
}

//! Bounded retry schedule for webhook delivery.
//!
//! A fixed attempt budget with an explicit delay table. When more attempts
//! are configured than delays, the last delay is reused.

use std::time::Duration;

use crate::error::ProvisioningError;

/// Default number of attempts, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delays slept after attempt 1, 2, 3, ...
pub const DEFAULT_RETRY_DELAYS: [Duration; 3] =
    [Duration::from_secs(1), Duration::from_secs(5), Duration::from_secs(15)];

/// Retry policy for provisioning webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts per lifecycle (including the first).
    pub max_attempts: u32,

    /// Delay slept after the attempt with the same index fails.
    pub delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: DEFAULT_MAX_ATTEMPTS, delays: DEFAULT_RETRY_DELAYS.to_vec() }
    }
}

/// Result of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for `delay`, then make the next attempt.
    Retry {
        /// Backoff before the next attempt
        delay: Duration,
    },
    /// Stop and record the failure.
    GiveUp {
        /// Why no further attempt is made
        reason: String,
    },
}

impl RetryPolicy {
    /// Creates a policy from an attempt budget and a delay table.
    pub fn new(max_attempts: u32, delays: Vec<Duration>) -> Self {
        Self { max_attempts, delays }
    }

    /// Backoff slept after the attempt at `attempt_index` (0-based) fails.
    pub fn delay_after(&self, attempt_index: u32) -> Duration {
        usize::try_from(attempt_index)
            .ok()
            .and_then(|index| self.delays.get(index))
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    /// Total backoff slept by a lifecycle that uses every attempt.
    pub fn total_backoff(&self) -> Duration {
        (0..self.max_attempts.saturating_sub(1)).map(|index| self.delay_after(index)).sum()
    }

    /// Whether `attempt_index` (0-based) is the last one the budget allows.
    pub fn is_last_attempt(&self, attempt_index: u32) -> bool {
        attempt_index.saturating_add(1) >= self.max_attempts
    }

    /// Decides whether to retry after the attempt at `attempt_index` failed.
    pub fn decide(&self, attempt_index: u32, error: &ProvisioningError) -> RetryDecision {
        if !error.is_retryable() {
            return RetryDecision::GiveUp { reason: format!("non-retryable error: {error}") };
        }

        if self.is_last_attempt(attempt_index) {
            return RetryDecision::GiveUp {
                reason: format!("maximum attempts ({}) exhausted", self.max_attempts),
            };
        }

        RetryDecision::Retry { delay: self.delay_after(attempt_index) }
    }
}

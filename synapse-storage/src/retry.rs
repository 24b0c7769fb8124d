//! Retry policy for transient storage failures.

use std::time::Duration;

/// Bounded exponential backoff applied to transient errors only.
///
/// Validation and state errors are never retried; `StorageFull` is fatal.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: usize,
    /// Delay before the first retry; doubles per attempt
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before the given retry attempt (1-based).
    pub fn delay_for(&self, attempt: usize) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1) as u32)
    }
}

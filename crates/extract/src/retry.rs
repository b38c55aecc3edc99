use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded exponential backoff for re-prompting the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    max_retries: usize,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, 500, 8000)
    }
}

impl RetryPolicy {
    pub fn new(max_retries: usize, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::from_millis(initial_backoff_ms),
            max_backoff: Duration::from_millis(max_backoff_ms),
        }
    }

    /// Retries without waiting between attempts
    pub fn immediate(max_retries: usize) -> Self {
        Self::new(max_retries, 0, 0)
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    /// Total number of model calls this policy allows
    pub fn max_attempts(&self) -> usize {
        self.max_retries + 1
    }

    /// Delay before retry number `retry` (1-based), doubling each time up to the cap
    pub fn backoff(&self, retry: usize) -> Duration {
        let mut backoff = self.initial_backoff;
        for _ in 1..retry {
            backoff = std::cmp::min(backoff * 2, self.max_backoff);
        }
        std::cmp::min(backoff, self.max_backoff)
    }
}

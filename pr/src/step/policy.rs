//! Retry policy of a step

use std::time::Duration;

use crate::config::StepConfig;

/// Timeout, retry and backoff settings for one step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepPolicy {
    /// Upper bound on one attempt
    pub timeout: Duration,
    /// Additional attempts after the first
    pub retries: u32,
    /// Delay before the second attempt; doubles for each later one
    pub backoff: Duration,
}

impl Default for StepPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            retries: 0,
            backoff: Duration::from_millis(20),
        }
    }
}

impl StepPolicy {
    pub fn new(timeout: Duration, retries: u32, backoff: Duration) -> Self {
        Self {
            timeout,
            retries,
            backoff,
        }
    }

    /// Total attempts allowed
    pub fn attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Delay after attempt `attempt` (1-based) fails, before the next one
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.backoff.saturating_mul(1_u32 << exponent)
    }
}

impl From<&StepConfig> for StepPolicy {
    fn from(step: &StepConfig) -> Self {
        Self {
            timeout: Duration::from_millis(step.timeout_ms),
            retries: step.retries,
            backoff: Duration::from_millis(step.backoff_ms),
        }
    }
}

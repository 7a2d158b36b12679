//! Automatic retry budget for a playback session

use std::time::Duration;

use streamflow_core::config::{BackoffKind, PlayerConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub backoff: BackoffKind,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(max_retries: u32, base_delay: Duration, backoff: BackoffKind) -> Self {
        Self {
            max_retries,
            base_delay,
            backoff,
        }
    }

    #[must_use]
    pub const fn from_config(config: &PlayerConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.retry_delay_ms),
            config.backoff,
        )
    }

    /// Whether retry number `attempt` (1-based) is still within budget.
    #[must_use]
    pub const fn allows(&self, attempt: u32) -> bool {
        attempt >= 1 && attempt <= self.max_retries
    }

    /// Delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            BackoffKind::Fixed => self.base_delay,
            BackoffKind::Linear => self.base_delay.saturating_mul(attempt.max(1)),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&PlayerConfig::default())
    }
}

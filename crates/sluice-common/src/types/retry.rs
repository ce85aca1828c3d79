//! Retry policy shared by the uploader and the source adapters

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default maximum delivery attempts per batch
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default base backoff delay in milliseconds
pub const DEFAULT_BASE_DELAY_MS: u64 = 500;

/// Default backoff delay cap in milliseconds
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Bounded exponential backoff policy.
///
/// The first retry waits `base_delay_ms`, each subsequent retry doubles
/// the wait up to `max_delay_ms`, and the operation is attempted at
/// most `max_attempts` times in total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}

fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

impl RetryConfig {
    /// Backoff delay before retrying after the given failed attempt
    /// (1-based). Doubles per attempt, capped at `max_delay_ms`.
    pub fn delay_after_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let delay = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }

    /// Whether another attempt is allowed after `attempt` failures
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

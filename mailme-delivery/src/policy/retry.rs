//! Retry policy for delivery operations.

use std::time::Duration;

use mailme_common::ConfigError;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Retry configuration for a single notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of delivery attempts, the first one included.
    ///
    /// Default: 3 attempts
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Base delay for exponential backoff (in milliseconds).
    ///
    /// The delay before attempt `n + 1` is `base * 2^(n - 1)`.
    ///
    /// Default: 1000 ms
    #[serde(default = "defaults::base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum retry delay (in milliseconds).
    ///
    /// Default: 10000 ms
    #[serde(default = "defaults::max_delay_ms")]
    pub max_delay_ms: u64,

    /// Jitter factor; each delay is randomized within ±`jitter_factor`.
    ///
    /// Default: 0.1 (±10%)
    #[serde(default = "defaults::jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::max_attempts(),
            base_delay_ms: defaults::base_delay_ms(),
            max_delay_ms: defaults::max_delay_ms(),
            jitter_factor: defaults::jitter_factor(),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that retries immediately, mostly useful in tests.
    #[must_use]
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter_factor: 0.0,
        }
    }

    /// Rejects a jitter factor outside `0.0..=1.0`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::InvalidValue {
                field: "retry.jitter_factor",
                reason: format!(
                    "must be between 0.0 and 1.0, got {}",
                    self.jitter_factor
                ),
            });
        }
        Ok(())
    }

    /// Get the number of remaining attempts.
    #[must_use]
    pub const fn remaining_attempts(&self, attempt_count: u32) -> u32 {
        self.max_attempts.saturating_sub(attempt_count)
    }

    /// Check if attempt number `attempt` (1-based) is the last one allowed.
    #[must_use]
    pub const fn is_final_attempt(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        backoff_delay(
            attempt,
            self.base_delay_ms,
            self.max_delay_ms,
            self.jitter_factor,
        )
    }
}

/// Exponential backoff with jitter:
/// `min(base * 2^(attempt - 1), max_delay) * (1 ± jitter)`.
pub fn backoff_delay(attempt: u32, base_delay_ms: u64, max_delay_ms: u64, jitter_factor: f64) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let delay = if exponent >= 63 {
        max_delay_ms
    } else {
        base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(max_delay_ms)
    };

    #[allow(clippy::cast_precision_loss)]
    let jitter_range = (delay as f64) * jitter_factor;

    // The sampled range spans twice the jitter; it must stay finite for `random_range`
    if delay == 0 || jitter_range <= 0.0 || !(jitter_range * 2.0).is_finite() {
        return Duration::from_millis(delay);
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    let jittered = {
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
        ((delay as f64) + jitter).max(0.0) as u64
    };

    Duration::from_millis(jittered)
}

mod defaults {
    pub const fn max_attempts() -> u32 {
        3
    }

    pub const fn base_delay_ms() -> u64 {
        1000
    }

    pub const fn max_delay_ms() -> u64 {
        10_000
    }

    pub const fn jitter_factor() -> f64 {
        0.1
    }
}

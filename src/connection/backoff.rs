//! Exponential reconnect backoff
//!
//! Delay before retry `n` (1-based) is `base × 2^(n-1)`, stretched by a
//! multiplicative jitter factor in `[1, 1 + jitter_ratio)` and clamped to
//! `max_delay_ms`. With `jitter_ratio < 1` the jittered delay for attempt `n`
//! never exceeds the un-jittered delay for attempt `n + 1`, so successive
//! delays are non-decreasing whatever the random draw.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reconnection backoff parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay before the first retry, in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound for any single delay, in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Maximum multiplicative jitter, must be in `[0, 1)`
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
    /// A session that survives this long resets the attempt counter
    #[serde(default = "default_stable_connection_secs")]
    pub stable_connection_secs: u64,
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    32_000
}

fn default_jitter_ratio() -> f64 {
    0.2
}

fn default_stable_connection_secs() -> u64 {
    20
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ratio: default_jitter_ratio(),
            stable_connection_secs: default_stable_connection_secs(),
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry `attempt` for a given jitter draw `unit` in `[0, 1)`
    pub fn delay_with_jitter(&self, attempt: u32, unit: f64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let uncapped = self.base_delay_ms.saturating_mul(1u64 << exponent);
        let factor = 1.0 + self.jitter_ratio * unit.clamp(0.0, 1.0);
        let jittered = (uncapped as f64 * factor).floor() as u64;
        Duration::from_millis(jittered.min(self.max_delay_ms))
    }

    pub fn stable_connection(&self) -> Duration {
        Duration::from_secs(self.stable_connection_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.base_delay_ms == 0 {
            return Err("base_delay_ms must be greater than 0".to_string());
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err("max_delay_ms must be at least base_delay_ms".to_string());
        }
        if !(0.0..1.0).contains(&self.jitter_ratio) {
            return Err("jitter_ratio must be in [0, 1)".to_string());
        }
        Ok(())
    }
}

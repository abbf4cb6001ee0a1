//! Reconnect policy for the relay connection.
//!
//! The relay retries transport failures a bounded number of times with a
//! fixed delay between attempts. There is no backoff growth and no jitter:
//! each retry waits exactly [`ReconnectConfig::delay`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default number of automatic reconnect attempts.
pub const DEFAULT_RECONNECTION_ATTEMPTS: u32 = 5;
/// Default delay between attempts in milliseconds.
pub const DEFAULT_RECONNECTION_DELAY_MS: u64 = 1000;

/// Bounded, fixed-delay reconnect parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectConfig {
    /// Automatic attempts after a failure before giving up (default: 5).
    #[serde(default = "default_attempts")]
    pub max_attempts: u32,
    /// Delay before each attempt in ms (default: 1000).
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

fn default_attempts() -> u32 {
    DEFAULT_RECONNECTION_ATTEMPTS
}
fn default_delay_ms() -> u64 {
    DEFAULT_RECONNECTION_DELAY_MS
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RECONNECTION_ATTEMPTS,
            delay_ms: DEFAULT_RECONNECTION_DELAY_MS,
        }
    }
}

impl ReconnectConfig {
    /// Delay to wait before every attempt.
    #[must_use]
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Next attempt number after `attempts_made` retries, or `None` once the
    /// budget is spent.
    #[must_use]
    pub fn next_attempt(&self, attempts_made: u32) -> Option<u32> {
        (attempts_made < self.max_attempts).then(|| attempts_made + 1)
    }
}

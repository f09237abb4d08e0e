//! Retry configuration for outbound calls.
//!
//! Provides linear backoff retry logic: attempt n waits n times the configured
//! backoff unit, without jitter and without a cap beyond the attempt count.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_ATTEMPTS: usize = 5;

/// Default backoff unit (1 second).
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

/// Retry configuration with linear backoff.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub struct RetryConfig {
    /// Number of retries after the first failed attempt (default: 5).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Backoff unit (default: "1s").
    /// Accepts human-readable durations like "500ms", "2s", "1m".
    #[serde(default = "default_backoff", with = "humantime_serde")]
    pub backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

impl RetryConfig {
    /// Creates a retry strategy yielding one delay per retry.
    ///
    /// Example sequence with the default 1s backoff:
    /// - Retry 1: 1s
    /// - Retry 2: 2s
    /// - Retry 3: 3s
    /// - Retry 4: 4s
    /// - Retry 5: 5s
    pub fn strategy(&self) -> impl Iterator<Item = Duration> + Send + 'static {
        let backoff = self.backoff;
        let attempts = u32::try_from(self.max_attempts).unwrap_or(u32::MAX);
        (1..=attempts).map(move |attempt| backoff.saturating_mul(attempt))
    }

    /// Merges flow-level retry config with app-level config.
    ///
    /// Flow-level config takes precedence over app-level.
    pub fn merge(app_level: &Option<RetryConfig>, flow_level: &Option<RetryConfig>) -> RetryConfig {
        match (app_level, flow_level) {
            (_, Some(flow_config)) => flow_config.clone(),
            (Some(app_config), None) => app_config.clone(),
            (None, None) => RetryConfig::default(),
        }
    }
}

fn default_max_attempts() -> usize {
    DEFAULT_MAX_ATTEMPTS
}

fn default_backoff() -> Duration {
    DEFAULT_BACKOFF
}

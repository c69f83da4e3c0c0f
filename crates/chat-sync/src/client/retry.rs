//! Reconnect policy: bounded exponential backoff.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for automatic reconnection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Maximum number of reconnect attempts (None = infinite)
    pub max_attempts: Option<u32>,
    /// Delay before the first attempt
    pub initial_backoff_ms: u64,
    /// Upper bound for any single delay
    pub max_backoff_ms: u64,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: Some(5),
            initial_backoff_ms: 0,
            max_backoff_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

impl ReconnectConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Never reconnect; a drop goes straight to `Failed`.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_attempts: Some(0),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = Some(max);
        self
    }

    #[must_use]
    pub fn unbounded(mut self) -> Self {
        self.max_attempts = None;
        self
    }

    #[must_use]
    pub fn with_initial_backoff(mut self, duration: Duration) -> Self {
        self.initial_backoff_ms = duration.as_millis() as u64;
        self
    }

    #[must_use]
    pub fn with_max_backoff(mut self, duration: Duration) -> Self {
        self.max_backoff_ms = duration.as_millis() as u64;
        self
    }

    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    Retry(Duration),
    DontRetry,
}

#[derive(Debug, Clone)]
pub struct RetryState {
    pub attempts: u32,
    pub current_backoff: Duration,
    config: ReconnectConfig,
}

impl RetryState {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            attempts: 0,
            current_backoff: Duration::from_millis(config.initial_backoff_ms),
            config,
        }
    }

    /// Decide whether another attempt is allowed and how long to wait first.
    pub fn next_attempt(&mut self) -> RetryDecision {
        self.attempts += 1;
        if let Some(max) = self.config.max_attempts {
            if self.attempts > max {
                return RetryDecision::DontRetry;
            }
        }

        let max_backoff = Duration::from_millis(self.config.max_backoff_ms);
        let wait = self.current_backoff.min(max_backoff);

        // An immediate first retry still has to grow into a real delay.
        let grown = if self.current_backoff.is_zero() {
            Duration::from_secs(2)
        } else {
            self.current_backoff
                .mul_f64(self.config.multiplier.clamp(1.0, 1000.0))
        };
        self.current_backoff = grown.min(max_backoff);

        RetryDecision::Retry(wait)
    }
}

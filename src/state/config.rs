//! Tunables for channel retry, event polling, and the mode handshake.
//!
//! Every field has a default, so a host can supply a partial JSON document
//! (or nothing at all) and still get a usable configuration.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default number of automatic resubscribe attempts.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default delay before the first retry (1 second).
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;

/// Upper bound on a single backoff delay (30 seconds).
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Fraction of the computed delay added as random jitter.
pub const DEFAULT_JITTER_RATIO: f64 = 0.3;

/// Default number of events fetched per poll.
pub const DEFAULT_POLL_LIMIT: usize = 100;

/// How often a mirror re-asks the owner for state while waiting (3 seconds).
pub const DEFAULT_STATE_REQUEST_INTERVAL_MS: u64 = 3_000;

/// Deck selected when nothing else is known.
pub const DEFAULT_DECK: &str = "career";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Retry policy for a channel subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts allowed before the session gives up
    pub max_retries: u32,

    /// Delay before the first retry, doubled on each subsequent attempt
    pub base_delay_ms: u64,

    /// Cap for any single delay (before jitter)
    pub max_delay_ms: u64,

    /// Jitter as a fraction of the capped delay, in `[0, 1]`
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_ratio: DEFAULT_JITTER_RATIO,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-indexed), without jitter.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }

    /// Delay before retry number `attempt` with up to `jitter_ratio` extra.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for(attempt);
        let ratio = self.jitter_ratio.clamp(0.0, 1.0);
        if ratio == 0.0 {
            return base;
        }
        let jitter_ms = (base.as_millis() as f64 * ratio) as u64;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

/// Top-level configuration for one room's synchronization components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub retry: RetryConfig,

    /// Maximum events requested from the store per poll
    pub poll_limit: usize,

    /// Re-request interval for mirrors that have not heard from the owner
    pub state_request_interval_ms: u64,

    /// Deck restored by `exit_game` and used before any mode is chosen
    pub default_deck: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            poll_limit: DEFAULT_POLL_LIMIT,
            state_request_interval_ms: DEFAULT_STATE_REQUEST_INTERVAL_MS,
            default_deck: DEFAULT_DECK.to_string(),
        }
    }
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document; absent fields take their defaults.
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_limit == 0 {
            return Err(ConfigError::Invalid("poll_limit must be at least 1".into()));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "base_delay_ms ({}) exceeds max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_ratio) {
            return Err(ConfigError::Invalid(
                "jitter_ratio must be between 0 and 1".into(),
            ));
        }
        Ok(())
    }

    pub fn state_request_interval(&self) -> Duration {
        Duration::from_millis(self.state_request_interval_ms)
    }
}

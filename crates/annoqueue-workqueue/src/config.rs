//! Engine and sweeper configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use annoqueue_config::{Config, DEFAULT_LEASE_SECS};

/// Claim and lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Fallback lease for queues without a positive lease.
    #[serde(default = "default_lease_secs")]
    pub default_lease_secs: i64,

    /// Bound on each store operation, in milliseconds.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// Attempts for the atomic claim step on transient failures.
    #[serde(default = "default_claim_retry_attempts")]
    pub claim_retry_attempts: u32,

    /// Delay between claim attempts, in milliseconds.
    #[serde(default = "default_claim_retry_backoff_ms")]
    pub claim_retry_backoff_ms: u64,
}

fn default_lease_secs() -> i64 {
    DEFAULT_LEASE_SECS
}

fn default_store_timeout_ms() -> u64 {
    5000
}

fn default_claim_retry_attempts() -> u32 {
    3
}

fn default_claim_retry_backoff_ms() -> u64 {
    50
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_lease_secs: default_lease_secs(),
            store_timeout_ms: default_store_timeout_ms(),
            claim_retry_attempts: default_claim_retry_attempts(),
            claim_retry_backoff_ms: default_claim_retry_backoff_ms(),
        }
    }
}

impl EngineConfig {
    /// Build from the loaded application config.
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_lease_secs: config.queue.default_lease_secs,
            store_timeout_ms: config.queue.store_timeout_ms,
            claim_retry_attempts: config.queue.claim_retry_attempts,
            claim_retry_backoff_ms: config.queue.claim_retry_backoff_ms,
        }
    }

    /// Get the store timeout as a Duration.
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Get the claim backoff as a Duration.
    pub fn claim_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.claim_retry_backoff_ms)
    }

    /// At least one attempt is always made.
    pub fn claim_attempts(&self) -> u32 {
        self.claim_retry_attempts.max(1)
    }
}

/// Lease expiry sweeper settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    /// Seconds between sweeps.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Wall-clock bound for one sweep, in seconds.
    #[serde(default = "default_tick_timeout")]
    pub tick_timeout_secs: u64,

    /// Fallback lease for queues without a positive lease.
    #[serde(default = "default_lease_secs")]
    pub default_lease_secs: i64,
}

fn default_interval() -> u64 {
    60
}

fn default_tick_timeout() -> u64 {
    30
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            tick_timeout_secs: default_tick_timeout(),
            default_lease_secs: default_lease_secs(),
        }
    }
}

impl SweeperConfig {
    /// Build from the loaded application config.
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval_secs: config.sweeper.interval_secs,
            tick_timeout_secs: config.sweeper.tick_timeout_secs,
            default_lease_secs: config.queue.default_lease_secs,
        }
    }

    /// Get the sweep interval as a Duration. Never shorter than one second.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    /// Get the tick timeout as a Duration.
    pub fn tick_timeout(&self) -> Duration {
        Duration::from_secs(self.tick_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.default_lease_secs, 300);
        assert_eq!(config.store_timeout(), Duration::from_secs(5));
        assert_eq!(config.claim_attempts(), 3);
    }

    #[test]
    fn test_claim_attempts_never_zero() {
        let config = EngineConfig {
            claim_retry_attempts: 0,
            ..Default::default()
        };
        assert_eq!(config.claim_attempts(), 1);
    }

    #[test]
    fn test_zero_interval_is_raised_to_one_second() {
        let config = SweeperConfig {
            interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_from_app_config() {
        let mut app = Config::default();
        app.queue.default_lease_secs = 90;
        app.sweeper.interval_secs = 15;
        app.sweeper.tick_timeout_secs = 5;

        let engine = EngineConfig::from_config(&app);
        assert_eq!(engine.default_lease_secs, 90);

        let sweeper = SweeperConfig::from_config(&app);
        assert_eq!(sweeper.interval(), Duration::from_secs(15));
        assert_eq!(sweeper.tick_timeout(), Duration::from_secs(5));
        assert_eq!(sweeper.default_lease_secs, 90);
    }
}

//! Configuration schema definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Lease applied when a queue carries no positive lease of its own.
pub const DEFAULT_LEASE_SECS: i64 = 300;

/// Longest lease a queue may carry (one year).
pub const MAX_LEASE_SECS: i64 = 365 * 24 * 60 * 60;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub queue: QueueSection,

    #[serde(default)]
    pub sweeper: SweeperSection,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// SQLite database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database file path. `~` is expanded by the loader.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    /// How long a writer waits on a locked database before giving up.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl DatabaseConfig {
    /// Get the busy timeout as a Duration.
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

fn default_db_path() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".annoqueue").join("annoqueue.db"))
        .unwrap_or_else(|| PathBuf::from("annoqueue.db"))
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

/// Claim and lifecycle settings shared by every queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSection {
    /// Fallback lease for queues whose own lease is unset or non-positive.
    #[serde(default = "default_lease_secs")]
    pub default_lease_secs: i64,

    /// Upper bound for any single store operation.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// Attempts for the atomic claim step when the store reports contention.
    #[serde(default = "default_claim_retry_attempts")]
    pub claim_retry_attempts: u32,

    /// Pause between claim attempts.
    #[serde(default = "default_claim_retry_backoff_ms")]
    pub claim_retry_backoff_ms: u64,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            default_lease_secs: default_lease_secs(),
            store_timeout_ms: default_store_timeout_ms(),
            claim_retry_attempts: default_claim_retry_attempts(),
            claim_retry_backoff_ms: default_claim_retry_backoff_ms(),
        }
    }
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

/// Lease expiry sweeper settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperSection {
    #[serde(default = "default_sweeper_enabled")]
    pub enabled: bool,

    /// Seconds between sweeps. Independent of any queue's lease.
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,

    /// Wall-clock bound for one sweep; must be shorter than the interval.
    #[serde(default = "default_tick_timeout")]
    pub tick_timeout_secs: u64,
}

impl Default for SweeperSection {
    fn default() -> Self {
        Self {
            enabled: default_sweeper_enabled(),
            interval_secs: default_sweep_interval(),
            tick_timeout_secs: default_tick_timeout(),
        }
    }
}

fn default_sweeper_enabled() -> bool {
    true
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_tick_timeout() -> u64 {
    30
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit console logs as JSON lines.
    #[serde(default)]
    pub json: bool,

    /// Directory for daily-rotated log files. Console only when unset.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            directory: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

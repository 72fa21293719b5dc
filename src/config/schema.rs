//! Configuration schema for Radar
//!
//! Configuration is stored at `~/.config/radar/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Relational store settings
    pub store: StoreConfig,

    /// Scanner settings
    pub scanner: ScannerConfig,

    /// Check container lease settings
    pub check_sessions: CheckSessionConfig,

    /// Garbage collection settings
    pub gc: GcConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,

    /// Enable audit logging of collector deletions
    pub audit_log: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
            audit_log: true,
        }
    }
}

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file (default: state dir)
    pub database: Option<PathBuf>,

    /// Maximum pooled connections
    pub max_connections: u32,

    /// How long a writer waits on a busy database before failing
    pub busy_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database: None,
            max_connections: 5,
            busy_timeout_secs: 5,
        }
    }
}

/// Scanner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Interval between checks when a resource sets no `check_every`
    pub default_check_interval_secs: u64,

    /// Sleep between lock attempts for checks that must complete
    pub lock_retry_backoff_ms: u64,

    /// Lock attempts before a must-complete check gives up
    pub lock_retry_max_attempts: u32,

    /// Lease on a checking lock; a holder that died is superseded after this
    pub lock_ttl_secs: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            default_check_interval_secs: 60,
            lock_retry_backoff_ms: 1000,
            lock_retry_max_attempts: 300,
            lock_ttl_secs: 3600,
        }
    }
}

impl ScannerConfig {
    pub fn default_check_interval(&self) -> Duration {
        Duration::from_secs(self.default_check_interval_secs)
    }

    pub fn lock_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.lock_retry_backoff_ms)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }
}

/// Check session (container owner) expiry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckSessionConfig {
    /// A session with less than this left is not reused
    pub expiry_grace_secs: u64,

    /// Shortest lifetime of a new session
    pub min_expiry_secs: u64,

    /// Longest lifetime of a new session
    pub max_expiry_secs: u64,
}

impl Default for CheckSessionConfig {
    fn default() -> Self {
        Self {
            expiry_grace_secs: 60,
            min_expiry_secs: 300,
            max_expiry_secs: 3600,
        }
    }
}

/// Garbage collection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    /// Seconds between collector runs in watch mode
    pub interval_secs: u64,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self { interval_secs: 30 }
    }
}

impl GcConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[general]"));
        assert!(toml.contains("[scanner]"));
        assert!(toml.contains("[check_sessions]"));
    }

    #[test]
    fn config_deserializes_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.scanner.default_check_interval_secs, 60);
        assert_eq!(config.gc.interval(), Duration::from_secs(30));
    }

    #[test]
    fn config_deserializes_partial() {
        let toml = r#"
            [scanner]
            lock_retry_backoff_ms = 5
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.scanner.lock_retry_backoff(), Duration::from_millis(5));
        assert_eq!(config.scanner.lock_retry_max_attempts, 300); // default preserved
        assert!(config.store.database.is_none());
    }
}

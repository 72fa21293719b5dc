//! Configuration management for Radar
//!
//! A loaded config is checked for values the scanner, lock leases and check
//! sessions cannot work with, and a relative `store.database` is taken
//! relative to the directory holding the config file.

pub mod schema;

pub use schema::{CheckSessionConfig, Config, GcConfig, ScannerConfig, StoreConfig};

use crate::error::{RadarError, RadarResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Self {
        Self {
            config_path: Self::default_config_path(),
        }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("radar")
            .join("config.toml")
    }

    /// Get the state directory path
    pub fn state_dir() -> PathBuf {
        dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("radar")
    }

    /// Get the default database path
    pub fn default_database_path() -> PathBuf {
        Self::state_dir().join("radar.db")
    }

    /// Get the audit log path
    pub fn audit_log_path() -> PathBuf {
        Self::state_dir().join("audit.log")
    }

    /// Resolve the database path for a loaded config
    pub fn database_path(config: &Config) -> PathBuf {
        config
            .store
            .database
            .clone()
            .unwrap_or_else(Self::default_database_path)
    }

    /// Load configuration, using defaults if the file does not exist
    pub async fn load(&self) -> RadarResult<Config> {
        if !self.config_path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Config::default());
        }

        self.load_from_file(&self.config_path).await
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> RadarResult<Config> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| RadarError::io(format!("reading config from {}", path.display()), e))?;

        let invalid = |reason: String| RadarError::ConfigInvalid {
            path: path.to_path_buf(),
            reason,
        };
        let mut config: Config = toml::from_str(&content).map_err(|e| invalid(e.to_string()))?;
        validate(&config).map_err(invalid)?;

        if let Some(database) = config.store.database.as_mut() {
            if database.is_relative() {
                if let Some(dir) = path.parent() {
                    *database = dir.join(&*database);
                }
            }
        }

        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, config: &Config) -> RadarResult<()> {
        self.ensure_config_dir().await?;

        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content).await.map_err(|e| {
            RadarError::io(
                format!("writing config to {}", self.config_path.display()),
                e,
            )
        })?;

        info!("Configuration saved to {}", self.config_path.display());
        Ok(())
    }

    /// Ensure the config directory exists
    async fn ensure_config_dir(&self) -> RadarResult<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| RadarError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        Ok(())
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

/// Reject settings that would leave checks or leases unusable
fn validate(config: &Config) -> Result<(), String> {
    match config.general.log_format.as_str() {
        "text" | "json" => {}
        other => {
            return Err(format!(
                "general.log_format must be \"text\" or \"json\", got {:?}",
                other
            ))
        }
    }

    let scanner = &config.scanner;
    if scanner.lock_retry_max_attempts == 0 {
        return Err("scanner.lock_retry_max_attempts must be at least 1".to_string());
    }
    if scanner.lock_ttl_secs == 0 {
        return Err("scanner.lock_ttl_secs must be at least 1".to_string());
    }

    let sessions = &config.check_sessions;
    if sessions.min_expiry_secs > sessions.max_expiry_secs {
        return Err(format!(
            "check_sessions.min_expiry_secs ({}) exceeds max_expiry_secs ({})",
            sessions.min_expiry_secs, sessions.max_expiry_secs
        ));
    }

    if config.gc.interval_secs == 0 {
        return Err("gc.interval_secs must be at least 1".to_string());
    }
    Ok(())
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/verdant/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/verdant/` (~/.config/verdant/)
//! - Data: `$XDG_DATA_HOME/verdant/` (~/.local/share/verdant/)
//! - State/Logs: `$XDG_STATE_HOME/verdant/` (~/.local/state/verdant/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Database engine configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Backup and maintenance configuration
    #[serde(default)]
    pub backup: BackupConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database engine configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// Database file name inside the data directory
    #[serde(default = "default_database_name")]
    pub database_name: String,

    /// Enforce foreign key constraints
    #[serde(default = "default_true")]
    pub enable_foreign_keys: bool,

    /// Use write-ahead logging for concurrent readers during writes
    #[serde(default = "default_true")]
    pub enable_wal: bool,

    /// Page cache size (pages)
    #[serde(default = "default_cache_size")]
    pub cache_size: u32,

    /// Seconds to wait on a lock held by another writer before failing
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,

    /// Log every executed statement at debug level
    #[serde(default)]
    pub enable_query_logging: bool,

    /// Max attempts for a retryable operation
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Overall deadline for one executor operation, seconds
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,

    /// Read cache time-to-live, seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_name: default_database_name(),
            enable_foreign_keys: true,
            enable_wal: true,
            cache_size: default_cache_size(),
            busy_timeout_secs: default_busy_timeout_secs(),
            enable_query_logging: false,
            max_attempts: default_max_attempts(),
            operation_timeout_secs: default_operation_timeout_secs(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_secs(self.busy_timeout_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

fn default_database_name() -> String {
    "verdant.db".to_string()
}

fn default_true() -> bool {
    true
}

fn default_cache_size() -> u32 {
    10_000
}

fn default_busy_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_operation_timeout_secs() -> u64 {
    30
}

fn default_cache_ttl_secs() -> u64 {
    300
}

/// Backup and maintenance configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BackupConfig {
    /// Hours between automatic backups
    #[serde(default = "default_backup_interval_hours")]
    pub backup_interval_hours: u64,

    /// Days between maintenance (vacuum/analyze/purge) passes
    #[serde(default = "default_optimize_interval_days")]
    pub optimize_interval_days: u64,

    /// Maximum number of backup files kept on disk
    #[serde(default = "default_max_backup_files")]
    pub max_backup_files: usize,

    /// Days a time-series row is retained before the purge removes it
    #[serde(default = "default_data_retention_days")]
    pub data_retention_days: i64,

    /// Override the backup directory (defaults to `<data_dir>/backups`)
    pub backup_dir: Option<PathBuf>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            backup_interval_hours: default_backup_interval_hours(),
            optimize_interval_days: default_optimize_interval_days(),
            max_backup_files: default_max_backup_files(),
            data_retention_days: default_data_retention_days(),
            backup_dir: None,
        }
    }
}

impl BackupConfig {
    pub fn backup_interval(&self) -> Duration {
        Duration::from_secs(self.backup_interval_hours * 3600)
    }

    pub fn optimize_interval(&self) -> Duration {
        Duration::from_secs(self.optimize_interval_days * 86_400)
    }
}

fn default_backup_interval_hours() -> u64 {
    24
}

fn default_optimize_interval_days() -> u64 {
    7
}

fn default_max_backup_files() -> usize {
    5
}

fn default_data_retention_days() -> i64 {
    365
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/verdant/config.toml` (~/.config/verdant/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("verdant").join("config.toml")
    }

    /// Returns the data directory path (for the SQLite database and backups)
    ///
    /// `$XDG_DATA_HOME/verdant/` (~/.local/share/verdant/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("verdant")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/verdant/` (~/.local/state/verdant/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("verdant")
    }

    /// Returns the database file path
    pub fn database_path(&self) -> PathBuf {
        Self::data_dir().join(&self.database.database_name)
    }

    /// Returns the backup directory path
    pub fn backup_dir(&self) -> PathBuf {
        self.backup
            .backup_dir
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("backups"))
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/verdant/verdant.log` (~/.local/state/verdant/verdant.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("verdant.log")
    }
}

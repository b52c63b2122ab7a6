//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/formtrace/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/formtrace/` (~/.config/formtrace/)
//! - Data: `$XDG_DATA_HOME/formtrace/` (~/.local/share/formtrace/)
//! - State/Logs: `$XDG_STATE_HOME/formtrace/` (~/.local/state/formtrace/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default collection endpoint
pub const DEFAULT_ENDPOINT: &str = "https://collect.formtrace.dev/v1/events";

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
    /// Batching, delivery and tracking options
    #[serde(default)]
    pub agent: AgentConfig,

    /// Persisted retry queue
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Agent configuration
///
/// Everything is optional except `project_key`, which identifies the
/// destination project on the collection endpoint.
#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    /// Project key sent with every batch
    pub project_key: Option<String>,

    /// Collection endpoint URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Events per batch; reaching it triggers an immediate send
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Milliseconds between timer-driven flushes
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Verbose delivery logging
    #[serde(default)]
    pub debug: bool,

    /// Emit `change` events (off by default, highest volume and lowest value)
    #[serde(default)]
    pub track_changes: bool,

    /// Window in which a re-focus cancels a pending blur
    #[serde(default = "default_blur_debounce_ms")]
    pub blur_debounce_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            project_key: None,
            endpoint: default_endpoint(),
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            debug: false,
            track_changes: false,
            blur_debounce_ms: default_blur_debounce_ms(),
        }
    }
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_batch_size() -> usize {
    10
}

fn default_flush_interval_ms() -> u64 {
    5000
}

fn default_blur_debounce_ms() -> u64 {
    300
}

impl AgentConfig {
    /// Shorthand for a config with only the project key set
    pub fn for_project(project_key: impl Into<String>) -> Self {
        Self {
            project_key: Some(project_key.into()),
            ..Default::default()
        }
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        match self.project_key.as_deref() {
            Some(key) if !key.trim().is_empty() => {}
            _ => {
                return Err(Error::Config(
                    "agent.project_key is required".to_string(),
                ))
            }
        }
        if self.batch_size == 0 {
            return Err(Error::Config(
                "agent.batch_size must be at least 1".to_string(),
            ));
        }
        if self.flush_interval_ms == 0 {
            return Err(Error::Config(
                "agent.flush_interval_ms must be greater than 0".to_string(),
            ));
        }
        reqwest::Url::parse(&self.endpoint)
            .map_err(|e| Error::Config(format!("invalid agent.endpoint: {}", e)))?;
        Ok(())
    }

    /// Project key, or an error if it was never configured
    pub fn project_key(&self) -> Result<&str> {
        self.project_key
            .as_deref()
            .ok_or_else(|| Error::Config("agent.project_key is required".to_string()))
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn blur_debounce(&self) -> Duration {
        Duration::from_millis(self.blur_debounce_ms)
    }
}

/// Persisted retry queue configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Disable to run without any persistence (events then only live in memory)
    #[serde(default = "default_storage_enabled")]
    pub enabled: bool,

    /// Maximum number of persisted events; oldest are dropped first
    #[serde(default = "default_max_events")]
    pub max_events: usize,

    /// Override for the queue database location
    pub path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: default_storage_enabled(),
            max_events: default_max_events(),
            path: None,
        }
    }
}

fn default_storage_enabled() -> bool {
    true
}

fn default_max_events() -> usize {
    crate::store::MAX_STORED_EVENTS
}

impl StorageConfig {
    /// Queue database path, honoring the override
    pub fn database_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(Config::database_path)
    }
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
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Log level after applying the agent's debug toggle
    pub fn effective_log_level(&self) -> &str {
        if self.agent.debug {
            "debug"
        } else {
            &self.logging.level
        }
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/formtrace/config.toml` (~/.config/formtrace/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("formtrace").join("config.toml")
    }

    /// Returns the data directory path (for the persisted queue)
    ///
    /// `$XDG_DATA_HOME/formtrace/` (~/.local/share/formtrace/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("formtrace")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/formtrace/` (~/.local/state/formtrace/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("formtrace")
    }

    /// Returns the queue database path
    ///
    /// `$XDG_DATA_HOME/formtrace/queue.db` (~/.local/share/formtrace/queue.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("queue.db")
    }

    /// Returns the log file path
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("formtrace.log")
    }
}

//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/jetfinder/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/jetfinder/` (~/.config/jetfinder/)
//! - Data: `$XDG_DATA_HOME/jetfinder/` (~/.local/share/jetfinder/)
//! - State/Logs: `$XDG_STATE_HOME/jetfinder/` (~/.local/state/jetfinder/)

use crate::error::{Error, Result};
use crate::progress::CollectedPolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
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
    /// Game backend connection
    #[serde(default)]
    pub backend: BackendConfig,

    /// Polling engine tuning
    #[serde(default)]
    pub engine: EngineConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Game backend configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    /// Base URL the `config`, `proximity` and `register` endpoints hang off
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl BackendConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        let url = self.base_url.trim();
        if url.is_empty() {
            return Err(Error::Config("backend.base_url is required".to_string()));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "backend.base_url must be an http(s) URL, got {:?}",
                url
            )));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config(
                "backend.timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_base_url() -> String {
    "https://jetfinder.example.com/finder".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

/// Polling engine configuration
#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Milliseconds between cycles
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Cycles allowed to run their report/reconcile step at once.
    /// 1 keeps cycles strictly ordered.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// How newly discovered ids are merged into the collected set
    #[serde(default)]
    pub collected_policy: CollectedPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_in_flight: default_max_in_flight(),
            collected_policy: CollectedPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::Config(
                "engine.poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.max_in_flight == 0 {
            return Err(Error::Config(
                "engine.max_in_flight must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_in_flight() -> usize {
    1
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Level for the HTTP and TLS crates under the backend client
    #[serde(default = "default_deps_level")]
    pub deps_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            deps_level: default_deps_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_deps_level() -> String {
    "warn".to_string()
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

        config.validate()?;
        Ok(config)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.backend.validate()?;
        self.engine.validate()
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/jetfinder/config.toml` (~/.config/jetfinder/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("jetfinder").join("config.toml")
    }

    /// Returns the data directory path (for the SQLite store)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("jetfinder")
    }

    /// Returns the state directory path (for logs)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("jetfinder")
    }

    /// Returns the store file path
    ///
    /// `$XDG_DATA_HOME/jetfinder/jetfinder.db` (~/.local/share/jetfinder/jetfinder.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("jetfinder.db")
    }

    /// Returns the log file path
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("jetfinder.log")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// Called by the CLI before anything reads these variables.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}

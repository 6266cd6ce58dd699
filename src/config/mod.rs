//! Configuration system for Switchboard
//!
//! Loads configuration from a TOML file; the GitLab token and host can be
//! overridden from the command line or environment.

mod types;

pub use types::*;

use crate::notify::DEFAULT_CAPACITY;
use crate::store::DEFAULT_EXPIRY_WARNING_DAYS;
use crate::Secret;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main Switchboard configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// GitLab connection settings
    pub gitlab: GitLabConfig,
    /// Token validation settings
    pub validation: ValidationConfig,
    /// Notification log settings
    pub notifications: NotificationConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    /// Load configuration from a string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        Self::from_raw(raw)
    }

    /// Convert from raw TOML config to validated config
    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            gitlab: raw.gitlab.unwrap_or_default().into(),
            validation: raw.validation.unwrap_or_default().try_into()?,
            notifications: raw.notifications.unwrap_or_default().try_into()?,
            logging: raw.logging.unwrap_or_default().into(),
        })
    }

    /// Apply token and host given on the command line or in the environment
    pub fn with_overrides(mut self, token: Option<String>, host: Option<String>) -> Self {
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            self.gitlab.token = Some(Secret::new(token));
        }
        if let Some(host) = host {
            self.gitlab.host = host;
        }
        self
    }

    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("switchboard")
            .join("config.toml")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gitlab: GitLabConfig::default(),
            validation: ValidationConfig::default(),
            notifications: NotificationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// GitLab connection settings
#[derive(Debug, Clone, Default)]
pub struct GitLabConfig {
    /// Host for the bootstrap connection; empty means the public instance
    pub host: String,
    /// Token for the bootstrap connection (environment only, never from file)
    pub token: Option<Secret>,
    /// Connection the resolver falls back to; defaults to the bootstrap name
    pub default_connection: Option<String>,
}

/// Token validation settings
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Upper bound on a single identity check
    pub timeout: Duration,
    /// Warn when a token expires within this many days
    pub expiry_warning_days: i64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            expiry_warning_days: DEFAULT_EXPIRY_WARNING_DAYS,
        }
    }
}

/// Notification log settings
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    /// Maximum number of notifications retained
    pub capacity: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Format: "json" or "pretty"
    pub format: LogFormat,
    /// Optional log file; stderr otherwise
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format
    Pretty,
    /// JSON format
    Json,
}

//! Raw configuration types for TOML parsing

use super::*;
use serde::Deserialize;

/// Default identity check timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Raw configuration as parsed from TOML
#[derive(Debug, Deserialize)]
pub struct RawConfig {
    pub gitlab: Option<RawGitLabConfig>,
    pub validation: Option<RawValidationConfig>,
    pub notifications: Option<RawNotificationConfig>,
    pub logging: Option<RawLoggingConfig>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RawGitLabConfig {
    pub host: Option<String>,
    pub default_connection: Option<String>,
}

impl From<RawGitLabConfig> for GitLabConfig {
    fn from(raw: RawGitLabConfig) -> Self {
        Self {
            host: raw.host.unwrap_or_default(),
            token: None,
            default_connection: raw.default_connection.filter(|n| !n.is_empty()),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct RawValidationConfig {
    pub timeout_secs: Option<u64>,
    pub expiry_warning_days: Option<i64>,
}

impl TryFrom<RawValidationConfig> for ValidationConfig {
    type Error = ConfigError;

    fn try_from(raw: RawValidationConfig) -> Result<Self, Self::Error> {
        let timeout_secs = raw.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "validation.timeout_secs must be greater than zero".to_string(),
            ));
        }

        let expiry_warning_days = raw
            .expiry_warning_days
            .unwrap_or(DEFAULT_EXPIRY_WARNING_DAYS);
        if expiry_warning_days < 0 {
            return Err(ConfigError::Invalid(
                "validation.expiry_warning_days cannot be negative".to_string(),
            ));
        }

        Ok(Self {
            timeout: Duration::from_secs(timeout_secs),
            expiry_warning_days,
        })
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct RawNotificationConfig {
    pub capacity: Option<usize>,
}

impl TryFrom<RawNotificationConfig> for NotificationConfig {
    type Error = ConfigError;

    fn try_from(raw: RawNotificationConfig) -> Result<Self, Self::Error> {
        match raw.capacity {
            Some(0) => Err(ConfigError::Invalid(
                "notifications.capacity must be greater than zero".to_string(),
            )),
            Some(capacity) => Ok(Self { capacity }),
            None => Ok(Self::default()),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct RawLoggingConfig {
    pub level: Option<String>,
    pub format: Option<String>,
    pub file: Option<String>,
}

impl From<RawLoggingConfig> for LoggingConfig {
    fn from(raw: RawLoggingConfig) -> Self {
        Self {
            level: raw.level.unwrap_or_else(|| "info".to_string()),
            format: match raw.format.as_deref() {
                Some("json") => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
            file: raw.file.map(|p| expand_home(&p)),
        }
    }
}

/// Expand a leading `~/` to the home directory
fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest)
    } else {
        PathBuf::from(path)
    }
}

//! Switchboard - multi-account GitLab connection routing
//!
//! Switchboard lets one process talk to several GitLab accounts and servers at
//! once. Credentials live in a [`store::CredentialStore`], ready-to-use
//! connections live in a [`pool::ConnectionPool`], and a
//! [`router::Resolver`] picks the right connection for each unit of work using
//! the project context found next to the working directory.

pub mod config;
pub mod connection;
pub mod context;
pub mod mcp;
pub mod notify;
pub mod pool;
pub mod router;
pub mod server;
pub mod store;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The public GitLab endpoint. Host-based routing ignores it.
pub const PUBLIC_HOST: &str = "https://gitlab.com";

/// Name given to the connection bootstrapped for the public host.
pub const DEFAULT_CONNECTION: &str = "default";

/// Whether a host string refers to the public GitLab endpoint
pub fn is_public_host(host: &str) -> bool {
    host.trim_end_matches('/') == PUBLIC_HOST
}

/// Core error types for Switchboard
#[derive(Error, Debug)]
pub enum SwitchboardError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Validation error: {0}")]
    Validation(#[from] store::ValidationError),

    #[error("Resolution error: {0}")]
    Resolve(#[from] router::ResolveError),

    #[error("GitLab API error: {0}")]
    Api(#[from] connection::ApiError),

    #[error("Project context error: {0}")]
    Context(#[from] context::ContextError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Errors shared by the name-keyed registries (pool and store)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// A secret string wrapper that never prints its value
#[derive(Clone)]
pub struct Secret(SecretString);

impl Secret {
    /// Create a new secret from a string
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::from(value.into()))
    }

    /// Expose the secret value
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.expose().is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret([REDACTED])")
    }
}

impl From<String> for Secret {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for Secret {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// The GitLab user a credential authenticates as
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: i64,
    pub username: String,
}

/// Metadata for a stored credential
///
/// The secret is held in memory only and is skipped on serialization.
#[derive(Debug, Clone, Serialize)]
pub struct Credential {
    /// Registry key (e.g. "work", "personal", or a host URL)
    pub name: String,
    #[serde(skip_serializing)]
    pub secret: Option<Secret>,
    /// GitLab host this credential is valid for
    pub host: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_validated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<Identity>,
    /// Explicit expiry override, cleared by a successful validation
    #[serde(rename = "expired")]
    pub expired_flag: bool,
}

impl Credential {
    /// Create a credential for a host with no secret attached yet
    pub fn new(name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            secret: None,
            host: host.into(),
            created_at: Utc::now(),
            last_validated_at: None,
            expires_at: None,
            identity: None,
            expired_flag: false,
        }
    }

    pub fn with_secret(mut self, secret: impl Into<Secret>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Check if the credential is expired, either flagged or past its expiry
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        if self.expired_flag {
            return true;
        }
        match self.expires_at {
            Some(expires) => now > expires,
            None => false,
        }
    }

    /// Whole days until expiry, negative once expired, 0 when no expiry is set
    pub fn days_until_expiry(&self) -> i64 {
        self.days_until_expiry_at(Utc::now())
    }

    pub fn days_until_expiry_at(&self, now: DateTime<Utc>) -> i64 {
        match self.expires_at {
            Some(expires) => (expires - now).num_days(),
            None => 0,
        }
    }
}

/// Credential summary (without the secret) for listing
#[derive(Debug, Clone, Serialize)]
pub struct CredentialSummary {
    pub name: String,
    pub host: String,
    pub created_at: DateTime<Utc>,
    pub last_validated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<Identity>,
    pub is_expired: bool,
    pub days_until_expiry: i64,
    pub has_secret: bool,
}

impl From<&Credential> for CredentialSummary {
    fn from(cred: &Credential) -> Self {
        Self {
            name: cred.name.clone(),
            host: cred.host.clone(),
            created_at: cred.created_at,
            last_validated_at: cred.last_validated_at,
            expires_at: cred.expires_at,
            identity: cred.identity.clone(),
            is_expired: cred.is_expired(),
            days_until_expiry: cred.days_until_expiry(),
            has_secret: cred.secret.is_some(),
        }
    }
}

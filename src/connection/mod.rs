//! Connections to GitLab servers
//!
//! A connection is an opaque, ready-to-use handle bound to one credential.
//! The registries only store and hand out connections; the single operation
//! they rely on is the identity check used during validation.

mod gitlab;

pub use gitlab::{GitLabConnection, GitLabConnectionFactory};

use crate::{Identity, Secret};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Errors returned by the remote API
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Unauthorized (401)")]
    Unauthorized,

    #[error("Unexpected HTTP status: {0}")]
    Status(u16),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid response: {0}")]
    Decode(String),

    #[error("Invalid connection configuration: {0}")]
    InvalidConfig(String),
}

impl ApiError {
    /// Whether the server rejected the credential itself
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }
}

/// A live handle capable of issuing calls to one GitLab endpoint
#[async_trait]
pub trait Connection: Send + Sync {
    /// Base URL this connection talks to
    fn host(&self) -> &str;

    /// Identify the user behind the connection's credential
    async fn who_am_i(&self) -> Result<Identity, ApiError>;
}

/// Shared connection handle as stored in the pool
pub type SharedConnection = Arc<dyn Connection>;

/// Builds connections from a secret and host
pub trait ConnectionFactory: Send + Sync {
    fn connect(&self, secret: &Secret, host: &str) -> Result<SharedConnection, ApiError>;
}

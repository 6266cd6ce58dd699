//! Validation outcomes

use crate::connection::ApiError;
use crate::{Credential, Identity};
use serde::Serialize;
use thiserror::Error;

/// Why a credential failed its identity check
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// GitLab rejected the credential; it needs replacing
    #[error("Token '{name}' is invalid or expired (401)")]
    Unauthenticated { name: String },

    /// The check itself failed; retrying later may succeed
    #[error("Failed to validate token '{name}': {source}")]
    Transient { name: String, source: ApiError },
}

impl ValidationError {
    pub fn name(&self) -> &str {
        match self {
            ValidationError::Unauthenticated { name } | ValidationError::Transient { name, .. } => {
                name
            }
        }
    }

    pub fn is_unauthenticated(&self) -> bool {
        matches!(self, ValidationError::Unauthenticated { .. })
    }
}

/// Per-credential outcome of a validation pass
#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub is_expired: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<Identity>,
    pub days_until_expiry: i64,
}

impl ValidationResult {
    pub fn success(credential: &Credential) -> Self {
        Self {
            name: credential.name.clone(),
            success: true,
            error: None,
            is_expired: credential.is_expired(),
            identity: credential.identity.clone(),
            days_until_expiry: credential.days_until_expiry(),
        }
    }

    pub fn failure(name: impl Into<String>, error: impl Into<String>, is_expired: bool) -> Self {
        Self {
            name: name.into(),
            success: false,
            error: Some(error.into()),
            is_expired,
            identity: None,
            days_until_expiry: 0,
        }
    }

    pub fn from_error(err: &ValidationError) -> Self {
        Self::failure(err.name(), err.to_string(), err.is_unauthenticated())
    }
}

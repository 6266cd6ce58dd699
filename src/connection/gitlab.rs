//! GitLab REST connection

use super::{ApiError, Connection, ConnectionFactory, SharedConnection};
use crate::{Identity, Secret, PUBLIC_HOST};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

const USER_AGENT: &str = concat!("switchboard/", env!("CARGO_PKG_VERSION"));

/// Response body of `GET /api/v4/user` (only the fields we use)
#[derive(Debug, Deserialize)]
struct CurrentUser {
    id: i64,
    username: String,
}

/// Connection to a GitLab instance authenticated with a personal access token
pub struct GitLabConnection {
    client: Client,
    base_url: String,
    token: Secret,
}

impl GitLabConnection {
    /// Create a connection with its own HTTP client
    pub fn new(token: Secret, host: &str) -> Result<Self, ApiError> {
        let client = build_client()?;
        Self::with_client(client, token, host)
    }

    /// Create a connection sharing an existing HTTP client
    ///
    /// An empty host means the public GitLab instance.
    pub fn with_client(client: Client, token: Secret, host: &str) -> Result<Self, ApiError> {
        let host = host.trim();
        let base_url = if host.is_empty() {
            PUBLIC_HOST.to_string()
        } else {
            host.trim_end_matches('/').to_string()
        };

        if !base_url.starts_with("https://") && !base_url.starts_with("http://") {
            return Err(ApiError::InvalidConfig(format!(
                "host must start with http:// or https://: {}",
                base_url
            )));
        }

        Ok(Self {
            client,
            base_url,
            token,
        })
    }
}

#[async_trait]
impl Connection for GitLabConnection {
    fn host(&self) -> &str {
        &self.base_url
    }

    async fn who_am_i(&self) -> Result<Identity, ApiError> {
        let url = format!("{}/api/v4/user", self.base_url);
        debug!(url = %url, "Checking token identity");

        let response = self
            .client
            .get(&url)
            .header("PRIVATE-TOKEN", self.token.expose())
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }
        if !status.is_success() {
            return Err(ApiError::Status(status.as_u16()));
        }

        let user: CurrentUser = response
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))?;

        Ok(Identity {
            user_id: user.id,
            username: user.username,
        })
    }
}

/// Factory producing [`GitLabConnection`]s that share one HTTP client
pub struct GitLabConnectionFactory {
    client: Client,
}

impl GitLabConnectionFactory {
    pub fn new() -> Result<Self, ApiError> {
        Ok(Self {
            client: build_client()?,
        })
    }
}

impl ConnectionFactory for GitLabConnectionFactory {
    fn connect(&self, secret: &Secret, host: &str) -> Result<SharedConnection, ApiError> {
        let conn = GitLabConnection::with_client(self.client.clone(), secret.clone(), host)?;
        Ok(Arc::new(conn))
    }
}

fn build_client() -> Result<Client, ApiError> {
    Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| ApiError::InvalidConfig(format!("failed to create HTTP client: {}", e)))
}

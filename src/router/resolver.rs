//! Connection resolution from project context

use super::ResolveError;
use crate::connection::SharedConnection;
use crate::context::ProjectContextProvider;
use crate::is_public_host;
use crate::pool::ConnectionPool;
use std::sync::Arc;
use tracing::{debug, warn};

/// Picks one connection from the pool for each unit of work
///
/// Resolution order:
/// 1. the credential named by the project context
/// 2. a connection named after the context's host (skipped for the public host)
/// 3. the configured default connection
/// 4. whatever the pool offers as its default
pub struct Resolver {
    /// Pool to choose from
    pool: Arc<ConnectionPool>,
    /// Connection name used when the context gives no usable hint
    default_name: String,
    /// Source of project context
    provider: Arc<dyn ProjectContextProvider>,
}

impl Resolver {
    pub fn new(
        pool: Arc<ConnectionPool>,
        default_name: impl Into<String>,
        provider: Arc<dyn ProjectContextProvider>,
    ) -> Self {
        Self {
            pool,
            default_name: default_name.into(),
            provider,
        }
    }

    pub fn default_name(&self) -> &str {
        &self.default_name
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Resolve a connection and the name it is registered under
    pub async fn resolve(&self) -> Result<(SharedConnection, String), ResolveError> {
        match self.provider.find().await {
            Ok(Some(found)) => {
                debug!(source = %found.source.display(), "Using project context");
                let ctx = found.context;

                if let Some(name) = ctx.credential_name.as_deref().filter(|n| !n.is_empty()) {
                    match self.pool.get(name) {
                        Ok(conn) => {
                            debug!(name = %name, "Using connection named by project context");
                            return Ok((conn, name.to_string()));
                        }
                        Err(_) => warn!(
                            name = %name,
                            "Credential named in project context is not in the pool, falling back"
                        ),
                    }
                }

                if let Some(host) = ctx.host.as_deref().filter(|h| !h.is_empty()) {
                    if !is_public_host(host) {
                        if let Some(found) = self.match_host(host) {
                            return Ok(found);
                        }
                        warn!(host = %host, "No connection matches project host, falling back");
                    }
                }
            }
            Ok(None) => debug!("No project context found, using defaults"),
            Err(e) => debug!(error = %e, "Could not read project context, using defaults"),
        }

        if !self.default_name.is_empty() {
            match self.pool.get(&self.default_name) {
                Ok(conn) => {
                    debug!(name = %self.default_name, "Using configured default connection");
                    return Ok((conn, self.default_name.clone()));
                }
                Err(_) => warn!(
                    name = %self.default_name,
                    "Configured default connection not found, using first available"
                ),
            }
        }

        self.pool
            .get_default()
            .map(|(name, conn)| (conn, name))
            .map_err(|_| ResolveError::Unavailable("no connections available".to_string()))
    }

    /// Resolve a connection when the caller does not need its name
    pub async fn connection(&self) -> Result<SharedConnection, ResolveError> {
        let (conn, name) = self.resolve().await?;
        debug!(name = %name, "Resolved connection for this request");
        Ok(conn)
    }

    /// Resolve a connection for work on a specific project
    ///
    /// The project id is only recorded in the logs; resolution is unchanged.
    pub async fn resolve_for_project(
        &self,
        project_id: &str,
    ) -> Result<(SharedConnection, String), ResolveError> {
        let (conn, name) = self.resolve().await?;
        debug!(name = %name, project = %project_id, "Resolved connection for project");
        Ok((conn, name))
    }

    /// Connection whose pool name equals `host` exactly
    fn match_host(&self, host: &str) -> Option<(SharedConnection, String)> {
        self.pool
            .list()
            .into_iter()
            .find(|name| name == host)
            .and_then(|name| self.pool.get(&name).ok().map(|conn| (conn, name)))
            .inspect(|(_, name)| {
                debug!(name = %name, host = %host, "Using connection matching host")
            })
    }
}

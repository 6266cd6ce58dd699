//! Named connection pool
//!
//! Holds live connections keyed by name. Names are shared with the
//! [`CredentialStore`](crate::store::CredentialStore) but the two registries
//! do not reference each other; callers keep the names in sync.

use crate::connection::{ConnectionFactory, SharedConnection};
use crate::{is_public_host, RegistryError, Secret, SwitchboardError, DEFAULT_CONNECTION};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::info;

/// Result type for pool operations
pub type PoolResult<T> = Result<T, RegistryError>;

/// Thread-safe registry of live connections
#[derive(Default)]
pub struct ConnectionPool {
    connections: RwLock<HashMap<String, SharedConnection>>,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a connection
    pub fn add(&self, name: &str, connection: SharedConnection) -> PoolResult<()> {
        if name.is_empty() {
            return Err(RegistryError::InvalidArgument(
                "connection name cannot be empty".to_string(),
            ));
        }

        self.connections.write().insert(name.to_string(), connection);
        info!(name = %name, "Added connection to pool");
        Ok(())
    }

    /// Get a connection by name
    pub fn get(&self, name: &str) -> PoolResult<SharedConnection> {
        self.connections
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(format!("connection '{}'", name)))
    }

    /// Get the `"default"` connection, or another one when it is absent
    ///
    /// Without a `"default"` entry the connection with the smallest name is
    /// returned, so repeated calls on an unchanged pool agree.
    pub fn get_default(&self) -> PoolResult<(String, SharedConnection)> {
        let connections = self.connections.read();

        if let Some(conn) = connections.get(DEFAULT_CONNECTION) {
            return Ok((DEFAULT_CONNECTION.to_string(), conn.clone()));
        }

        connections
            .iter()
            .min_by(|a, b| a.0.cmp(b.0))
            .map(|(name, conn)| (name.clone(), conn.clone()))
            .ok_or_else(|| RegistryError::NotFound("no connections available".to_string()))
    }

    /// List connection names (unordered)
    pub fn list(&self) -> Vec<String> {
        self.connections.read().keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.connections.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Remove a connection
    pub fn remove(&self, name: &str) -> PoolResult<()> {
        let removed = self.connections.write().remove(name);
        if removed.is_none() {
            return Err(RegistryError::NotFound(format!("connection '{}'", name)));
        }

        info!(name = %name, "Removed connection from pool");
        Ok(())
    }

    /// Create the initial connection from the process environment
    ///
    /// The connection is named `"default"` for an empty or public host and
    /// after the host string otherwise. Returns the chosen name.
    pub fn bootstrap_from_environment(
        &self,
        factory: &dyn ConnectionFactory,
        secret: &Secret,
        host: &str,
    ) -> Result<String, SwitchboardError> {
        let name = connection_name_for_host(host);
        let connection = factory.connect(secret, host)?;
        self.add(&name, connection)?;

        info!(name = %name, "Initialized connection from environment");
        Ok(name)
    }
}

/// Pool name used for a connection to `host`
pub fn connection_name_for_host(host: &str) -> String {
    if host.is_empty() || is_public_host(host) {
        DEFAULT_CONNECTION.to_string()
    } else {
        host.to_string()
    }
}

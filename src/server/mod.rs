//! Switchboard service
//!
//! Wires the credential store, connection pool and resolver together and
//! provides the token administration operations used by the MCP server and
//! the CLI.

use crate::config::Config;
use crate::connection::{ApiError, ConnectionFactory, SharedConnection};
use crate::context::{ContextError, FoundContext, ProjectContextProvider};
use crate::notify::{Notification, NotificationLog};
use crate::pool::{connection_name_for_host, ConnectionPool};
use crate::router::Resolver;
use crate::store::{CredentialStore, ValidationResult};
use crate::{CredentialSummary, Identity, RegistryError, Secret, SwitchboardError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// The user behind the connection chosen for the current context
#[derive(Debug, Clone, Serialize)]
pub struct WhoAmI {
    /// Pool name of the resolved connection
    pub connection: String,
    pub host: String,
    #[serde(flatten)]
    pub identity: Identity,
}

/// Main Switchboard service
pub struct Switchboard {
    store: Arc<CredentialStore>,
    pool: Arc<ConnectionPool>,
    resolver: Resolver,
    provider: Arc<dyn ProjectContextProvider>,
    factory: Arc<dyn ConnectionFactory>,
    notifications: Arc<NotificationLog>,
    /// Upper bound on every identity check
    check_timeout: Duration,
}

impl Switchboard {
    /// Create a service from configuration
    pub fn new(
        config: &Config,
        factory: Arc<dyn ConnectionFactory>,
        provider: Arc<dyn ProjectContextProvider>,
    ) -> Self {
        let notifications = Arc::new(NotificationLog::new(config.notifications.capacity));
        let check_timeout = config.validation.timeout;

        let store = Arc::new(
            CredentialStore::with_notifier(notifications.clone())
                .with_expiry_warning_days(config.validation.expiry_warning_days)
                .with_check_timeout(check_timeout),
        );
        let pool = Arc::new(ConnectionPool::new());

        let default_name = config
            .gitlab
            .default_connection
            .clone()
            .unwrap_or_else(|| connection_name_for_host(&config.gitlab.host));
        let resolver = Resolver::new(pool.clone(), default_name, provider.clone());

        Self {
            store,
            pool,
            resolver,
            provider,
            factory,
            notifications,
            check_timeout,
        }
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn notification_log(&self) -> &Arc<NotificationLog> {
        &self.notifications
    }

    // ==================== Startup ====================

    /// Register the environment credential and validate it
    ///
    /// A failed validation is only logged; the connection stays in the pool
    /// so the server can still start. Returns the connection name.
    pub async fn bootstrap(&self, secret: &Secret, host: &str) -> Result<String, SwitchboardError> {
        if secret.is_empty() {
            return Err(SwitchboardError::InvalidRequest(
                "GitLab token is required".to_string(),
            ));
        }

        let name = self
            .pool
            .bootstrap_from_environment(self.factory.as_ref(), secret, host)?;
        let connection = self.pool.get(&name)?;

        match self.store.validate(&name, connection.as_ref()).await {
            Ok(mut credential) => {
                credential.secret = Some(secret.clone());
                credential.host = connection.host().to_string();
                self.store.add(&name, credential)?;
                info!(name = %name, "Startup token validation succeeded");
            }
            Err(e) => warn!(name = %name, error = %e, "Startup token validation failed"),
        }

        Ok(name)
    }

    // ==================== Token administration ====================

    /// Validate a new token and register it in both the store and the pool
    pub async fn add_token(
        &self,
        name: &str,
        secret: Secret,
        host: &str,
    ) -> Result<CredentialSummary, SwitchboardError> {
        if name.is_empty() {
            return Err(RegistryError::InvalidArgument(
                "token name cannot be empty".to_string(),
            )
            .into());
        }
        if secret.is_empty() {
            return Err(SwitchboardError::InvalidRequest(
                "token value cannot be empty".to_string(),
            ));
        }

        let connection = self.factory.connect(&secret, host)?;
        let mut credential = self.store.validate(name, connection.as_ref()).await?;
        credential.secret = Some(secret);
        credential.host = connection.host().to_string();

        let summary = CredentialSummary::from(&credential);
        self.store.add(name, credential)?;
        self.pool.add(name, connection)?;

        info!(name = %name, host = %summary.host, "Added token");
        Ok(summary)
    }

    /// Re-validate an existing token, optionally replacing its secret
    ///
    /// Creation time and host are kept. The pool entry is replaced only when
    /// a new secret was given (or the pool had none).
    pub async fn update_token(
        &self,
        name: &str,
        secret: Option<Secret>,
    ) -> Result<CredentialSummary, SwitchboardError> {
        let existing = self.store.get(name)?;
        let secret_changed = secret.is_some();

        let secret = secret
            .or(existing.secret)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                SwitchboardError::InvalidRequest(format!("no token value stored for '{}'", name))
            })?;

        let connection = self.factory.connect(&secret, &existing.host)?;
        let mut credential = self.store.validate(name, connection.as_ref()).await?;
        credential.secret = Some(secret);
        credential.host = existing.host;
        credential.created_at = existing.created_at;

        let summary = CredentialSummary::from(&credential);
        self.store.add(name, credential)?;
        if secret_changed || !self.pool.contains(name) {
            self.pool.add(name, connection)?;
        }

        info!(name = %name, secret_changed, "Updated token");
        Ok(summary)
    }

    /// Validate one stored token
    ///
    /// Lookup failures are errors; a failed check is reported in the result.
    pub async fn validate_token(&self, name: &str) -> Result<ValidationResult, SwitchboardError> {
        self.store.get(name)?;
        let connection = self.connection_for(name)?;

        Ok(match self.store.validate(name, connection.as_ref()).await {
            Ok(credential) => ValidationResult::success(&credential),
            Err(e) => ValidationResult::from_error(&e),
        })
    }

    /// Validate every stored token
    pub async fn validate_all(&self) -> Vec<ValidationResult> {
        let mut results = self
            .store
            .validate_all(|name| self.connection_for(name))
            .await;
        results.sort_by(|a, b| a.name.cmp(&b.name));
        results
    }

    /// Remove a token from the store and, if present, from the pool
    pub fn remove_token(&self, name: &str) -> Result<(), SwitchboardError> {
        self.store.remove(name)?;
        if self.pool.remove(name).is_err() {
            debug!(name = %name, "No pooled connection to remove");
        }
        Ok(())
    }

    /// Summaries of all stored tokens, sorted by name
    pub fn list_tokens(&self) -> Vec<CredentialSummary> {
        let mut summaries: Vec<CredentialSummary> = self
            .store
            .list()
            .values()
            .map(CredentialSummary::from)
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    // ==================== Notifications ====================

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.recent()
    }

    pub fn clear_notifications(&self) {
        self.notifications.clear();
    }

    // ==================== Resolution ====================

    /// Identify the user behind the connection the resolver picks
    pub async fn whoami(&self, project_id: Option<&str>) -> Result<WhoAmI, SwitchboardError> {
        let (connection, name) = match project_id {
            Some(project_id) => self.resolver.resolve_for_project(project_id).await?,
            None => self.resolver.resolve().await?,
        };

        let identity = tokio::time::timeout(self.check_timeout, connection.who_am_i())
            .await
            .map_err(|_| {
                ApiError::Transport(format!(
                    "identity check timed out after {}s",
                    self.check_timeout.as_secs()
                ))
            })??;

        Ok(WhoAmI {
            connection: name,
            host: connection.host().to_string(),
            identity,
        })
    }

    /// Project context visible to the resolver
    pub async fn project_context(&self) -> Result<Option<FoundContext>, ContextError> {
        self.provider.find().await
    }

    /// Connection for a stored credential, built from its secret
    ///
    /// Credentials without a secret fall back to the pooled connection.
    fn connection_for(&self, name: &str) -> Result<SharedConnection, SwitchboardError> {
        let credential = self.store.get(name)?;
        match credential.secret {
            Some(secret) => Ok(self.factory.connect(&secret, &credential.host)?),
            None => Ok(self.pool.get(name)?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::context::{NoContext, ProjectContext};
    use crate::notify::NotificationLevel;
    use crate::{DEFAULT_CONNECTION, PUBLIC_HOST};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Connection whose behaviour is chosen by its secret
    ///
    /// `user-<name>` authenticates as `<name>`, `revoked` is rejected,
    /// `slow` never answers and anything else fails with a server error.
    struct MockConnection {
        host: String,
        secret: String,
    }

    #[async_trait]
    impl Connection for MockConnection {
        fn host(&self) -> &str {
            &self.host
        }

        async fn who_am_i(&self) -> Result<Identity, ApiError> {
            if let Some(username) = self.secret.strip_prefix("user-") {
                return Ok(Identity {
                    user_id: username.len() as i64,
                    username: username.to_string(),
                });
            }
            match self.secret.as_str() {
                "revoked" => Err(ApiError::Unauthorized),
                "slow" => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Err(ApiError::Status(504))
                }
                _ => Err(ApiError::Status(500)),
            }
        }
    }

    #[derive(Default)]
    struct MockFactory {
        connects: AtomicUsize,
    }

    impl ConnectionFactory for MockFactory {
        fn connect(&self, secret: &Secret, host: &str) -> Result<SharedConnection, ApiError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let host = if host.is_empty() { PUBLIC_HOST } else { host };
            Ok(Arc::new(MockConnection {
                host: host.to_string(),
                secret: secret.expose().to_string(),
            }))
        }
    }

    fn service() -> (Switchboard, Arc<MockFactory>) {
        service_with(Config::default(), Arc::new(NoContext))
    }

    fn service_with(
        mut config: Config,
        provider: Arc<dyn ProjectContextProvider>,
    ) -> (Switchboard, Arc<MockFactory>) {
        config.validation.timeout = Duration::from_millis(200);
        let factory = Arc::new(MockFactory::default());
        (Switchboard::new(&config, factory.clone(), provider), factory)
    }

    #[tokio::test]
    async fn test_bootstrap_public_host() {
        let (sb, _) = service();
        let name = sb.bootstrap(&Secret::new("user-alice"), "").await.unwrap();

        assert_eq!(name, DEFAULT_CONNECTION);
        assert!(sb.pool().contains(DEFAULT_CONNECTION));

        let cred = sb.store().get(DEFAULT_CONNECTION).unwrap();
        assert_eq!(cred.host, PUBLIC_HOST);
        assert_eq!(cred.identity.unwrap().username, "alice");
        assert!(cred.secret.is_some());
    }

    #[tokio::test]
    async fn test_bootstrap_failure_does_not_abort() {
        let (sb, _) = service();
        let host = "https://gitlab.example.com";
        let name = sb.bootstrap(&Secret::new("revoked"), host).await.unwrap();

        assert_eq!(name, host);
        assert!(sb.pool().contains(host));
        assert!(sb.store().get(host).is_err());

        let notes = sb.notifications();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].level, NotificationLevel::Error);
    }

    #[tokio::test]
    async fn test_bootstrap_requires_token() {
        let (sb, _) = service();
        assert!(matches!(
            sb.bootstrap(&Secret::new(""), "").await,
            Err(SwitchboardError::InvalidRequest(_))
        ));
        assert!(sb.pool().is_empty());
    }

    #[tokio::test]
    async fn test_add_token_registers_in_both() {
        let (sb, _) = service();
        let summary = sb
            .add_token("work", Secret::new("user-bob"), "https://gitlab.work.example")
            .await
            .unwrap();

        assert_eq!(summary.name, "work");
        assert!(summary.has_secret);
        assert_eq!(summary.identity.unwrap().username, "bob");
        assert!(sb.pool().contains("work"));
        assert!(sb.store().get("work").is_ok());
    }

    #[tokio::test]
    async fn test_add_token_rejected_leaves_no_trace() {
        let (sb, _) = service();
        let err = sb
            .add_token("work", Secret::new("revoked"), "")
            .await
            .unwrap_err();

        assert!(matches!(err, SwitchboardError::Validation(ref e) if e.is_unauthenticated()));
        assert!(!sb.pool().contains("work"));
        assert!(sb.store().get("work").is_err());
    }

    #[tokio::test]
    async fn test_add_token_invalid_arguments() {
        let (sb, _) = service();
        assert!(matches!(
            sb.add_token("", Secret::new("user-a"), "").await,
            Err(SwitchboardError::Registry(RegistryError::InvalidArgument(_)))
        ));
        assert!(matches!(
            sb.add_token("x", Secret::new(""), "").await,
            Err(SwitchboardError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_update_token_preserves_metadata() {
        let (sb, factory) = service();
        let host = "https://gitlab.work.example";
        sb.add_token("work", Secret::new("user-bob"), host).await.unwrap();
        let created = sb.store().get("work").unwrap().created_at;
        let before = sb.pool().get("work").unwrap();

        // Revalidating the stored secret keeps the pooled connection
        sb.update_token("work", None).await.unwrap();
        assert!(Arc::ptr_eq(&before, &sb.pool().get("work").unwrap()));

        let summary = sb
            .update_token("work", Some(Secret::new("user-carol")))
            .await
            .unwrap();
        assert_eq!(summary.identity.unwrap().username, "carol");
        assert_eq!(summary.host, host);
        assert_eq!(summary.created_at, created);
        assert!(!Arc::ptr_eq(&before, &sb.pool().get("work").unwrap()));
        assert_eq!(factory.connects.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_update_token_rejected_keeps_old_secret() {
        let (sb, _) = service();
        sb.add_token("work", Secret::new("user-bob"), "").await.unwrap();

        assert!(sb.update_token("work", Some(Secret::new("revoked"))).await.is_err());
        let cred = sb.store().get("work").unwrap();
        assert_eq!(cred.secret.unwrap().expose(), "user-bob");
    }

    #[tokio::test]
    async fn test_update_unknown_token() {
        let (sb, _) = service();
        assert!(matches!(
            sb.update_token("ghost", None).await,
            Err(SwitchboardError::Registry(RegistryError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_validate_token_reports_failure_in_result() {
        let (sb, _) = service();
        sb.store()
            .add("old", crate::Credential::new("old", PUBLIC_HOST).with_secret("revoked"))
            .unwrap();

        let result = sb.validate_token("old").await.unwrap();
        assert!(!result.success);
        assert!(result.is_expired);

        assert!(sb.validate_token("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_validate_all_mixed() {
        let (sb, _) = service();
        sb.add_token("a", Secret::new("user-ann"), "").await.unwrap();
        sb.add_token("b", Secret::new("user-ben"), "").await.unwrap();
        sb.store()
            .add("c", crate::Credential::new("c", PUBLIC_HOST).with_secret("broken"))
            .unwrap();
        sb.store()
            .add("d", crate::Credential::new("d", PUBLIC_HOST))
            .unwrap();

        let results = sb.validate_all().await;
        let names: Vec<&str> = results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c", "d"]);
        assert!(results[0].success && results[1].success);
        assert!(!results[2].success && !results[2].is_expired);
        assert!(results[3]
            .error
            .as_deref()
            .unwrap()
            .starts_with("failed to get connection"));
    }

    #[tokio::test]
    async fn test_validation_times_out_as_transient() {
        let (sb, _) = service();
        let err = sb
            .add_token("slow", Secret::new("slow"), "")
            .await
            .unwrap_err();

        match err {
            SwitchboardError::Validation(e) => assert!(!e.is_unauthenticated()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_remove_token() {
        let (sb, _) = service();
        sb.add_token("work", Secret::new("user-bob"), "").await.unwrap();
        sb.remove_token("work").unwrap();
        assert!(!sb.pool().contains("work"));
        assert!(sb.list_tokens().is_empty());

        // Store-only entries are removed without a pool entry
        sb.store().add("solo", crate::Credential::new("solo", PUBLIC_HOST)).unwrap();
        sb.remove_token("solo").unwrap();

        assert!(matches!(
            sb.remove_token("work"),
            Err(SwitchboardError::Registry(RegistryError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_whoami_follows_context() {
        struct Ctx;

        #[async_trait]
        impl ProjectContextProvider for Ctx {
            async fn find(&self) -> Result<Option<FoundContext>, ContextError> {
                Ok(Some(FoundContext {
                    context: ProjectContext::new("team/app").with_credential("work"),
                    source: "/p/.switchboard.json".into(),
                }))
            }
        }

        let (sb, _) = service_with(Config::default(), Arc::new(Ctx));
        sb.bootstrap(&Secret::new("user-alice"), "").await.unwrap();
        sb.add_token("work", Secret::new("user-bob"), "https://gitlab.work.example")
            .await
            .unwrap();

        let me = sb.whoami(None).await.unwrap();
        assert_eq!(me.connection, "work");
        assert_eq!(me.identity.username, "bob");

        let me = sb.whoami(Some("team/app")).await.unwrap();
        assert_eq!(me.host, "https://gitlab.work.example");

        sb.remove_token("work").unwrap();
        let me = sb.whoami(None).await.unwrap();
        assert_eq!(me.connection, DEFAULT_CONNECTION);
    }

    #[tokio::test]
    async fn test_whoami_without_connections() {
        let (sb, _) = service();
        assert!(matches!(
            sb.whoami(None).await,
            Err(SwitchboardError::Resolve(_))
        ));
    }

    #[tokio::test]
    async fn test_configured_default_connection() {
        let mut config = Config::default();
        config.gitlab.default_connection = Some("personal".to_string());
        let (sb, _) = service_with(config, Arc::new(NoContext));
        assert_eq!(sb.resolver().default_name(), "personal");

        let mut config = Config::default();
        config.gitlab.host = "https://gitlab.example.com".to_string();
        let (sb, _) = service_with(config, Arc::new(NoContext));
        assert_eq!(sb.resolver().default_name(), "https://gitlab.example.com");
    }
}

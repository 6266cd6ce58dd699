//! In-memory credential registry

use super::validation::{ValidationError, ValidationResult};
use crate::connection::{ApiError, Connection, SharedConnection};
use crate::notify::{LogNotifier, Notification, Notifier};
use crate::{Credential, RegistryError};
use chrono::Utc;
use futures_util::future::join_all;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Tokens expiring within this many days trigger a warning
pub const DEFAULT_EXPIRY_WARNING_DAYS: i64 = 30;

/// Result type for store operations
pub type StoreResult<T> = Result<T, RegistryError>;

/// Thread-safe registry of credential metadata
pub struct CredentialStore {
    credentials: RwLock<HashMap<String, Credential>>,
    notifier: Arc<dyn Notifier>,
    expiry_warning_days: i64,
    /// Upper bound on a single identity check
    check_timeout: Option<Duration>,
}

impl CredentialStore {
    /// Create a store that reports lifecycle events to the log only
    pub fn new() -> Self {
        Self::with_notifier(Arc::new(LogNotifier))
    }

    pub fn with_notifier(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            credentials: RwLock::new(HashMap::new()),
            notifier,
            expiry_warning_days: DEFAULT_EXPIRY_WARNING_DAYS,
            check_timeout: None,
        }
    }

    pub fn with_expiry_warning_days(mut self, days: i64) -> Self {
        self.expiry_warning_days = days;
        self
    }

    pub fn with_check_timeout(mut self, timeout: Duration) -> Self {
        self.check_timeout = Some(timeout);
        self
    }

    // ==================== Registry ====================

    /// Add or replace a credential; its name is set to `name`
    pub fn add(&self, name: &str, mut credential: Credential) -> StoreResult<()> {
        if name.is_empty() {
            return Err(RegistryError::InvalidArgument(
                "credential name cannot be empty".to_string(),
            ));
        }

        credential.name = name.to_string();
        self.credentials.write().insert(name.to_string(), credential);
        debug!(name = %name, "Stored credential");
        Ok(())
    }

    /// Get a copy of a credential by name
    pub fn get(&self, name: &str) -> StoreResult<Credential> {
        self.credentials
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(format!("credential '{}'", name)))
    }

    /// Copy of all credentials; changes to it do not affect the store
    pub fn list(&self) -> HashMap<String, Credential> {
        self.credentials.read().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.credentials.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.credentials.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.read().is_empty()
    }

    /// Remove a credential
    pub fn remove(&self, name: &str) -> StoreResult<()> {
        let removed = self.credentials.write().remove(name);
        if removed.is_none() {
            return Err(RegistryError::NotFound(format!("credential '{}'", name)));
        }

        info!(name = %name, "Removed credential");
        Ok(())
    }

    // ==================== Validation ====================

    /// Check a credential's identity through `connection` and record the result
    ///
    /// Unknown names get a fresh entry. The identity check runs with no lock
    /// held.
    pub async fn validate(
        &self,
        name: &str,
        connection: &dyn Connection,
    ) -> Result<Credential, ValidationError> {
        let identity = match self.check_identity(connection).await {
            Ok(identity) => identity,
            Err(e) if e.is_unauthorized() => {
                warn!(name = %name, "Token rejected by GitLab");
                self.notifier.notify(Notification::expired(name));
                return Err(ValidationError::Unauthenticated {
                    name: name.to_string(),
                });
            }
            Err(e) => {
                warn!(name = %name, error = %e, "Token validation failed");
                self.notifier.notify(Notification::issue(name, &e.to_string()));
                return Err(ValidationError::Transient {
                    name: name.to_string(),
                    source: e,
                });
            }
        };

        let updated = {
            let mut credentials = self.credentials.write();
            let credential = credentials
                .entry(name.to_string())
                .or_insert_with(|| Credential::new(name, connection.host()));

            credential.identity = Some(identity);
            credential.last_validated_at = Some(Utc::now());
            credential.expired_flag = false;
            credential.clone()
        };

        if let Some(identity) = &updated.identity {
            self.notifier
                .notify(Notification::validated(name, identity.user_id, &identity.username));
        }
        self.check_expiry(&updated);

        Ok(updated)
    }

    /// Validate every stored credential
    ///
    /// Names are snapshotted under a read lock which is released before any
    /// connection is requested or checked. A failure for one name is recorded
    /// in its result and never aborts the others.
    pub async fn validate_all<F, E>(&self, connection_for: F) -> Vec<ValidationResult>
    where
        F: Fn(&str) -> Result<SharedConnection, E>,
        E: Display,
    {
        let names = self.names();
        debug!(count = names.len(), "Validating all credentials");

        let checks = names.into_iter().map(|name| {
            let connection = connection_for(&name);
            async move {
                match connection {
                    Err(e) => ValidationResult::failure(
                        name,
                        format!("failed to get connection: {}", e),
                        false,
                    ),
                    Ok(connection) => match self.validate(&name, connection.as_ref()).await {
                        Ok(credential) => ValidationResult::success(&credential),
                        Err(e) => ValidationResult::from_error(&e),
                    },
                }
            }
        });

        join_all(checks).await
    }

    async fn check_identity(
        &self,
        connection: &dyn Connection,
    ) -> Result<crate::Identity, ApiError> {
        match self.check_timeout {
            Some(limit) => tokio::time::timeout(limit, connection.who_am_i())
                .await
                .unwrap_or_else(|_| {
                    Err(ApiError::Transport(format!(
                        "identity check timed out after {}s",
                        limit.as_secs()
                    )))
                }),
            None => connection.who_am_i().await,
        }
    }

    fn check_expiry(&self, credential: &Credential) {
        if credential.expires_at.is_none() {
            return;
        }

        if credential.is_expired() {
            self.notifier.notify(Notification::expired(&credential.name));
            return;
        }

        let days = credential.days_until_expiry();
        if days > 0 && days <= self.expiry_warning_days {
            self.notifier
                .notify(Notification::expiring_soon(&credential.name, days));
        }
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{NotificationLevel, NotificationLog};
    use crate::{Identity, PUBLIC_HOST};
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;

    struct FixedConnection {
        result: Result<Identity, ApiError>,
    }

    impl FixedConnection {
        fn ok(user_id: i64, username: &str) -> Self {
            Self {
                result: Ok(Identity {
                    user_id,
                    username: username.to_string(),
                }),
            }
        }

        fn err(e: ApiError) -> Self {
            Self { result: Err(e) }
        }
    }

    #[async_trait]
    impl Connection for FixedConnection {
        fn host(&self) -> &str {
            "https://gitlab.example.com"
        }

        async fn who_am_i(&self) -> Result<Identity, ApiError> {
            self.result.clone()
        }
    }

    /// Never answers; used to exercise the timeout
    struct HangingConnection;

    #[async_trait]
    impl Connection for HangingConnection {
        fn host(&self) -> &str {
            PUBLIC_HOST
        }

        async fn who_am_i(&self) -> Result<Identity, ApiError> {
            std::future::pending().await
        }
    }

    fn store_with_log() -> (CredentialStore, Arc<NotificationLog>) {
        let log = Arc::new(NotificationLog::default());
        (CredentialStore::with_notifier(log.clone()), log)
    }

    #[test]
    fn test_add_sets_name_and_overwrites() {
        let store = CredentialStore::new();
        store
            .add("work", Credential::new("ignored", PUBLIC_HOST))
            .unwrap();
        assert_eq!(store.get("work").unwrap().name, "work");

        store
            .add("work", Credential::new("work", "https://gitlab.example.com"))
            .unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("work").unwrap().host, "https://gitlab.example.com");
    }

    #[test]
    fn test_add_empty_name_rejected() {
        let store = CredentialStore::new();
        let result = store.add("", Credential::new("x", PUBLIC_HOST));
        assert!(matches!(result, Err(RegistryError::InvalidArgument(_))));
        assert!(store.is_empty());
    }

    #[test]
    fn test_list_is_a_copy() {
        let store = CredentialStore::new();
        store.add("work", Credential::new("work", PUBLIC_HOST)).unwrap();

        let mut copy = store.list();
        copy.remove("work");
        copy.insert("rogue".to_string(), Credential::new("rogue", PUBLIC_HOST));

        assert!(store.get("work").is_ok());
        assert!(store.get("rogue").is_err());
    }

    #[test]
    fn test_remove() {
        let store = CredentialStore::new();
        store.add("work", Credential::new("work", PUBLIC_HOST)).unwrap();
        store.remove("work").unwrap();
        assert!(matches!(store.get("work"), Err(RegistryError::NotFound(_))));
        assert!(matches!(store.remove("work"), Err(RegistryError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_validate_creates_unknown_entry() {
        let (store, log) = store_with_log();
        let conn = FixedConnection::ok(7, "alice");

        let cred = store.validate("work", &conn).await.unwrap();
        assert_eq!(cred.name, "work");
        assert_eq!(cred.host, "https://gitlab.example.com");
        assert_eq!(
            cred.identity,
            Some(Identity {
                user_id: 7,
                username: "alice".to_string()
            })
        );
        assert!(cred.last_validated_at.is_some());
        assert!(store.get("work").is_ok());

        let notes = log.recent();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].title, "Token Validated");
    }

    #[tokio::test]
    async fn test_validate_updates_existing_entry() {
        let (store, _log) = store_with_log();
        let mut existing = Credential::new("work", "https://gitlab.example.com").with_secret("s");
        existing.expired_flag = true;
        let created_at = existing.created_at;
        store.add("work", existing).unwrap();

        let cred = store
            .validate("work", &FixedConnection::ok(1, "bob"))
            .await
            .unwrap();
        assert!(!cred.expired_flag);
        assert_eq!(cred.created_at, created_at);
        assert!(cred.secret.is_some());
        assert_eq!(store.get("work").unwrap().identity.unwrap().username, "bob");
    }

    #[tokio::test]
    async fn test_validate_unauthorized() {
        let (store, log) = store_with_log();
        let err = store
            .validate("work", &FixedConnection::err(ApiError::Unauthorized))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            ValidationError::Unauthenticated {
                name: "work".to_string()
            }
        );
        assert!(store.is_empty());
        assert_eq!(log.recent()[0].level, NotificationLevel::Error);
    }

    #[tokio::test]
    async fn test_validate_transient() {
        let (store, log) = store_with_log();
        let err = store
            .validate("work", &FixedConnection::err(ApiError::Status(502)))
            .await
            .unwrap_err();

        assert!(matches!(err, ValidationError::Transient { .. }));
        assert!(!err.is_unauthenticated());
        assert_eq!(log.recent()[0].title, "Token Issue Detected");
    }

    #[tokio::test]
    async fn test_validate_times_out_as_transient() {
        let store = CredentialStore::new().with_check_timeout(Duration::from_millis(20));
        let err = store.validate("slow", &HangingConnection).await.unwrap_err();
        assert!(matches!(err, ValidationError::Transient { .. }));
    }

    #[tokio::test]
    async fn test_expiring_soon_notification() {
        let (store, log) = store_with_log();
        let cred = Credential::new("work", PUBLIC_HOST)
            .with_expires_at(Utc::now() + ChronoDuration::days(10) + ChronoDuration::hours(1));
        store.add("work", cred).unwrap();

        store
            .validate("work", &FixedConnection::ok(1, "a"))
            .await
            .unwrap();

        let titles: Vec<_> = log.recent().into_iter().map(|n| n.title).collect();
        assert_eq!(titles, vec!["Token Validated", "Token Expiring Soon"]);
    }

    #[tokio::test]
    async fn test_past_expiry_notification() {
        let (store, log) = store_with_log();
        let cred = Credential::new("work", PUBLIC_HOST)
            .with_expires_at(Utc::now() - ChronoDuration::days(2));
        store.add("work", cred).unwrap();

        let updated = store
            .validate("work", &FixedConnection::ok(1, "a"))
            .await
            .unwrap();
        assert!(updated.is_expired());

        let last = log.recent().pop().unwrap();
        assert_eq!(last.title, "Token Expired");
    }

    #[tokio::test]
    async fn test_validate_all_mixed_results() {
        let (store, _log) = store_with_log();
        for name in ["good", "rejected", "missing"] {
            store.add(name, Credential::new(name, PUBLIC_HOST)).unwrap();
        }

        let results = store
            .validate_all(|name| -> Result<SharedConnection, String> {
                match name {
                    "good" => Ok(Arc::new(FixedConnection::ok(1, "a"))),
                    "rejected" => Ok(Arc::new(FixedConnection::err(ApiError::Unauthorized))),
                    _ => Err("no connection".to_string()),
                }
            })
            .await;

        assert_eq!(results.len(), 3);
        let by_name: HashMap<_, _> = results.into_iter().map(|r| (r.name.clone(), r)).collect();

        assert!(by_name["good"].success);
        assert!(!by_name["rejected"].success);
        assert!(by_name["rejected"].is_expired);
        assert!(!by_name["missing"].success);
        assert!(by_name["missing"]
            .error
            .as_deref()
            .unwrap()
            .starts_with("failed to get connection"));
    }

    #[tokio::test]
    async fn test_validate_all_with_failing_resolver() {
        let store = CredentialStore::new();
        for i in 0..5 {
            let name = format!("t{}", i);
            store.add(&name, Credential::new(&name, PUBLIC_HOST)).unwrap();
        }

        let results = store
            .validate_all(|name| -> Result<SharedConnection, String> {
                Err(format!("client '{}' not found", name))
            })
            .await;

        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|r| !r.success && r.error.is_some()));
    }

    #[test]
    fn test_concurrent_adds_on_disjoint_keys() {
        let store = Arc::new(CredentialStore::new());
        let threads: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let name = format!("token-{}", i);
                    store.add(&name, Credential::new(&name, PUBLIC_HOST)).unwrap();
                    store.get(&name).unwrap();
                    store.list();
                })
            })
            .collect();

        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(store.len(), 16);
    }
}

//! Lifecycle notifications
//!
//! Credential validation emits notifications for the user and the AI client.
//! They are logged through `tracing` and retained in a bounded in-memory log
//! that is injected where needed rather than kept in a global.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use tracing::{error, info, warn};

/// Default number of notifications retained
pub const DEFAULT_CAPACITY: usize = 100;

/// Severity of a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for NotificationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationLevel::Info => write!(f, "INFO"),
            NotificationLevel::Warning => write!(f, "WARNING"),
            NotificationLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// A message addressed to both the user and the AI client
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_name: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        level: NotificationLevel,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            level,
            title: title.into(),
            message: message.into(),
            credential_name: None,
            timestamp: Utc::now(),
        }
    }

    pub fn for_credential(mut self, name: impl Into<String>) -> Self {
        self.credential_name = Some(name.into());
        self
    }

    /// A credential passed its identity check
    pub fn validated(name: &str, user_id: i64, username: &str) -> Self {
        Self::new(
            NotificationLevel::Info,
            "Token Validated",
            format!(
                "Token '{}' validated successfully for user {} (ID: {})",
                name, username, user_id
            ),
        )
        .for_credential(name)
    }

    /// A credential check failed for a reason other than rejection
    pub fn issue(name: &str, reason: &str) -> Self {
        Self::new(
            NotificationLevel::Warning,
            "Token Issue Detected",
            format!("Token '{}' has a problem: {}", name, reason),
        )
        .for_credential(name)
    }

    /// A credential was rejected or is past its expiry
    pub fn expired(name: &str) -> Self {
        Self::new(
            NotificationLevel::Error,
            "Token Expired",
            format!(
                "Token '{}' is expired or invalid. Update it with the update_token tool \
                 or restart with a new token.",
                name
            ),
        )
        .for_credential(name)
    }

    /// A credential will expire within the warning window
    pub fn expiring_soon(name: &str, days: i64) -> Self {
        Self::new(
            NotificationLevel::Warning,
            "Token Expiring Soon",
            format!(
                "Token '{}' will expire in {} days. Create a new token and update it.",
                name, days
            ),
        )
        .for_credential(name)
    }
}

/// Receiver of lifecycle notifications
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Notifier that only logs
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        log_notification(&notification);
    }
}

/// Bounded notification log, oldest entries dropped first
#[derive(Debug)]
pub struct NotificationLog {
    entries: Mutex<VecDeque<Notification>>,
    capacity: usize,
}

impl NotificationLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Copy of the retained notifications, oldest first
    pub fn recent(&self) -> Vec<Notification> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for NotificationLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Notifier for NotificationLog {
    fn notify(&self, notification: Notification) {
        log_notification(&notification);

        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(notification);
    }
}

fn log_notification(n: &Notification) {
    let credential = n.credential_name.as_deref().unwrap_or("-");
    match n.level {
        NotificationLevel::Error => {
            error!(credential = %credential, "[{}] {}: {}", n.level, n.title, n.message)
        }
        NotificationLevel::Warning => {
            warn!(credential = %credential, "[{}] {}: {}", n.level, n.title, n.message)
        }
        NotificationLevel::Info => {
            info!(credential = %credential, "[{}] {}: {}", n.level, n.title, n.message)
        }
    }
}

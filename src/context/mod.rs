//! Project context
//!
//! A small JSON file (`.switchboard.json`) placed in a project directory tells
//! the resolver which credential or host work in that directory should use.
//! It is found by walking up from the working directory, the same way git
//! finds `.git`.

mod file;
mod git;

pub use file::{write_project_context, FileContextProvider, CONTEXT_FILE_NAME};
pub use git::{detect_from_git, parse_remote_url};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Project context errors
#[derive(Error, Debug)]
pub enum ContextError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Not a git repository (or any parent up to the root)")]
    NotGitRepository,

    #[error("No GitLab remote found in {0}")]
    NoRemote(PathBuf),

    #[error("Unsupported remote: {0}")]
    UnsupportedRemote(String),
}

/// Hints describing which connection a project should use
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectContext {
    /// Project path on the server (e.g. "group/repo")
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl ProjectContext {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Default::default()
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_credential(mut self, name: impl Into<String>) -> Self {
        self.credential_name = Some(name.into());
        self
    }
}

/// A located project context and the file it came from
#[derive(Debug, Clone)]
pub struct FoundContext {
    pub context: ProjectContext,
    pub source: PathBuf,
}

/// Source of project context for the resolver
#[async_trait]
pub trait ProjectContextProvider: Send + Sync {
    /// Find the context for the current unit of work
    ///
    /// `Ok(None)` means no context exists; the resolver treats that and an
    /// error the same way.
    async fn find(&self) -> Result<Option<FoundContext>, ContextError>;
}

/// Provider that never finds a context
#[derive(Debug, Default)]
pub struct NoContext;

#[async_trait]
impl ProjectContextProvider for NoContext {
    async fn find(&self) -> Result<Option<FoundContext>, ContextError> {
        Ok(None)
    }
}

//! File-backed project context

use super::{ContextError, FoundContext, ProjectContext, ProjectContextProvider};
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Name of the per-project context file
pub const CONTEXT_FILE_NAME: &str = ".switchboard.json";

/// Looks for the context file in a directory and its ancestors
#[derive(Debug, Clone)]
pub struct FileContextProvider {
    start_dir: PathBuf,
}

impl FileContextProvider {
    pub fn new(start_dir: impl Into<PathBuf>) -> Self {
        Self {
            start_dir: start_dir.into(),
        }
    }

    /// Provider rooted at the process working directory
    pub fn from_current_dir() -> Result<Self, ContextError> {
        Ok(Self::new(std::env::current_dir()?))
    }

    pub fn start_dir(&self) -> &Path {
        &self.start_dir
    }
}

#[async_trait]
impl ProjectContextProvider for FileContextProvider {
    async fn find(&self) -> Result<Option<FoundContext>, ContextError> {
        for dir in self.start_dir.ancestors() {
            let path = dir.join(CONTEXT_FILE_NAME);
            if !fs::try_exists(&path).await.unwrap_or(false) {
                continue;
            }

            debug!(path = %path.display(), "Found project context");
            let context = read_project_context(&path).await?;
            return Ok(Some(FoundContext {
                context,
                source: path,
            }));
        }

        Ok(None)
    }
}

async fn read_project_context(path: &Path) -> Result<ProjectContext, ContextError> {
    let content = fs::read_to_string(path).await?;
    serde_json::from_str(&content).map_err(|e| ContextError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Write `context` into `dir`, stamping `last_updated`; returns the file path
pub async fn write_project_context(
    dir: impl AsRef<Path>,
    context: &ProjectContext,
) -> Result<PathBuf, ContextError> {
    let mut context = context.clone();
    context.last_updated = Some(Utc::now());

    let path = dir.as_ref().join(CONTEXT_FILE_NAME);
    let data = serde_json::to_string_pretty(&context).map_err(|e| ContextError::Parse {
        path: path.clone(),
        message: e.to_string(),
    })?;

    fs::write(&path, data).await?;
    debug!(path = %path.display(), "Wrote project context");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_find_walks_up() {
        let root = tempdir().unwrap();
        let nested = root.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let ctx = ProjectContext::new("group/repo").with_credential("work");
        let written = write_project_context(root.path(), &ctx).await.unwrap();

        let found = FileContextProvider::new(&nested).find().await.unwrap().unwrap();
        assert_eq!(found.source, written);
        assert_eq!(found.context.project_id, "group/repo");
        assert_eq!(found.context.credential_name.as_deref(), Some("work"));
        assert!(found.context.last_updated.is_some());
    }

    #[tokio::test]
    async fn test_nearest_file_wins() {
        let root = tempdir().unwrap();
        let nested = root.path().join("sub");
        std::fs::create_dir_all(&nested).unwrap();

        write_project_context(root.path(), &ProjectContext::new("outer"))
            .await
            .unwrap();
        write_project_context(&nested, &ProjectContext::new("inner"))
            .await
            .unwrap();

        let found = FileContextProvider::new(&nested).find().await.unwrap().unwrap();
        assert_eq!(found.context.project_id, "inner");
    }

    #[tokio::test]
    async fn test_invalid_json_is_error() {
        let root = tempdir().unwrap();
        std::fs::write(root.path().join(CONTEXT_FILE_NAME), "{not json").unwrap();

        let result = FileContextProvider::new(root.path()).find().await;
        assert!(matches!(result, Err(ContextError::Parse { .. })));
    }

    #[test]
    fn test_optional_fields_default() {
        let ctx: ProjectContext = serde_json::from_str(r#"{"project_id":"g/r"}"#).unwrap();
        assert_eq!(ctx.project_id, "g/r");
        assert!(ctx.host.is_none());
        assert!(ctx.credential_name.is_none());
    }
}

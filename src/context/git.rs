//! Infer project context from git remotes

use super::{ContextError, ProjectContext};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Detect the GitLab project for the repository containing `start_dir`
///
/// Reads `.git/config` of the nearest repository and uses the first remote
/// whose URL names a project.
pub async fn detect_from_git(start_dir: impl AsRef<Path>) -> Result<ProjectContext, ContextError> {
    let git_dir = find_git_dir(start_dir.as_ref())
        .await
        .ok_or(ContextError::NotGitRepository)?;

    let config_path = git_dir.join("config");
    let content = fs::read_to_string(&config_path).await?;

    for url in remote_urls(&content) {
        if let Some((project_id, host)) = parse_remote_url(url)? {
            return Ok(ProjectContext::new(project_id).with_host(host));
        }
    }

    Err(ContextError::NoRemote(config_path))
}

async fn find_git_dir(start: &Path) -> Option<PathBuf> {
    for dir in start.ancestors() {
        let candidate = dir.join(".git");
        if let Ok(meta) = fs::metadata(&candidate).await {
            if meta.is_dir() {
                return Some(candidate);
            }
        }
    }
    None
}

/// `url = ...` values inside `[remote "..."]` sections, in file order
fn remote_urls(config: &str) -> Vec<&str> {
    let mut in_remote = false;
    let mut urls = Vec::new();

    for line in config.lines() {
        let line = line.trim();
        if line.starts_with('[') {
            in_remote = line.starts_with("[remote ");
            continue;
        }
        if !in_remote {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            if key.trim() == "url" {
                urls.push(value.trim());
            }
        }
    }

    urls
}

/// Split a remote URL into `(project_id, host)`
///
/// Supports `https://host/group/repo(.git)` and `git@host:group/repo(.git)`.
/// GitHub remotes are rejected. Unrecognised forms yield `Ok(None)`.
pub fn parse_remote_url(url: &str) -> Result<Option<(String, String)>, ContextError> {
    if url.to_lowercase().contains("github.com") {
        return Err(ContextError::UnsupportedRemote(format!(
            "GitHub repository detected: {}; only GitLab remotes are supported",
            url
        )));
    }

    let (host, path) = if let Some(rest) = url.strip_prefix("https://") {
        match rest.split_once('/') {
            Some(parts) => parts,
            None => return Ok(None),
        }
    } else if let Some(rest) = url.strip_prefix("git@") {
        match rest.split_once(':') {
            Some(parts) => parts,
            None => return Ok(None),
        }
    } else {
        return Ok(None);
    };

    let project_id = path.trim_end_matches('/').trim_end_matches(".git");
    if host.is_empty() || project_id.is_empty() {
        return Ok(None);
    }

    Ok(Some((project_id.to_string(), format!("https://{}", host))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_https_remote() {
        let parsed = parse_remote_url("https://gitlab.example.com/team/app.git").unwrap();
        assert_eq!(
            parsed,
            Some((
                "team/app".to_string(),
                "https://gitlab.example.com".to_string()
            ))
        );
    }

    #[test]
    fn test_parse_ssh_remote() {
        let parsed = parse_remote_url("git@gitlab.com:group/sub/repo.git").unwrap();
        assert_eq!(
            parsed,
            Some(("group/sub/repo".to_string(), "https://gitlab.com".to_string()))
        );
    }

    #[test]
    fn test_github_rejected() {
        assert!(matches!(
            parse_remote_url("git@github.com:owner/repo.git"),
            Err(ContextError::UnsupportedRemote(_))
        ));
    }

    #[test]
    fn test_unknown_scheme_ignored() {
        assert_eq!(parse_remote_url("/srv/git/repo.git").unwrap(), None);
    }

    #[test]
    fn test_remote_urls_only_from_remote_sections() {
        let config = r#"
[core]
    url = https://ignored.example.com/x/y
[remote "origin"]
    url = git@gitlab.example.com:team/app.git
    fetch = +refs/heads/*:refs/remotes/origin/*
[branch "main"]
    remote = origin
"#;
        assert_eq!(remote_urls(config), vec!["git@gitlab.example.com:team/app.git"]);
    }

    #[tokio::test]
    async fn test_detect_from_git() {
        let root = tempdir().unwrap();
        let git_dir = root.path().join(".git");
        std::fs::create_dir_all(&git_dir).unwrap();
        std::fs::write(
            git_dir.join("config"),
            "[remote \"origin\"]\n\turl = https://gitlab.example.com/team/app.git\n",
        )
        .unwrap();
        let nested = root.path().join("src");
        std::fs::create_dir_all(&nested).unwrap();

        let ctx = detect_from_git(&nested).await.unwrap();
        assert_eq!(ctx.project_id, "team/app");
        assert_eq!(ctx.host.as_deref(), Some("https://gitlab.example.com"));
    }

    #[tokio::test]
    async fn test_detect_without_remote() {
        let root = tempdir().unwrap();
        let git_dir = root.path().join(".git");
        std::fs::create_dir_all(&git_dir).unwrap();
        std::fs::write(git_dir.join("config"), "[core]\n\tbare = false\n").unwrap();

        let result = detect_from_git(root.path()).await;
        assert!(matches!(result, Err(ContextError::NoRemote(_))));
    }
}

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

const GIT_HOSTS: [&str; 3] = ["github.com", "gitlab.com", "bitbucket.org"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TargetKind {
    Repository { url: String },
    LocalCode { path: PathBuf },
    WebApplication { url: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub raw: String,
    pub kind: TargetKind,
    /// Directory under `/workspace` holding this target's source, if any
    pub workspace_subdir: Option<String>,
}

impl Target {
    pub fn is_source(&self) -> bool {
        matches!(
            self.kind,
            TargetKind::Repository { .. } | TargetKind::LocalCode { .. }
        )
    }

    pub fn is_web(&self) -> bool {
        matches!(self.kind, TargetKind::WebApplication { .. })
    }

    /// Name the workspace subdirectory would get before de-duplication
    pub fn base_name(&self) -> Option<String> {
        match &self.kind {
            TargetKind::Repository { url } => Some(repo_base_name(url)),
            TargetKind::LocalCode { path } => Some(sanitize_name(
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .as_deref()
                    .unwrap_or("workspace"),
            )),
            TargetKind::WebApplication { .. } => None,
        }
    }

    /// Path inside the sandbox where the source is found
    pub fn workspace_path(&self) -> Option<String> {
        self.workspace_subdir
            .as_ref()
            .map(|sub| format!("/workspace/{sub}"))
    }
}

/// Classify a user-supplied target string
pub fn infer_target(input: &str) -> Result<Target> {
    let raw = input.trim();
    if raw.is_empty() {
        return Err(Error::InvalidTarget("target must be a non-empty string".to_string()));
    }
    let target = |kind| Target {
        raw: raw.to_string(),
        kind,
        workspace_subdir: None,
    };

    let lower = raw.to_lowercase();
    let bare_repo = GIT_HOSTS
        .iter()
        .any(|host| lower.starts_with(&format!("{host}/")) || lower.starts_with(&format!("www.{host}/")));
    if bare_repo {
        return Ok(target(TargetKind::Repository {
            url: format!("https://{raw}"),
        }));
    }

    if lower.starts_with("http://") || lower.starts_with("https://") {
        let url = Url::parse(raw).map_err(|e| Error::InvalidTarget(format!("{raw}: {e}")))?;
        let host = url.host_str().unwrap_or_default().to_lowercase();
        if GIT_HOSTS.iter().any(|h| host.contains(h)) {
            return Ok(target(TargetKind::Repository { url: raw.to_string() }));
        }
        return Ok(target(TargetKind::WebApplication { url: raw.to_string() }));
    }

    let path = expand_home(raw);
    if path.exists() {
        if !path.is_dir() {
            return Err(Error::InvalidTarget(format!(
                "path exists but is not a directory: {raw}"
            )));
        }
        let resolved = path.canonicalize()?;
        return Ok(target(TargetKind::LocalCode { path: resolved }));
    }

    if raw.starts_with("git@") || raw.ends_with(".git") {
        return Ok(target(TargetKind::Repository { url: raw.to_string() }));
    }

    if raw.contains('.')
        && !raw.contains('/')
        && !raw.starts_with('.')
        && raw.split('.').all(|part| !part.trim().is_empty())
    {
        return Ok(target(TargetKind::WebApplication {
            url: format!("https://{raw}"),
        }));
    }

    Err(Error::InvalidTarget(format!(
        "{raw} (expected an http(s) URL, a git repository, a local directory or a domain name)"
    )))
}

fn expand_home(raw: &str) -> PathBuf {
    match raw.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(raw)),
        None => PathBuf::from(raw),
    }
}

/// Replace anything outside `[A-Za-z0-9._-]` with `-`
pub fn sanitize_name(name: &str) -> String {
    let sanitized: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    if sanitized.is_empty() {
        "target".to_string()
    } else {
        sanitized
    }
}

fn repo_base_name(url: &str) -> String {
    let url = url.trim_end_matches('/');
    let path_part = match url.strip_prefix("git@") {
        Some(rest) => rest
            .split_once(':')
            .map_or(rest, |(_, path)| path)
            .to_string(),
        None => Url::parse(url)
            .ok()
            .map(|u| u.path().to_string())
            .filter(|p| !p.is_empty() && p != "/")
            .unwrap_or_else(|| url.to_string()),
    };
    let candidate = Path::new(path_part.trim_end_matches('/'))
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let candidate = candidate.strip_suffix(".git").unwrap_or(&candidate);
    sanitize_name(if candidate.is_empty() {
        "repository"
    } else {
        candidate
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_https_url() {
        let target = infer_target("https://example.com").unwrap();
        assert!(matches!(target.kind, TargetKind::WebApplication { url } if url == "https://example.com"));
    }

    #[test]
    fn test_infer_bare_domain_as_web() {
        let target = infer_target("example.com").unwrap();
        assert!(matches!(target.kind, TargetKind::WebApplication { url } if url == "https://example.com"));
    }

    #[test]
    fn test_infer_github_url() {
        let target = infer_target("https://github.com/owner/repo").unwrap();
        assert!(matches!(target.kind, TargetKind::Repository { .. }));
        assert_eq!(target.base_name().as_deref(), Some("repo"));
    }

    #[test]
    fn test_infer_bare_github_path() {
        let target = infer_target("github.com/owner/shop").unwrap();
        assert!(matches!(target.kind, TargetKind::Repository { url } if url == "https://github.com/owner/shop"));
    }

    #[test]
    fn test_infer_git_ssh_url() {
        let target = infer_target("git@github.com:owner/api.git").unwrap();
        assert!(matches!(target.kind, TargetKind::Repository { .. }));
        assert_eq!(target.base_name().as_deref(), Some("api"));
    }

    #[test]
    fn test_infer_local_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = infer_target(dir.path().to_str().unwrap()).unwrap();
        assert!(target.is_source());
        assert!(matches!(target.kind, TargetKind::LocalCode { .. }));
    }

    #[test]
    fn test_infer_existing_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("notes.txt");
        std::fs::write(&file, "x").unwrap();
        assert!(matches!(
            infer_target(file.to_str().unwrap()),
            Err(Error::InvalidTarget(_))
        ));
    }

    #[test]
    fn test_infer_rejects_garbage() {
        for input in ["", "   ", "localhost", "./missing/dir", "a..b"] {
            assert!(
                matches!(infer_target(input), Err(Error::InvalidTarget(_))),
                "{input:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("my repo!"), "my-repo-");
        assert_eq!(sanitize_name(""), "target");
        assert_eq!(sanitize_name("api_v2.1"), "api_v2.1");
    }
}

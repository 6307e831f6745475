//! Repository identity: a stable 12-hex `repo_id` plus environment
//! classification, independent of where the worktree happens to be mounted.

use std::path::Path;

use git2::Repository;
use sha2::{Digest, Sha256};

use crate::error::{CoreError, ErrorKind, Result};

/// A pure function of its input, per spec: identical inputs on any host
/// produce identical IDs. Never embeds host-local state such as a PID or
/// timestamp.
pub fn repo_id(worktree_root: &Path) -> Result<String> {
    let canonical = worktree_root
        .canonicalize()
        .map_err(|_| CoreError::new(ErrorKind::NoIdentity, format!("{} does not exist", worktree_root.display())))?;

    let basis = remote_url(&canonical).unwrap_or_else(|| canonical.to_string_lossy().into_owned());
    Ok(hash_prefix(&normalize_identity_basis(&basis)))
}

/// Best-effort read of `origin`'s URL from the worktree's VCS metadata.
/// Returns `None` when there is no repository or no remote configured —
/// the caller falls back to the worktree path.
fn remote_url(worktree_root: &Path) -> Option<String> {
    let repo = Repository::discover(worktree_root).ok()?;
    let remote = repo.find_remote("origin").ok()?;
    remote.url().map(str::to_string)
}

/// Strip trailing slashes, lowercase scheme/host, drop a trailing `.git`
/// suffix — so `https://Example.com/org/repo.git/` and
/// `https://example.com/org/repo` hash identically.
fn normalize_identity_basis(basis: &str) -> String {
    let mut s = basis.trim_end_matches('/').to_string();
    if let Some(stripped) = s.strip_suffix(".git") {
        s = stripped.to_string();
    }
    if let Some((scheme_host, rest)) = split_scheme_host(&s) {
        s = format!("{}{}", scheme_host.to_lowercase(), rest);
    }
    s
}

/// Split `scheme://host` from the remainder of a URL-shaped string so only
/// that prefix gets lowercased; path components (which may be
/// case-sensitive on some hosts) are left untouched. Non-URL-shaped input
/// (a plain filesystem path) is returned as `None` and left alone.
fn split_scheme_host(s: &str) -> Option<(&str, &str)> {
    let scheme_end = s.find("://")? + 3;
    let host_end = s[scheme_end..].find('/').map(|i| scheme_end + i).unwrap_or(s.len());
    Some((&s[..host_end], &s[host_end..]))
}

fn hash_prefix(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex_encode(&digest)[..12].to_string()
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Observational environment classification; pure, no side effects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    pub is_container: bool,
    pub is_ci: bool,
    pub is_test: bool,
    pub is_git_worktree: bool,
    pub workspace_root: Option<std::path::PathBuf>,
    pub project_name: Option<String>,
}

/// Inspects well-known markers the same way the multi-path discovery
/// config does: a container marker file, CI env flags, a test-runtime
/// flag, and a well-known multi-project root directory.
pub fn classify_environment(worktree_root: &Path) -> Environment {
    let mut env = Environment {
        is_container: Path::new("/.dockerenv").exists() || std::env::var_os("DOCKER_CONTAINER").is_some(),
        is_ci: std::env::var_os("CI").is_some() || std::env::var_os("GITHUB_ACTIONS").is_some(),
        is_test: std::env::var_os("PYTEST_CURRENT_TEST").is_some()
            || std::env::var_os("CARGO_TEST").is_some()
            || worktree_root.to_string_lossy().contains("test"),
        is_git_worktree: worktree_root.join(".git").exists(),
        workspace_root: None,
        project_name: None,
    };

    if let Some(ws) = std::env::var_os("GITHUB_WORKSPACE").or_else(|| std::env::var_os("WORKSPACE_ROOT")) {
        env.workspace_root = Some(std::path::PathBuf::from(ws));
    } else if let Ok(entries) = std::fs::read_dir("/workspaces") {
        if let Some(first) = entries.flatten().next() {
            env.project_name = first.file_name().to_str().map(str::to_string);
            env.workspace_root = Some(first.path());
        }
    }

    env
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_id_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let a = repo_id(dir.path()).unwrap();
        let b = repo_id(dir.path()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 12);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn missing_worktree_is_no_identity() {
        let err = repo_id(Path::new("/does/not/exist/at/all")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoIdentity);
    }

    #[test]
    fn normalization_folds_case_and_git_suffix() {
        let a = normalize_identity_basis("https://Example.com/org/Repo.git/");
        let b = normalize_identity_basis("https://example.com/org/Repo");
        assert_eq!(a, b);
    }

    #[test]
    fn classify_environment_detects_git_worktree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        let env = classify_environment(dir.path());
        assert!(env.is_git_worktree);
    }
}

//! Multi-path index discovery: given a worktree, produce an ordered list of
//! candidate index locations, validate them, and cache the first valid hit.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::identity::Environment;
use crate::registry::{ArtifactRegistry, ArtifactSource};

const DEFAULT_SEARCH_PATHS: &[&str] = &[
    ".indexes/{repo_hash}",
    ".mcp-index",
    "/workspaces/{project}/.indexes",
    "test_indexes/{repo}",
    "~/.mcp/indexes/{repo_hash}",
    "/tmp/mcp-indexes/{repo_hash}",
];

/// Required width of a `repo_id`. Per the open question in the design
/// notes: the source shows both 12- and 16-hex variants; this
/// implementation settles on 12 and rejects the other on read.
const REPO_ID_HEX_WIDTH: usize = 12;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    path: PathBuf,
    commit: Option<String>,
    model: Option<String>,
}

/// Locates the on-disk store directory for a repository across
/// heterogeneous environments (container, host, CI, user-home).
pub struct IndexDiscovery<'a> {
    search_paths: Vec<String>,
    environment: Environment,
    cwd: PathBuf,
    cache_path: PathBuf,
    registry: Option<&'a ArtifactRegistry>,
}

impl<'a> IndexDiscovery<'a> {
    pub fn new(
        custom_paths: Option<Vec<String>>,
        environment: Environment,
        cwd: PathBuf,
        cache_path: PathBuf,
        registry: Option<&'a ArtifactRegistry>,
    ) -> Self {
        let search_paths = custom_paths.unwrap_or_else(|| DEFAULT_SEARCH_PATHS.iter().map(|s| s.to_string()).collect());
        Self { search_paths, environment, cwd, cache_path, registry }
    }

    /// Expand all configured templates for a given repo identifier,
    /// skipping any whose required variable is unavailable, deduplicating
    /// while preserving priority order.
    pub fn search_paths(&self, repo_identifier: Option<&str>) -> Vec<PathBuf> {
        let repo_hash = repo_identifier.and_then(|id| repo_hash_of(id));
        let repo_name = repo_identifier.map(repo_name_of);

        let mut paths = Vec::new();
        for template in &self.search_paths {
            let Some(expanded) = expand_template(template, repo_hash.as_deref(), repo_name.as_deref(), self.environment.project_name.as_deref()) else {
                continue;
            };
            paths.push(self.make_absolute(&expanded));
        }

        if let Some(ws) = &self.environment.workspace_root {
            let ws_indexes = ws.join(".indexes");
            if !paths.contains(&ws_indexes) {
                paths.insert(0, ws_indexes);
            }
        }

        let mut seen = std::collections::HashSet::new();
        paths.retain(|p| seen.insert(p.clone()));
        paths
    }

    fn make_absolute(&self, template_expanded: &str) -> PathBuf {
        let expanded = if let Some(rest) = template_expanded.strip_prefix('~') {
            match std::env::var_os("HOME") {
                Some(home) => format!("{}{}", PathBuf::from(home).display(), rest),
                None => template_expanded.to_string(),
            }
        } else {
            template_expanded.to_string()
        };
        let p = PathBuf::from(expanded);
        if p.is_absolute() {
            p
        } else {
            self.cwd.join(p)
        }
    }

    /// Resolution order: artifact registry best-match, then discovery
    /// cache, then the expanded template list. Side-effect-free except for
    /// cache updates: repeated calls on unchanged state produce the same
    /// result.
    pub fn resolve(&self, repo_id: &str) -> Option<PathBuf> {
        if repo_id.len() != REPO_ID_HEX_WIDTH || !repo_id.chars().all(|c| c.is_ascii_hexdigit()) {
            tracing::warn!("rejecting repo_id of unsupported width: {repo_id}");
            return None;
        }

        if let Some(registry) = self.registry {
            if let Some(record) = registry.find_best_match(repo_id, None) {
                if record.path.exists() {
                    self.cache_discovery(repo_id, &record.path, record.commit.clone(), Some(record.model.clone()));
                    return Some(record.path);
                }
            }
        }

        if let Some(cached) = self.cached_entry(repo_id) {
            if cached.path.exists() && is_readable_store(&cached.path) {
                return Some(cached.path);
            }
        }

        for candidate in self.search_paths(Some(repo_id)) {
            if candidate.exists() && is_readable_store(&candidate) {
                self.cache_discovery(repo_id, &candidate, None, None);
                return Some(candidate);
            }
        }

        None
    }

    fn cache_discovery(&self, repo_id: &str, path: &Path, commit: Option<String>, model: Option<String>) {
        if let Some(registry) = self.registry {
            let _ = registry.add_or_update(
                repo_id,
                model.as_deref().unwrap_or("default"),
                commit.as_deref().unwrap_or("unknown"),
                path,
                commit.clone(),
                Default::default(),
                ArtifactSource::Discovery,
            );
        }

        let mut cache = self.load_cache();
        cache.insert(repo_id.to_string(), CacheEntry { path: path.to_path_buf(), commit, model });
        self.save_cache(&cache);
    }

    fn cached_entry(&self, repo_id: &str) -> Option<CacheEntry> {
        self.load_cache().get(repo_id).cloned()
    }

    fn load_cache(&self) -> HashMap<String, CacheEntry> {
        std::fs::read_to_string(&self.cache_path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    fn save_cache(&self, cache: &HashMap<String, CacheEntry>) {
        let Ok(serialized) = serde_json::to_vec_pretty(cache) else { return };
        let tmp = self.cache_path.with_extension("tmp");
        if std::fs::write(&tmp, serialized).is_ok() {
            let _ = std::fs::rename(&tmp, &self.cache_path);
        }
    }
}

fn expand_template(template: &str, repo_hash: Option<&str>, repo_name: Option<&str>, project: Option<&str>) -> Option<String> {
    let mut path = template.to_string();
    if path.contains("{repo_hash}") {
        path = path.replace("{repo_hash}", repo_hash?);
    }
    if path.contains("{repo}") {
        path = path.replace("{repo}", repo_name?);
    }
    if path.contains("{project}") {
        path = path.replace("{project}", project?);
    }
    Some(path)
}

/// A store directory is "readable" when it contains the database file the
/// storage engine expects to open.
fn is_readable_store(candidate: &Path) -> bool {
    candidate.join("code_index.db").is_file() || candidate.is_file()
}

fn repo_hash_of(identifier: &str) -> Option<String> {
    if (12..=16).contains(&identifier.len()) && identifier.chars().all(|c| c.is_ascii_hexdigit()) {
        return Some(identifier.to_string());
    }
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(identifier.as_bytes());
    Some(digest.iter().map(|b| format!("{b:02x}")).collect::<String>()[..12].to_string())
}

fn repo_name_of(identifier: &str) -> String {
    if let Some(idx) = identifier.rfind('/') {
        let tail = &identifier[idx + 1..];
        return tail.strip_suffix(".git").unwrap_or(tail).to_string();
    }
    identifier.to_string()
}

pub const fn repo_id_hex_width() -> usize {
    REPO_ID_HEX_WIDTH
}

#[cfg(test)]
mod tests {
    use super::*;

    fn discovery(registry: Option<&ArtifactRegistry>, cache_path: PathBuf, cwd: PathBuf) -> IndexDiscovery<'_> {
        IndexDiscovery::new(None, Environment::default(), cwd, cache_path, registry)
    }

    #[test]
    fn templates_skip_when_variable_missing() {
        let dir = tempfile::tempdir().unwrap();
        let d = discovery(None, dir.path().join("cache.json"), dir.path().to_path_buf());
        let paths = d.search_paths(None);
        // repo/repo_hash/project templates are all skipped without an identifier.
        assert!(paths.is_empty());
    }

    #[test]
    fn templates_expand_with_identifier() {
        let dir = tempfile::tempdir().unwrap();
        let d = discovery(None, dir.path().join("cache.json"), dir.path().to_path_buf());
        let paths = d.search_paths(Some("abc123abc123"));
        assert!(paths.iter().any(|p| p.ends_with("abc123abc123")));
    }

    #[test]
    fn resolve_falls_back_through_templates_to_legacy_location() {
        let dir = tempfile::tempdir().unwrap();
        let legacy = dir.path().join(".mcp-index");
        std::fs::create_dir_all(&legacy).unwrap();
        std::fs::write(legacy.join("code_index.db"), b"").unwrap();

        let d = discovery(None, dir.path().join("cache.json"), dir.path().to_path_buf());
        let resolved = d.resolve("deadbeefdead").unwrap();
        assert_eq!(resolved, legacy);
    }

    #[test]
    fn resolve_is_stable_across_repeated_calls() {
        let dir = tempfile::tempdir().unwrap();
        let legacy = dir.path().join(".mcp-index");
        std::fs::create_dir_all(&legacy).unwrap();
        std::fs::write(legacy.join("code_index.db"), b"").unwrap();

        let d = discovery(None, dir.path().join("cache.json"), dir.path().to_path_buf());
        let first = d.resolve("deadbeefdead");
        let second = d.resolve("deadbeefdead");
        assert_eq!(first, second);
    }

    #[test]
    fn rejects_wrong_width_repo_id() {
        let dir = tempfile::tempdir().unwrap();
        let d = discovery(None, dir.path().join("cache.json"), dir.path().to_path_buf());
        assert!(d.resolve("abc123abc123abcd").is_none());
    }
}

//! Runtime configuration: `.codeindex.toml`, layered under environment
//! variable overrides, with defaults when neither is present.

use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{CoreError, ErrorKind, Result};

fn default_queue_depth() -> usize {
    4096
}

fn default_file_size_cap() -> u64 {
    1024 * 1024
}

fn default_optimize_every() -> usize {
    10_000
}

fn default_memory_ceiling_mb() -> u64 {
    512
}

fn default_snippet_cap_bytes() -> usize {
    2048
}

fn default_bm25_weight() -> f64 {
    0.6
}

fn default_plugin_strategy() -> PluginStrategy {
    PluginStrategy::Auto
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginStrategy {
    Auto,
    All,
    Minimal,
}

/// Configuration consulted by every component. Loaded from
/// `<worktree>/.codeindex.toml` if present, then overridden field-by-field by
/// the environment variables named in the external interface surface.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub index_paths: Option<Vec<String>>,
    pub index_storage_path: Option<PathBuf>,
    pub repo_registry: Option<PathBuf>,
    pub enable_multi_repo: bool,
    pub reference_repos: Vec<String>,
    pub max_memory_mb: u64,
    pub plugin_strategy: PluginStrategy,
    #[serde(rename = "queue_depth")]
    pub queue_depth: usize,
    pub file_size_cap_bytes: u64,
    pub fts_optimize_every: usize,
    pub snippet_cap_bytes: usize,
    pub default_bm25_weight: f64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            index_paths: None,
            index_storage_path: None,
            repo_registry: None,
            enable_multi_repo: false,
            reference_repos: Vec::new(),
            max_memory_mb: default_memory_ceiling_mb(),
            plugin_strategy: default_plugin_strategy(),
            queue_depth: default_queue_depth(),
            file_size_cap_bytes: default_file_size_cap(),
            fts_optimize_every: default_optimize_every(),
            snippet_cap_bytes: default_snippet_cap_bytes(),
            default_bm25_weight: default_bm25_weight(),
        }
    }
}

impl IndexConfig {
    /// Load `.codeindex.toml` from `worktree` if present, then apply
    /// environment overrides. Never fails on a missing file; a malformed
    /// file is an `io_error` since config loading precedes identity/storage.
    pub fn load(worktree: &Path) -> Result<Self> {
        let mut cfg = match std::fs::read_to_string(worktree.join(".codeindex.toml")) {
            Ok(raw) => toml::from_str(&raw)
                .map_err(|e| CoreError::new(ErrorKind::IoError, format!(".codeindex.toml: {e}")))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => IndexConfig::default(),
            Err(e) => return Err(CoreError::from(e)),
        };
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("MCP_INDEX_PATHS") {
            self.index_paths = Some(v.split(':').map(str::to_string).collect());
        }
        if let Ok(v) = env::var("MCP_INDEX_STORAGE_PATH") {
            self.index_storage_path = Some(PathBuf::from(v));
        }
        if let Ok(v) = env::var("MCP_REPO_REGISTRY") {
            self.repo_registry = Some(PathBuf::from(v));
        }
        if let Ok(v) = env::var("MCP_ENABLE_MULTI_REPO") {
            self.enable_multi_repo = matches!(v.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(v) = env::var("MCP_REFERENCE_REPOS") {
            self.reference_repos = v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect();
        }
        if let Ok(v) = env::var("MCP_MAX_MEMORY_MB") {
            if let Ok(n) = v.parse() {
                self.max_memory_mb = n;
            }
        }
        if let Ok(v) = env::var("MCP_PLUGIN_STRATEGY") {
            self.plugin_strategy = match v.to_lowercase().as_str() {
                "all" => PluginStrategy::All,
                "minimal" => PluginStrategy::Minimal,
                _ => PluginStrategy::Auto,
            };
        }
    }

    pub fn is_repo_allowed(&self, repo_id: &str) -> bool {
        if !self.enable_multi_repo {
            return true;
        }
        self.reference_repos.iter().any(|r| r == repo_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = IndexConfig::default();
        assert_eq!(cfg.default_bm25_weight, 0.6);
        assert_eq!(cfg.file_size_cap_bytes, 1024 * 1024);
        assert!(!cfg.enable_multi_repo);
    }

    #[test]
    fn loads_missing_file_as_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = IndexConfig::load(dir.path()).unwrap();
        assert_eq!(cfg.max_memory_mb, default_memory_ceiling_mb());
    }

    #[test]
    fn parses_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".codeindex.toml"), "max_memory_mb = 1024\n").unwrap();
        let cfg = IndexConfig::load(dir.path()).unwrap();
        assert_eq!(cfg.max_memory_mb, 1024);
    }

    #[test]
    fn allow_list_gate() {
        let mut cfg = IndexConfig::default();
        cfg.enable_multi_repo = true;
        cfg.reference_repos = vec!["abc123abc123".to_string()];
        assert!(cfg.is_repo_allowed("abc123abc123"));
        assert!(!cfg.is_repo_allowed("deadbeefdead"));
    }
}

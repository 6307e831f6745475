//! File-backed catalog of published index artifacts, keyed by
//! `(repo_id, model, version)`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactSource {
    Local,
    Published,
    Cache,
    Discovery,
}

impl Default for ArtifactSource {
    fn default() -> Self {
        ArtifactSource::Local
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub repo_id: String,
    pub model: String,
    pub version: String,
    pub path: PathBuf,
    pub commit: Option<String>,
    /// Unix timestamp (seconds). Kept as an integer rather than a
    /// formatted string so newest-first sorting needs no parsing.
    pub created_at: u64,
    pub size_bytes: u64,
    pub source: ArtifactSource,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

fn record_key(repo_id: &str, model: &str, version: &str) -> String {
    format!("{repo_id}:{model}:{version}")
}

fn calculate_size(path: &Path) -> u64 {
    let meta = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(_) => return 0,
    };
    if meta.is_file() {
        return meta.len();
    }
    if !meta.is_dir() {
        return 0;
    }
    let mut total = 0u64;
    let mut stack = vec![path.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else { continue };
        for entry in entries.flatten() {
            let p = entry.path();
            if let Ok(m) = entry.metadata() {
                if m.is_dir() {
                    stack.push(p);
                } else if m.is_file() {
                    total += m.len();
                }
            }
        }
    }
    total
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Process-local, file-backed artifact catalog. Mutations hold an internal
/// lock; load is lazy and tolerates partial corruption by discarding
/// unparseable entries with a warning rather than failing outright.
pub struct ArtifactRegistry {
    registry_path: PathBuf,
    records: Mutex<HashMap<String, ArtifactRecord>>,
}

impl ArtifactRegistry {
    pub fn open(registry_path: PathBuf) -> Result<Self> {
        if let Some(parent) = registry_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let records = Mutex::new(load_records(&registry_path));
        Ok(Self { registry_path, records })
    }

    pub fn add_or_update(
        &self,
        repo_id: &str,
        model: &str,
        version: &str,
        path: &Path,
        commit: Option<String>,
        metadata: serde_json::Map<String, serde_json::Value>,
        source: ArtifactSource,
    ) -> Result<ArtifactRecord> {
        let record = ArtifactRecord {
            repo_id: repo_id.to_string(),
            model: model.to_string(),
            version: version.to_string(),
            path: path.canonicalize().unwrap_or_else(|_| path.to_path_buf()),
            commit,
            created_at: now_unix(),
            size_bytes: calculate_size(path),
            source,
            metadata,
        };

        let mut records = self.records.lock().unwrap();
        records.insert(record_key(repo_id, model, version), record.clone());
        save_records(&self.registry_path, &records);
        Ok(record)
    }

    /// Sorted newest-first; ties (equal `created_at`) broken by `version`
    /// lexicographic descending.
    pub fn list(&self, repo_id: Option<&str>, model: Option<&str>) -> Vec<ArtifactRecord> {
        let records = self.records.lock().unwrap();
        let mut out: Vec<ArtifactRecord> = records
            .values()
            .filter(|r| repo_id.map_or(true, |id| r.repo_id == id))
            .filter(|r| model.map_or(true, |m| r.model == m))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.version.cmp(&a.version)));
        out
    }

    /// Filters by `repo_id` first; narrows to `model` only if at least one
    /// of that repo's records matches — otherwise keeps the unfiltered
    /// (by-model) candidate list. This fallback-on-empty-filter behavior
    /// is load-bearing, not incidental.
    pub fn find_best_match(&self, repo_id: &str, model: Option<&str>) -> Option<ArtifactRecord> {
        let mut candidates = self.list(Some(repo_id), None);
        if let Some(model) = model {
            let narrowed: Vec<_> = candidates.iter().filter(|r| r.model == model).cloned().collect();
            if !narrowed.is_empty() {
                candidates = narrowed;
            }
        }
        candidates.into_iter().next()
    }

    pub fn get(&self, repo_id: &str, model: &str, version: &str) -> Option<ArtifactRecord> {
        self.records.lock().unwrap().get(&record_key(repo_id, model, version)).cloned()
    }
}

fn load_records(registry_path: &Path) -> HashMap<String, ArtifactRecord> {
    let raw = match std::fs::read_to_string(registry_path) {
        Ok(raw) => raw,
        Err(_) => return HashMap::new(),
    };
    let parsed: serde_json::Map<String, serde_json::Value> = match serde_json::from_str(&raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!("failed to load artifact registry, starting empty: {e}");
            return HashMap::new();
        }
    };

    let mut out = HashMap::new();
    for (key, value) in parsed {
        match serde_json::from_value::<ArtifactRecord>(value) {
            Ok(record) => {
                out.insert(key, record);
            }
            Err(e) => tracing::warn!("skipping invalid artifact record {key}: {e}"),
        }
    }
    out
}

fn save_records(registry_path: &Path, records: &HashMap<String, ArtifactRecord>) {
    let Ok(serialized) = serde_json::to_vec_pretty(records) else { return };
    let tmp_path = registry_path.with_extension("tmp");
    if std::fs::write(&tmp_path, serialized).is_err() {
        tracing::error!("failed to write artifact registry temp file");
        return;
    }
    if let Err(e) = std::fs::rename(&tmp_path, registry_path) {
        tracing::error!("failed to publish artifact registry: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (tempfile::TempDir, ArtifactRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let registry = ArtifactRegistry::open(dir.path().join("artifact_registry.json")).unwrap();
        (dir, registry)
    }

    #[test]
    fn add_then_find_best_match_roundtrips() {
        let (dir, registry) = fixture();
        let target = dir.path().join("index-a");
        std::fs::create_dir(&target).unwrap();
        registry
            .add_or_update("repo1", "minilm", "v1", &target, None, Default::default(), ArtifactSource::Local)
            .unwrap();

        let found = registry.find_best_match("repo1", None).unwrap();
        assert_eq!(found.repo_id, "repo1");
        assert_eq!(found.model, "minilm");
    }

    #[test]
    fn find_best_match_falls_back_when_model_unmatched() {
        let (dir, registry) = fixture();
        let target = dir.path().join("index-a");
        std::fs::create_dir(&target).unwrap();
        registry
            .add_or_update("repo1", "minilm", "v1", &target, None, Default::default(), ArtifactSource::Local)
            .unwrap();

        // No record for "codebert" exists, so find_best_match should fall
        // back to the unfiltered repo1 candidates instead of returning None.
        let found = registry.find_best_match("repo1", Some("codebert")).unwrap();
        assert_eq!(found.model, "minilm");
    }

    #[test]
    fn at_most_one_record_per_key() {
        let (dir, registry) = fixture();
        let target = dir.path().join("index-a");
        std::fs::create_dir(&target).unwrap();
        registry
            .add_or_update("repo1", "minilm", "v1", &target, None, Default::default(), ArtifactSource::Local)
            .unwrap();
        registry
            .add_or_update("repo1", "minilm", "v1", &target, None, Default::default(), ArtifactSource::Local)
            .unwrap();
        assert_eq!(registry.list(Some("repo1"), Some("minilm")).len(), 1);
    }

    #[test]
    fn corrupt_entries_are_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact_registry.json");
        std::fs::write(&path, r#"{"bad:entry:v1": {"not": "a record"}}"#).unwrap();
        let registry = ArtifactRegistry::open(path).unwrap();
        assert!(registry.list(None, None).is_empty());
    }

    #[test]
    fn write_is_observable_by_next_open() {
        let dir = tempfile::tempdir().unwrap();
        let registry_path = dir.path().join("artifact_registry.json");
        let target = dir.path().join("index-a");
        std::fs::create_dir(&target).unwrap();
        {
            let registry = ArtifactRegistry::open(registry_path.clone()).unwrap();
            registry
                .add_or_update("repo1", "minilm", "v1", &target, None, Default::default(), ArtifactSource::Local)
                .unwrap();
        }
        let reopened = ArtifactRegistry::open(registry_path).unwrap();
        assert!(reopened.get("repo1", "minilm", "v1").is_some());
    }
}

//! The indexing pipeline: walk the worktree, dedupe by content hash,
//! dispatch language + parser, write results into the store. Drives both
//! full and incremental (file-watch-triggered) indexing.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use ignore::WalkBuilder;
use rayon::prelude::*;
use sha2::{Digest, Sha256};

use crate::config::IndexConfig;
use crate::error::Result;
use crate::language::detect_language;
use crate::parser::generic::GenericBackend;
use crate::parser::regex_fallback::RegexFallbackBackend;
#[cfg(feature = "treesitter")]
use crate::parser::treesitter::TreeSitterBackend;
use crate::parser::{parse_with_fallback, ParserBackend};
use crate::storage::Store;

const DEFAULT_IGNORED_DIRS: &[&str] = &[".git", "node_modules", "target", "vendor", "dist", "build", ".venv", "__pycache__"];

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct IndexProgress {
    pub scanned: u64,
    pub parsed: u64,
    pub skipped_unchanged: u64,
    pub skipped_too_large: u64,
    pub failed: u64,
}

fn content_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn read_as_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn first_line(content: &str) -> Option<&str> {
    content.lines().next()
}

/// Parallel directory walk over the worktree, skipping ignored
/// directories and files above the configured size cap, mirroring the
/// teacher's `walk_files_parallel`.
fn walk_worktree(root: &Path, skip_dirs: &HashSet<String>) -> Vec<PathBuf> {
    let results: Mutex<Vec<PathBuf>> = Mutex::new(Vec::new());
    let skip = skip_dirs.clone();

    WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(true)
        .threads(rayon::current_num_threads().min(12))
        .filter_entry(move |entry| {
            if entry.file_type().is_some_and(|ft| ft.is_dir()) {
                let name = entry.file_name().to_string_lossy();
                return !skip.contains(name.as_ref());
            }
            true
        })
        .build_parallel()
        .run(|| {
            Box::new(|entry| {
                let Ok(entry) = entry else { return ignore::WalkState::Continue };
                if entry.file_type().is_some_and(|ft| ft.is_file()) {
                    results.lock().unwrap().push(entry.path().to_path_buf());
                }
                ignore::WalkState::Continue
            })
        });

    results.into_inner().unwrap()
}

/// Invokes the shared backend list (tree-sitter if available, regex
/// fallback, generic content-only) in priority order.
fn backends() -> Vec<Box<dyn ParserBackend>> {
    let mut out: Vec<Box<dyn ParserBackend>> = Vec::new();
    #[cfg(feature = "treesitter")]
    out.push(Box::new(TreeSitterBackend));
    out.push(Box::new(RegexFallbackBackend));
    out.push(Box::new(GenericBackend));
    out
}

/// Drives a full or incremental index of `worktree_root` into `store`
/// under `repo_id`. `paths` restricts the walk to a subtree when given
/// (the incremental case); `None` performs a full worktree walk.
pub struct Pipeline<'a> {
    store: &'a Store,
    repo_id: String,
    worktree_root: PathBuf,
    config: IndexConfig,
    writes_since_optimize: AtomicU64,
}

impl<'a> Pipeline<'a> {
    pub fn new(store: &'a Store, repo_id: String, worktree_root: PathBuf, config: IndexConfig) -> Self {
        Self { store, repo_id, worktree_root, config, writes_since_optimize: AtomicU64::new(0) }
    }

    pub fn full_index(&self) -> Result<IndexProgress> {
        let mut skip_dirs: HashSet<String> = DEFAULT_IGNORED_DIRS.iter().map(|s| s.to_string()).collect();
        skip_dirs.extend(["coverage".to_string(), "bin".to_string(), "obj".to_string()]);

        let files = walk_worktree(&self.worktree_root, &skip_dirs);
        let mut progress = IndexProgress::default();

        let backend_refs = backends();
        let backend_slice: Vec<&dyn ParserBackend> = backend_refs.iter().map(|b| b.as_ref()).collect();

        let results: Vec<IndexProgress> = files
            .par_iter()
            .map(|path| self.index_one_file(path, &backend_slice).unwrap_or_default())
            .collect();

        for r in results {
            progress.scanned += r.scanned;
            progress.parsed += r.parsed;
            progress.skipped_unchanged += r.skipped_unchanged;
            progress.skipped_too_large += r.skipped_too_large;
            progress.failed += r.failed;
        }

        self.store.optimize_fts()?;
        Ok(progress)
    }

    /// Incremental path: `created`/`modified` re-run the hash gate,
    /// `deleted` cascades a delete, `renamed` is modeled as delete(old) +
    /// the create flow on new by the caller.
    pub fn index_path(&self, path: &Path) -> Result<IndexProgress> {
        let backend_refs = backends();
        let backend_slice: Vec<&dyn ParserBackend> = backend_refs.iter().map(|b| b.as_ref()).collect();

        if !path.exists() {
            if let Ok(rel) = path.strip_prefix(&self.worktree_root) {
                let rel_str = rel.to_string_lossy().replace('\\', "/");
                self.store.delete_file(&self.repo_id, &rel_str)?;
            }
            return Ok(IndexProgress { scanned: 1, ..Default::default() });
        }

        Ok(self.index_one_file(path, &backend_slice).unwrap_or_default())
    }

    fn index_one_file(&self, abs_path: &Path, backend_slice: &[&dyn ParserBackend]) -> Result<IndexProgress> {
        let mut progress = IndexProgress { scanned: 1, ..Default::default() };

        let rel_path = abs_path
            .strip_prefix(&self.worktree_root)
            .unwrap_or(abs_path)
            .to_string_lossy()
            .replace('\\', "/");

        let meta = match std::fs::metadata(abs_path) {
            Ok(m) => m,
            Err(_) => {
                progress.failed += 1;
                return Ok(progress);
            }
        };
        let size = meta.len();

        if size > self.config.file_size_cap_bytes {
            // Still leave a `files` row so the walker does not requeue it
            // indefinitely, but produce neither a symbol nor content row.
            let hash = format!("size-cap:{size}");
            self.store.upsert_file(&self.repo_id, &rel_path, &abs_path.to_string_lossy(), "unknown", size, &hash)?;
            progress.skipped_too_large += 1;
            return Ok(progress);
        }

        let bytes = match std::fs::read(abs_path) {
            Ok(b) => b,
            Err(_) => {
                progress.failed += 1;
                return Ok(progress);
            }
        };
        let hash = content_hash(&bytes);

        if let Ok(Some(existing_hash)) = self.store.file_hash(&self.repo_id, &rel_path) {
            if existing_hash == hash {
                progress.skipped_unchanged += 1;
                return Ok(progress);
            }
        }

        let content = read_as_text(&bytes);
        let language = detect_language(abs_path, first_line(&content));

        let (outcome, _backend) = parse_with_fallback(backend_slice, &language, &content);
        for err in &outcome.errors {
            tracing::warn!(file = %rel_path, "parse_failed: {err}");
        }

        let (file_id, _changed) =
            self.store.upsert_file(&self.repo_id, &rel_path, &abs_path.to_string_lossy(), &language, size, &hash)?;
        self.store.replace_symbols(file_id, &language, &outcome.symbols)?;
        self.store.upsert_content(&rel_path, &content, &hash, size, &language)?;

        progress.parsed += 1;

        let writes = self.writes_since_optimize.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % self.config.fts_optimize_every as u64 == 0 {
            self.store.optimize_fts()?;
        }

        Ok(progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture_worktree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(
            dir.path().join("src/auth.py"),
            "class AuthManager:\n    def __init__(self):\n        pass\n\n    def login(self):\n        return True\n",
        )
        .unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/ignored"), "should not be walked").unwrap();
        dir
    }

    #[test]
    fn full_index_produces_symbols_and_content() {
        let dir = fixture_worktree();
        let store = Store::open_in_memory().unwrap();
        let pipeline = Pipeline::new(&store, "repo1".to_string(), dir.path().to_path_buf(), IndexConfig::default());

        let progress = pipeline.full_index().unwrap();
        assert_eq!(progress.parsed, 1);

        let hits = store.lookup_symbol("AuthManager", None, 20).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file, "src/auth.py");

        let bm25 = store.search_bm25("AuthManager", 10).unwrap();
        assert_eq!(bm25.len(), 1);
    }

    #[test]
    fn reindex_with_unchanged_content_is_a_noop_s3() {
        let dir = fixture_worktree();
        let store = Store::open_in_memory().unwrap();
        let pipeline = Pipeline::new(&store, "repo1".to_string(), dir.path().to_path_buf(), IndexConfig::default());

        pipeline.full_index().unwrap();
        let second = pipeline.full_index().unwrap();
        assert_eq!(second.parsed, 0);
        assert_eq!(second.skipped_unchanged, 1);
    }

    #[test]
    fn git_directory_is_skipped() {
        let dir = fixture_worktree();
        let store = Store::open_in_memory().unwrap();
        let pipeline = Pipeline::new(&store, "repo1".to_string(), dir.path().to_path_buf(), IndexConfig::default());
        pipeline.full_index().unwrap();
        assert!(store.search_bm25("should not be walked", 10).unwrap().is_empty());
    }

    #[test]
    fn deleted_file_cascades() {
        let dir = fixture_worktree();
        let store = Store::open_in_memory().unwrap();
        let pipeline = Pipeline::new(&store, "repo1".to_string(), dir.path().to_path_buf(), IndexConfig::default());
        pipeline.full_index().unwrap();

        std::fs::remove_file(dir.path().join("src/auth.py")).unwrap();
        pipeline.index_path(&dir.path().join("src/auth.py")).unwrap();

        assert!(store.lookup_symbol("AuthManager", None, 20).unwrap().is_empty());
    }

    #[test]
    fn oversized_file_leaves_files_row_without_symbols() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("big.py"), vec![b'x'; 10]).unwrap();
        let store = Store::open_in_memory().unwrap();
        let mut cfg = IndexConfig::default();
        cfg.file_size_cap_bytes = 5;
        let pipeline = Pipeline::new(&store, "repo1".to_string(), dir.path().to_path_buf(), cfg);

        let progress = pipeline.full_index().unwrap();
        assert_eq!(progress.skipped_too_large, 1);
        assert!(store.file_hash("repo1", "big.py").unwrap().is_some());
    }
}

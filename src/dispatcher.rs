//! Query dispatcher: routes a query across retrieval backends (exact
//! symbol lookup, BM25 full-text, optional semantic vector), merges and
//! ranks results under a wall-clock deadline, and implements the
//! `Protocol` contract.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use notify::RecommendedWatcher;

use crate::config::IndexConfig;
use crate::error::{CoreError, ErrorKind, Result};
use crate::pipeline::Pipeline;
use crate::protocol::{
    Protocol, ReindexHandle, ReindexProgress, ReindexRequest, SearchCodeRequest, SearchCodeResponse, SearchWarning,
    Snippet, SnippetSource, Status, SymbolLookupHit, SymbolLookupRequest,
};
use crate::storage::Store;

const DEFAULT_SEARCH_TIMEOUT_MS: u64 = 2000;
const MAX_SEARCH_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_RESULT_LIMIT: usize = 20;
const MAX_RESULT_LIMIT: usize = 200;
const STATS_CACHE_TTL: Duration = Duration::from_secs(5);

/// `Created → Opening → Ready → (Degraded|Ready) → Closing → Closed`.
/// Transitions are logged; there is no path back from `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Opening,
    Ready,
    Degraded,
    Closing,
    Closed,
}

impl LifecycleState {
    fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Created => "created",
            LifecycleState::Opening => "opening",
            LifecycleState::Ready => "ready",
            LifecycleState::Degraded => "degraded",
            LifecycleState::Closing => "closing",
            LifecycleState::Closed => "closed",
        }
    }
}

struct BackendResult {
    source: SnippetSource,
    snippets: Vec<Snippet>,
}

/// Owns the store and pipeline for one repository and answers the four
/// protocol operations. `open()` performs identity/storage setup, starts a
/// background file watcher that drives incremental reindexing, and
/// transitions `Created → Opening → Ready`; `close()` stops the watcher and
/// transitions to `Closing → Closed`, the cancellation point for any
/// in-flight `reindex` handle.
pub struct Dispatcher {
    repo_id: String,
    worktree_root: PathBuf,
    store_path: PathBuf,
    config: IndexConfig,
    store: Store,
    state: RwLock<LifecycleState>,
    reindex_counter: AtomicU64,
    active_reindex: Mutex<Option<String>>,
    watcher: Mutex<Option<RecommendedWatcher>>,
    stats_cache: Mutex<Option<(Status, Instant)>>,
}

impl Dispatcher {
    pub fn open(repo_id: String, worktree_root: PathBuf, config: IndexConfig, db_path: &Path) -> Result<Self> {
        tracing::info!(repo_id = %repo_id, state = LifecycleState::Opening.as_str(), "dispatcher transition");
        let worktree_root = worktree_root.canonicalize().unwrap_or(worktree_root);
        let store = Store::open(db_path)?;
        store.ensure_repository(&repo_id, &repo_name(&worktree_root), &worktree_root.to_string_lossy())?;

        let watcher = {
            let db_path = db_path.to_path_buf();
            let repo_id = repo_id.clone();
            let worktree_root = worktree_root.clone();
            let config = config.clone();
            crate::watch::start_watcher(worktree_root.clone(), move |changed| {
                let pipeline_store = match Store::open(&db_path) {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::warn!(path = %changed.display(), error = %e, "watcher could not open store for incremental reindex");
                        return;
                    }
                };
                let pipeline = Pipeline::new(&pipeline_store, repo_id.clone(), worktree_root.clone(), config.clone());
                if let Err(e) = pipeline.index_path(changed) {
                    tracing::warn!(path = %changed.display(), error = %e, "incremental reindex from watcher failed");
                }
            })
        };

        let dispatcher = Self {
            repo_id,
            worktree_root,
            store_path: db_path.to_path_buf(),
            config,
            store,
            state: RwLock::new(LifecycleState::Ready),
            reindex_counter: AtomicU64::new(0),
            active_reindex: Mutex::new(None),
            watcher: Mutex::new(watcher),
            stats_cache: Mutex::new(None),
        };
        tracing::info!(repo_id = %dispatcher.repo_id, state = LifecycleState::Ready.as_str(), "dispatcher transition");
        Ok(dispatcher)
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.read().unwrap()
    }

    pub fn close(&self) {
        *self.state.write().unwrap() = LifecycleState::Closing;
        tracing::info!(repo_id = %self.repo_id, state = LifecycleState::Closing.as_str(), "dispatcher transition");
        *self.active_reindex.lock().unwrap() = None;
        *self.watcher.lock().unwrap() = None;
        *self.state.write().unwrap() = LifecycleState::Closed;
        tracing::info!(repo_id = %self.repo_id, state = LifecycleState::Closed.as_str(), "dispatcher transition");
    }

    fn check_repo_allowed(&self, repository: Option<&str>) -> Result<()> {
        let target = repository.unwrap_or(&self.repo_id);
        if !self.config.is_repo_allowed(target) {
            return Err(CoreError::unauthorized(target));
        }
        Ok(())
    }

    fn pipeline(&self) -> Pipeline<'_> {
        Pipeline::new(&self.store, self.repo_id.clone(), self.worktree_root.clone(), self.config.clone())
    }

    /// Runs the BM25 backend (and, with `semantic: true`, a semantic
    /// backend stub) in parallel threads, each racing a deadline. Backends
    /// that don't finish in time are abandoned in place (their thread may
    /// keep running) and reported as a `backend_timeout` warning rather
    /// than failing the whole query, per spec.md's S5 scenario.
    fn scatter_gather(&self, query: &str, limit: usize, want_semantic: bool, deadline: Duration) -> (Vec<BackendResult>, Vec<SearchWarning>) {
        let (tx, rx) = mpsc::channel::<(SnippetSource, Result<Vec<Snippet>>)>();

        std::thread::scope(|scope| {
            let bm25_tx = tx.clone();
            scope.spawn(move || {
                let result = self.store.search_bm25(query, limit).map(|hits| {
                    hits.into_iter()
                        .map(|h| Snippet {
                            file: h.file,
                            language: h.language,
                            start_line: h.line,
                            end_line: h.line,
                            text: h.snippet,
                            score: h.score,
                            source: SnippetSource::Bm25,
                        })
                        .collect()
                });
                let _ = bm25_tx.send((SnippetSource::Bm25, result));
            });

            if want_semantic {
                let semantic_tx = tx.clone();
                scope.spawn(move || {
                    let result = crate::semantic::search(query, limit);
                    let _ = semantic_tx.send((SnippetSource::Semantic, result));
                });
            }

            drop(tx);

            let expected = if want_semantic { 2 } else { 1 };
            let mut results = Vec::new();
            let mut warnings = Vec::new();
            let mut received = 0;
            let start = std::time::Instant::now();

            while received < expected {
                let remaining = deadline.saturating_sub(start.elapsed());
                match rx.recv_timeout(remaining) {
                    Ok((source, Ok(snippets))) => {
                        results.push(BackendResult { source, snippets });
                        received += 1;
                    }
                    Ok((source, Err(e))) => {
                        warnings.push(SearchWarning { backend: backend_name(source), reason: e.kind.as_str().to_string() });
                        received += 1;
                    }
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        if want_semantic && !results.iter().any(|r: &BackendResult| r.source == SnippetSource::Semantic) {
                            warnings.push(SearchWarning { backend: "semantic".to_string(), reason: "timeout".to_string() });
                        }
                        break;
                    }
                    Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
            }

            (results, warnings)
        })
    }
}

fn backend_name(source: SnippetSource) -> String {
    match source {
        SnippetSource::Bm25 => "bm25".to_string(),
        SnippetSource::Semantic => "semantic".to_string(),
    }
}

fn repo_name(worktree_root: &Path) -> String {
    worktree_root.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| "repo".to_string())
}

/// Two snippets overlap when they name the same file and their line
/// ranges share at least half of the shorter range's lines.
fn overlaps(a: &Snippet, b: &Snippet) -> bool {
    if a.file != b.file {
        return false;
    }
    let start = a.start_line.max(b.start_line);
    let end = a.end_line.min(b.end_line);
    if end < start {
        return false;
    }
    let overlap = (end - start + 1) as f64;
    let shorter = ((a.end_line - a.start_line + 1).min(b.end_line - b.start_line + 1)) as f64;
    overlap / shorter >= 0.5
}

/// Weighted reciprocal-rank fusion: each backend contributes `weight /
/// (rank + 60)` (the conventional RRF smoothing constant) to a snippet's
/// merged score; BM25's weight is `bm25_weight`, everything else gets
/// `1.0 - bm25_weight`. Ties break by path, lexicographically.
fn merge_rrf(results: Vec<BackendResult>, bm25_weight: f64, limit: usize) -> Vec<Snippet> {
    let mut merged: Vec<Snippet> = Vec::new();

    for result in results {
        let weight = match result.source {
            SnippetSource::Bm25 => bm25_weight,
            SnippetSource::Semantic => 1.0 - bm25_weight,
        };
        for (rank, mut snippet) in result.snippets.into_iter().enumerate() {
            let rrf_score = weight / (rank as f64 + 60.0);

            if let Some(existing) = merged.iter_mut().find(|s: &&mut Snippet| overlaps(s, &snippet)) {
                if rrf_score > existing.score {
                    snippet.score = existing.score.max(rrf_score);
                    *existing = snippet;
                } else {
                    existing.score += rrf_score;
                }
                continue;
            }

            snippet.score = rrf_score;
            merged.push(snippet);
        }
    }

    merged.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.file.cmp(&b.file)));
    merged.truncate(limit);
    merged
}

impl Protocol for Dispatcher {
    fn symbol_lookup(&self, req: SymbolLookupRequest) -> Result<Vec<SymbolLookupHit>> {
        self.check_repo_allowed(req.repository.as_deref())?;
        let hits = self.store.lookup_symbol(&req.symbol, req.kind, DEFAULT_RESULT_LIMIT)?;
        Ok(hits
            .into_iter()
            .map(|h| SymbolLookupHit {
                symbol: h.symbol,
                kind: h.kind,
                file: h.file,
                line: h.line,
                signature: h.signature,
                doc: h.doc,
                language: h.language,
            })
            .collect())
    }

    fn search_code(&self, req: SearchCodeRequest) -> Result<SearchCodeResponse> {
        self.check_repo_allowed(req.repository.as_deref())?;
        let limit = req.limit.unwrap_or(DEFAULT_RESULT_LIMIT).min(MAX_RESULT_LIMIT);
        let timeout_ms = req.timeout_ms.unwrap_or(DEFAULT_SEARCH_TIMEOUT_MS).min(MAX_SEARCH_TIMEOUT_MS);
        let deadline = Duration::from_millis(timeout_ms);
        let want_semantic = req.semantic.unwrap_or(false);

        let (results, warnings) = self.scatter_gather(&req.query, limit, want_semantic, deadline);
        let merged = merge_rrf(results, self.config.default_bm25_weight, limit);

        Ok(SearchCodeResponse { results: merged, warnings })
    }

    fn get_status(&self) -> Result<Status> {
        if let Some((cached, fetched_at)) = self.stats_cache.lock().unwrap().clone() {
            if fetched_at.elapsed() < STATS_CACHE_TTL {
                return Ok(cached);
            }
        }

        let stats = self.store.repository_stats(&self.repo_id)?;
        let status = Status {
            repo_id: self.repo_id.clone(),
            file_count: stats.file_count,
            symbol_count: stats.symbol_count,
            last_indexed_at: stats.last_indexed_at,
            backends_available: crate::semantic::available_backends(),
            store_path: self.store_path.to_string_lossy().into_owned(),
            loaded_grammars: crate::parser::loaded_grammars(),
            watcher_active: self.watcher.lock().unwrap().is_some(),
        };

        *self.stats_cache.lock().unwrap() = Some((status.clone(), Instant::now()));
        Ok(status)
    }

    fn reindex(&self, req: ReindexRequest) -> Result<ReindexHandle> {
        let target = match &req.path {
            Some(p) => {
                let candidate = self.worktree_root.join(p);
                let canonical = candidate.canonicalize().unwrap_or(candidate);
                if !canonical.starts_with(&self.worktree_root) {
                    return Err(CoreError::not_in_worktree(&canonical));
                }
                canonical
            }
            None => self.worktree_root.clone(),
        };

        let handle_id = self.reindex_counter.fetch_add(1, Ordering::Relaxed);
        let handle = format!("reindex-{}-{handle_id}", self.repo_id);
        *self.active_reindex.lock().unwrap() = Some(handle.clone());

        let pipeline = self.pipeline();
        let progress: ReindexProgress = if target == self.worktree_root {
            pipeline.full_index()?.into()
        } else {
            pipeline.index_path(&target)?.into()
        };

        *self.active_reindex.lock().unwrap() = None;
        tracing::info!(handle = %handle, parsed = progress.parsed, failed = progress.failed, "reindex complete");

        Ok(ReindexHandle { handle })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture_repo() -> (tempfile::TempDir, Dispatcher) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(
            dir.path().join("src/auth.py"),
            "class AuthManager:\n    def login(self):\n        return True\n",
        )
        .unwrap();

        let db_path = dir.path().join(".index/code_index.db");
        let dispatcher = Dispatcher::open("repo1".to_string(), dir.path().to_path_buf(), IndexConfig::default(), &db_path).unwrap();
        dispatcher.reindex(ReindexRequest { path: None }).unwrap();
        (dir, dispatcher)
    }

    #[test]
    fn symbol_lookup_finds_indexed_class() {
        let (_dir, dispatcher) = fixture_repo();
        let hits = dispatcher
            .symbol_lookup(SymbolLookupRequest { symbol: "AuthManager".to_string(), kind: None, repository: None })
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file, "src/auth.py");
    }

    #[test]
    fn search_code_returns_bm25_hit() {
        let (_dir, dispatcher) = fixture_repo();
        let response = dispatcher
            .search_code(SearchCodeRequest { query: "AuthManager".to_string(), limit: None, semantic: None, repository: None, timeout_ms: None })
            .unwrap();
        assert!(!response.results.is_empty());
        assert!(response.warnings.is_empty());
    }

    #[test]
    fn unauthorized_cross_repo_is_rejected_s6() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = IndexConfig::default();
        cfg.enable_multi_repo = true;
        cfg.reference_repos = vec!["abc123abc123".to_string()];
        let db_path = dir.path().join(".index/code_index.db");
        let dispatcher = Dispatcher::open("repo1".to_string(), dir.path().to_path_buf(), cfg, &db_path).unwrap();

        let err = dispatcher
            .search_code(SearchCodeRequest {
                query: "x".to_string(),
                limit: None,
                semantic: None,
                repository: Some("deadbeefdead".to_string()),
                timeout_ms: None,
            })
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unauthorized);

        let ok = dispatcher.search_code(SearchCodeRequest {
            query: "x".to_string(),
            limit: None,
            semantic: None,
            repository: Some("abc123abc123".to_string()),
            timeout_ms: None,
        });
        assert!(ok.is_ok());
    }

    #[test]
    fn reindex_outside_worktree_is_rejected() {
        let (_dir, dispatcher) = fixture_repo();
        let err = dispatcher.reindex(ReindexRequest { path: Some("/etc/passwd".to_string()) }).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotInWorktree);
    }

    #[test]
    fn get_status_reports_counts() {
        let (_dir, dispatcher) = fixture_repo();
        let status = dispatcher.get_status().unwrap();
        assert_eq!(status.file_count, 1);
        assert_eq!(status.symbol_count, 2);
        assert!(status.store_path.ends_with("code_index.db"));
        assert!(!status.loaded_grammars.is_empty());
    }

    #[test]
    fn get_status_is_cached_for_five_seconds() {
        let (_dir, dispatcher) = fixture_repo();
        let first = dispatcher.get_status().unwrap();
        dispatcher.reindex(ReindexRequest { path: None }).unwrap();
        let second = dispatcher.get_status().unwrap();
        // Within the cache window the second call must return the same
        // snapshot even though another reindex just ran.
        assert_eq!(first.file_count, second.file_count);
        assert_eq!(first.symbol_count, second.symbol_count);
    }

    #[test]
    fn lifecycle_reaches_ready_then_closed() {
        let (_dir, dispatcher) = fixture_repo();
        assert_eq!(dispatcher.state(), LifecycleState::Ready);
        dispatcher.close();
        assert_eq!(dispatcher.state(), LifecycleState::Closed);
    }

    #[test]
    fn partial_backend_degrades_to_bm25_only_s5() {
        // The semantic feature isn't compiled in by default, so requesting
        // it behaves like a backend that never clears its deadline: search
        // still returns the BM25 results plus a warning, not a hard error.
        let (_dir, dispatcher) = fixture_repo();
        let response = dispatcher
            .search_code(SearchCodeRequest {
                query: "AuthManager".to_string(),
                limit: None,
                semantic: Some(true),
                repository: None,
                timeout_ms: Some(100),
            })
            .unwrap();
        assert!(!response.results.is_empty());
        assert!(response.warnings.iter().any(|w| w.backend == "semantic"));
    }

    #[test]
    fn overlapping_snippets_are_deduplicated() {
        let a = Snippet { file: "a.rs".into(), language: "rust".into(), start_line: 10, end_line: 14, text: "x".into(), score: 0.0, source: SnippetSource::Bm25 };
        let b = Snippet { file: "a.rs".into(), language: "rust".into(), start_line: 11, end_line: 13, text: "y".into(), score: 0.0, source: SnippetSource::Bm25 };
        assert!(overlaps(&a, &b));
        let c = Snippet { file: "a.rs".into(), language: "rust".into(), start_line: 100, end_line: 104, text: "z".into(), score: 0.0, source: SnippetSource::Bm25 };
        assert!(!overlaps(&a, &c));
    }
}

//! Contract-only DTOs for the four operations an external JSON-RPC layer
//! would expose (`symbol_lookup`, `search_code`, `get_status`, `reindex`).
//! This module owns serialization shapes; it does not speak JSON-RPC,
//! stdio framing, or session lifecycle.

use serde::{Deserialize, Serialize};

use crate::language::SymbolKind;

#[derive(Debug, Clone, Deserialize)]
pub struct SymbolLookupRequest {
    pub symbol: String,
    pub kind: Option<SymbolKind>,
    pub repository: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SymbolLookupHit {
    pub symbol: String,
    pub kind: SymbolKind,
    pub file: String,
    pub line: u32,
    pub signature: Option<String>,
    pub doc: Option<String>,
    pub language: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchCodeRequest {
    pub query: String,
    pub limit: Option<usize>,
    pub semantic: Option<bool>,
    pub repository: Option<String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Snippet {
    pub file: String,
    pub language: String,
    pub start_line: u32,
    pub end_line: u32,
    pub text: String,
    pub score: f64,
    pub source: SnippetSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SnippetSource {
    Bm25,
    Semantic,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchWarning {
    pub backend: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchCodeResponse {
    pub results: Vec<Snippet>,
    pub warnings: Vec<SearchWarning>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub repo_id: String,
    pub file_count: u64,
    pub symbol_count: u64,
    pub last_indexed_at: Option<u64>,
    pub backends_available: Vec<String>,
    pub store_path: String,
    pub loaded_grammars: Vec<String>,
    pub watcher_active: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReindexRequest {
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReindexHandle {
    pub handle: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ReindexProgress {
    pub scanned: u64,
    pub parsed: u64,
    pub skipped_unchanged: u64,
    pub skipped_too_large: u64,
    pub failed: u64,
}

impl From<crate::pipeline::IndexProgress> for ReindexProgress {
    fn from(p: crate::pipeline::IndexProgress) -> Self {
        Self {
            scanned: p.scanned,
            parsed: p.parsed,
            skipped_unchanged: p.skipped_unchanged,
            skipped_too_large: p.skipped_too_large,
            failed: p.failed,
        }
    }
}

/// The four operations the protocol surface exposes, matching spec.md's
/// external interface table. An external transport (JSON-RPC, HTTP, stdio)
/// adapts its wire format to these calls; this crate implements them
/// directly on `Dispatcher`.
pub trait Protocol {
    fn symbol_lookup(&self, req: SymbolLookupRequest) -> crate::error::Result<Vec<SymbolLookupHit>>;
    fn search_code(&self, req: SearchCodeRequest) -> crate::error::Result<SearchCodeResponse>;
    fn get_status(&self) -> crate::error::Result<Status>;
    fn reindex(&self, req: ReindexRequest) -> crate::error::Result<ReindexHandle>;
}

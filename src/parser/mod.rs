//! Parser backends: a capability interface (`supports` / `parse`), not a
//! class hierarchy. Each backend is a tagged variant selected by the
//! language dispatcher; dispatch picks the highest-priority *available*
//! one.

pub mod generic;
pub mod regex_fallback;
#[cfg(feature = "treesitter")]
pub mod treesitter;

use crate::language::is_density_exempt;
use crate::storage::NewSymbol;

/// A parsed file: the symbols a backend extracted, plus any non-fatal
/// per-file parse errors (logged by the caller, never propagated).
#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub symbols: Vec<NewSymbol>,
    pub errors: Vec<String>,
}

/// Which backend produced a `ParseOutcome`, for diagnostics and for the
/// "don't double-insert when both succeed" rule in §9.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    TreeSitter,
    Regex,
    Generic,
}

pub trait ParserBackend: Send + Sync {
    fn name(&self) -> BackendKind;
    fn supports(&self, language: &str) -> bool;
    fn parse(&self, language: &str, content: &str) -> ParseOutcome;
}

fn non_blank_line_count(content: &str) -> usize {
    content.lines().filter(|l| !l.trim().is_empty()).count()
}

/// The languages available via tree-sitter in this build, for `get_status`.
/// Empty when the crate was built without the `treesitter` feature.
#[cfg(feature = "treesitter")]
pub fn loaded_grammars() -> Vec<String> {
    treesitter::loaded_grammars()
}

#[cfg(not(feature = "treesitter"))]
pub fn loaded_grammars() -> Vec<String> {
    Vec::new()
}

/// The 15%-symbol-density retry rule: if the chosen backend's symbol count
/// is below the per-language threshold (1 per ~6.67 non-blank lines),
/// and the language isn't exempt, a weaker-but-different backend may
/// still be worth trying. Exempt languages (assembly, config-shaped,
/// unknown) never trigger a retry.
pub fn below_density_threshold(language: &str, content: &str, symbol_count: usize) -> bool {
    if is_density_exempt(language) {
        return false;
    }
    let lines = non_blank_line_count(content);
    if lines == 0 {
        return false;
    }
    (symbol_count as f64 / lines as f64) < 0.15
}

/// Runs the language's highest-priority available backend, retrying with
/// the next backend when the density rule fires, and keeping whichever
/// produced more symbols (§4.F's selection rule — never double-inserts by
/// construction, since only one outcome is ever returned).
pub fn parse_with_fallback(backends: &[&dyn ParserBackend], language: &str, content: &str) -> (ParseOutcome, BackendKind) {
    let mut candidates: Vec<(ParseOutcome, BackendKind)> = Vec::new();

    for backend in backends {
        if !backend.supports(language) {
            continue;
        }
        let outcome = backend.parse(language, content);
        let under_threshold = below_density_threshold(language, content, outcome.symbols.len());
        let produced_any = !outcome.symbols.is_empty() || !outcome.errors.is_empty();
        let kind = backend.name();
        candidates.push((outcome, kind));

        if !under_threshold && produced_any {
            break;
        }
        // Density rule fired (or backend produced nothing): try the next
        // available backend and keep whichever produced more symbols.
    }

    candidates
        .into_iter()
        .max_by_key(|(outcome, _)| outcome.symbols.len())
        .unwrap_or_else(|| (ParseOutcome::default(), BackendKind::Generic))
}

//! The generic fallback: populates BM25 content only, never symbols.
//! Always available, used when a path resolves to `"unknown"` or when no
//! other backend is configured for the resolved language.

use super::{BackendKind, ParseOutcome, ParserBackend};

pub struct GenericBackend;

impl ParserBackend for GenericBackend {
    fn name(&self) -> BackendKind {
        BackendKind::Generic
    }

    fn supports(&self, _language: &str) -> bool {
        true
    }

    fn parse(&self, _language: &str, _content: &str) -> ParseOutcome {
        ParseOutcome { symbols: vec![], errors: vec![] }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_produces_symbols() {
        let outcome = GenericBackend.parse("unknown", "whatever content");
        assert!(outcome.symbols.is_empty());
    }

    #[test]
    fn always_available() {
        assert!(GenericBackend.supports("anything"));
    }
}

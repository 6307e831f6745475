//! Regex fallback backend: a small building-block grammar (identifier,
//! qualified identifier, modifier list, parameter list) composed into
//! per-language pattern sets. Line-oriented and strictly weaker than
//! tree-sitter; used when no grammar is loadable, or when tree-sitter
//! throws.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::language::SymbolKind;
use crate::storage::NewSymbol;

use super::{BackendKind, ParseOutcome, ParserBackend};

const IDENTIFIER: &str = r"[A-Za-z_]\w*";
const MODIFIER_LIST: &str = r"(?:(?:pub|public|private|protected|static|final|abstract|export|async)\s+)*";
const PARAMETER_LIST: &str = r"\([^)]*\)";

struct LinePattern {
    kind: SymbolKind,
    regex: Regex,
    name_group: usize,
}

fn compile(kind: SymbolKind, pattern: String, name_group: usize) -> LinePattern {
    LinePattern { kind, regex: Regex::new(&pattern).expect("static regex pattern"), name_group }
}

fn patterns_for(language: &str) -> Option<&'static [LinePattern]> {
    static RUBY: Lazy<Vec<LinePattern>> = Lazy::new(|| {
        vec![
            compile(SymbolKind::Method, format!(r"^\s*def\s+({IDENTIFIER})"), 1),
            compile(SymbolKind::Class, format!(r"^\s*class\s+({IDENTIFIER})"), 1),
            compile(SymbolKind::Module, format!(r"^\s*module\s+({IDENTIFIER})"), 1),
        ]
    });
    static PHP: Lazy<Vec<LinePattern>> = Lazy::new(|| {
        vec![
            compile(SymbolKind::Function, format!(r"^\s*{MODIFIER_LIST}function\s+({IDENTIFIER})\s*{PARAMETER_LIST}"), 1),
            compile(SymbolKind::Class, format!(r"^\s*{MODIFIER_LIST}class\s+({IDENTIFIER})"), 1),
            compile(SymbolKind::Interface, format!(r"^\s*interface\s+({IDENTIFIER})"), 1),
        ]
    });
    static SWIFT: Lazy<Vec<LinePattern>> = Lazy::new(|| {
        vec![
            compile(SymbolKind::Function, format!(r"^\s*{MODIFIER_LIST}func\s+({IDENTIFIER})\s*(?:<[^>]+>)?\s*{PARAMETER_LIST}"), 1),
            compile(SymbolKind::Class, format!(r"^\s*{MODIFIER_LIST}class\s+({IDENTIFIER})"), 1),
            compile(SymbolKind::Struct, format!(r"^\s*{MODIFIER_LIST}struct\s+({IDENTIFIER})"), 1),
            compile(SymbolKind::Enum, format!(r"^\s*{MODIFIER_LIST}enum\s+({IDENTIFIER})"), 1),
            compile(SymbolKind::Interface, format!(r"^\s*protocol\s+({IDENTIFIER})"), 1),
        ]
    });
    static KOTLIN: Lazy<Vec<LinePattern>> = Lazy::new(|| {
        vec![
            compile(SymbolKind::Function, format!(r"^\s*{MODIFIER_LIST}fun\s+({IDENTIFIER})\s*(?:<[^>]+>)?\s*{PARAMETER_LIST}"), 1),
            compile(SymbolKind::Class, format!(r"^\s*{MODIFIER_LIST}class\s+({IDENTIFIER})"), 1),
            compile(SymbolKind::Interface, format!(r"^\s*{MODIFIER_LIST}interface\s+({IDENTIFIER})"), 1),
        ]
    });
    static SCALA: Lazy<Vec<LinePattern>> = Lazy::new(|| {
        vec![
            compile(SymbolKind::Function, format!(r"^\s*{MODIFIER_LIST}def\s+({IDENTIFIER})\s*(?:\[[^\]]+\])?\s*{PARAMETER_LIST}"), 1),
            compile(SymbolKind::Class, format!(r"^\s*{MODIFIER_LIST}class\s+({IDENTIFIER})"), 1),
            compile(SymbolKind::Trait, format!(r"^\s*{MODIFIER_LIST}trait\s+({IDENTIFIER})"), 1),
            compile(SymbolKind::Module, format!(r"^\s*object\s+({IDENTIFIER})"), 1),
        ]
    });
    static DART: Lazy<Vec<LinePattern>> = Lazy::new(|| {
        vec![
            compile(SymbolKind::Class, format!(r"^\s*(?:abstract\s+)?class\s+({IDENTIFIER})"), 1),
            compile(SymbolKind::Function, format!(r"^\s*[\w<>\[\]?]+\s+({IDENTIFIER})\s*{PARAMETER_LIST}\s*(?:async\s*)?\{{"), 1),
        ]
    });
    static LUA: Lazy<Vec<LinePattern>> = Lazy::new(|| {
        vec![compile(SymbolKind::Function, format!(r"^\s*(?:local\s+)?function\s+({IDENTIFIER}(?:[.:]\w+)*)"), 1)]
    });
    static PERL: Lazy<Vec<LinePattern>> = Lazy::new(|| {
        vec![
            compile(SymbolKind::Function, format!(r"^\s*sub\s+({IDENTIFIER})"), 1),
            compile(SymbolKind::Module, format!(r"^\s*package\s+({IDENTIFIER}(?:::\w+)*)"), 1),
        ]
    });
    static ELIXIR: Lazy<Vec<LinePattern>> = Lazy::new(|| {
        vec![
            compile(SymbolKind::Function, format!(r"^\s*def\s+({IDENTIFIER})"), 1),
            compile(SymbolKind::Module, format!(r"^\s*defmodule\s+({IDENTIFIER}(?:\.\w+)*)"), 1),
        ]
    });
    static HASKELL: Lazy<Vec<LinePattern>> = Lazy::new(|| {
        vec![
            compile(SymbolKind::Function, format!(r"^({IDENTIFIER})\s*::"), 1),
            compile(SymbolKind::Module, format!(r"^\s*module\s+({IDENTIFIER}(?:\.\w+)*)"), 1),
        ]
    });
    static CSHARP: Lazy<Vec<LinePattern>> = Lazy::new(|| {
        vec![
            compile(SymbolKind::Class, format!(r"^\s*{MODIFIER_LIST}class\s+({IDENTIFIER})"), 1),
            compile(SymbolKind::Interface, format!(r"^\s*{MODIFIER_LIST}interface\s+({IDENTIFIER})"), 1),
            compile(SymbolKind::Struct, format!(r"^\s*{MODIFIER_LIST}struct\s+({IDENTIFIER})"), 1),
            compile(SymbolKind::Enum, format!(r"^\s*{MODIFIER_LIST}enum\s+({IDENTIFIER})"), 1),
            compile(
                SymbolKind::Method,
                format!(r"^\s*{MODIFIER_LIST}[\w<>\[\],\s]+\s+({IDENTIFIER})\s*{PARAMETER_LIST}\s*\{{"),
                1,
            ),
        ]
    });
    static ARM_ASSEMBLY: Lazy<Vec<LinePattern>> =
        Lazy::new(|| vec![compile(SymbolKind::Label, format!(r"^({IDENTIFIER}):\s*$"), 1)]);

    match language {
        "ruby" => Some(&RUBY),
        "php" => Some(&PHP),
        "swift" => Some(&SWIFT),
        "kotlin" => Some(&KOTLIN),
        "scala" => Some(&SCALA),
        "dart" => Some(&DART),
        "lua" => Some(&LUA),
        "perl" => Some(&PERL),
        "elixir" => Some(&ELIXIR),
        "haskell" => Some(&HASKELL),
        "csharp" => Some(&CSHARP),
        "arm-assembly" => Some(&ARM_ASSEMBLY),
        _ => None,
    }
}

pub struct RegexFallbackBackend;

impl ParserBackend for RegexFallbackBackend {
    fn name(&self) -> BackendKind {
        BackendKind::Regex
    }

    fn supports(&self, language: &str) -> bool {
        patterns_for(language).is_some()
    }

    fn parse(&self, language: &str, content: &str) -> ParseOutcome {
        let Some(patterns) = patterns_for(language) else {
            return ParseOutcome { symbols: vec![], errors: vec!["no regex pattern set for language".to_string()] };
        };

        let mut symbols = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            for pattern in patterns {
                if let Some(caps) = pattern.regex.captures(line) {
                    if let Some(m) = caps.get(pattern.name_group) {
                        let line_no = (idx + 1) as u32;
                        symbols.push(NewSymbol {
                            name: m.as_str().to_string(),
                            kind: pattern.kind,
                            signature: Some(line.trim().to_string()),
                            doc: None,
                            defined_at_line: line_no,
                            span_start_line: line_no,
                            span_end_line: line_no,
                            scope: None,
                            modifiers: vec![],
                        });
                        break;
                    }
                }
            }
        }

        ParseOutcome { symbols, errors: vec![] }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_ruby_methods_and_classes() {
        let src = "class AuthManager\n  def login\n  end\nend\n";
        let outcome = RegexFallbackBackend.parse("ruby", src);
        assert!(outcome.symbols.iter().any(|s| s.name == "AuthManager" && s.kind == SymbolKind::Class));
        assert!(outcome.symbols.iter().any(|s| s.name == "login" && s.kind == SymbolKind::Method));
    }

    #[test]
    fn finds_kotlin_functions() {
        let src = "fun greet(name: String): String {\n    return name\n}\n";
        let outcome = RegexFallbackBackend.parse("kotlin", src);
        assert!(outcome.symbols.iter().any(|s| s.name == "greet"));
    }

    #[test]
    fn finds_assembly_labels() {
        let src = "_start:\n    mov r0, #1\nloop:\n    b loop\n";
        let outcome = RegexFallbackBackend.parse("arm-assembly", src);
        assert_eq!(outcome.symbols.len(), 2);
        assert_eq!(outcome.symbols[0].kind, SymbolKind::Label);
    }

    #[test]
    fn unsupported_language_reports_unavailable() {
        assert!(!RegexFallbackBackend.supports("rust"));
    }
}

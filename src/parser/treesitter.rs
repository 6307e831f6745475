//! Tree-sitter backend: a shared library bundling eight grammars. Returns
//! an AST; a language-specific visitor maps each node to a `NewSymbol`
//! record carrying signature, doc, scope, and modifiers.

use tree_sitter::{Language as TsLanguage, Node, Parser};

use crate::language::SymbolKind;
use crate::storage::NewSymbol;

use super::{BackendKind, ParseOutcome, ParserBackend};

const BUNDLED_GRAMMARS: &[&str] = &["rust", "typescript", "javascript", "python", "go", "c", "cpp", "java"];

fn language_for(language: &str) -> Option<TsLanguage> {
    Some(match language {
        "rust" => tree_sitter_rust::LANGUAGE.into(),
        "typescript" => tree_sitter_typescript::LANGUAGE_TSX.into(),
        "javascript" => tree_sitter_javascript::LANGUAGE.into(),
        "python" => tree_sitter_python::LANGUAGE.into(),
        "go" => tree_sitter_go::LANGUAGE.into(),
        "c" => tree_sitter_c::LANGUAGE.into(),
        "cpp" => tree_sitter_cpp::LANGUAGE.into(),
        "java" => tree_sitter_java::LANGUAGE.into(),
        _ => return None,
    })
}

/// The languages this build has a bundled grammar for, for `get_status`.
pub fn loaded_grammars() -> Vec<String> {
    BUNDLED_GRAMMARS.iter().map(|s| s.to_string()).collect()
}

fn classify_node(kind: &str) -> Option<SymbolKind> {
    match kind {
        "function_item" => Some(SymbolKind::Function),
        "struct_item" => Some(SymbolKind::Struct),
        "enum_item" => Some(SymbolKind::Enum),
        "trait_item" => Some(SymbolKind::Trait),
        "impl_item" => Some(SymbolKind::Class),
        "type_item" => Some(SymbolKind::TypeAlias),
        "const_item" => Some(SymbolKind::Constant),
        "static_item" => Some(SymbolKind::Constant),
        "macro_definition" => Some(SymbolKind::Macro),
        "mod_item" => Some(SymbolKind::Module),

        "function_declaration" => Some(SymbolKind::Function),
        "class_declaration" => Some(SymbolKind::Class),
        "interface_declaration" => Some(SymbolKind::Interface),
        "type_alias_declaration" => Some(SymbolKind::TypeAlias),
        "method_definition" => Some(SymbolKind::Method),
        "export_statement" => None,

        "function_definition" => Some(SymbolKind::Function),
        "class_definition" => Some(SymbolKind::Class),

        "method_declaration" => Some(SymbolKind::Method),
        "type_declaration" => None,
        "type_spec" => Some(SymbolKind::TypeAlias),

        "struct_specifier" => Some(SymbolKind::Struct),
        "enum_specifier" => Some(SymbolKind::Enum),
        "class_specifier" => Some(SymbolKind::Class),
        "enum_declaration" => Some(SymbolKind::Enum),
        "field_declaration" => Some(SymbolKind::Field),
        "import_declaration" | "import_statement" | "use_declaration" => Some(SymbolKind::Import),

        _ => None,
    }
}

fn is_rust(language: &str) -> bool {
    language == "rust"
}
fn is_c_cpp(language: &str) -> bool {
    matches!(language, "c" | "cpp")
}
fn is_python(language: &str) -> bool {
    language == "python"
}
fn is_go(language: &str) -> bool {
    language == "go"
}

fn extract_name<'a>(node: &Node<'a>, source: &'a [u8], language: &str) -> Option<String> {
    for field in &["name", "type"] {
        if let Some(name_node) = node.child_by_field_name(*field) {
            if let Ok(text) = name_node.utf8_text(source) {
                let name = text.trim().to_string();
                if !name.is_empty() {
                    return Some(name);
                }
            }
        }
    }

    if node.kind() == "impl_item" && is_rust(language) {
        if let Some(type_node) = node.child_by_field_name("type") {
            if let Ok(text) = type_node.utf8_text(source) {
                return Some(text.trim().to_string());
            }
        }
    }

    if node.kind() == "type_spec" && is_go(language) {
        if let Some(child) = node.named_child(0) {
            if let Ok(text) = child.utf8_text(source) {
                return Some(text.trim().to_string());
            }
        }
    }

    if (node.kind() == "function_definition" && is_c_cpp(language)) || node.kind() == "function_item" {
        if let Some(decl) = node.child_by_field_name("declarator") {
            if let Some(name_node) = decl.child_by_field_name("declarator") {
                if let Ok(text) = name_node.utf8_text(source) {
                    return Some(text.trim().to_string());
                }
            }
            if let Ok(text) = decl.utf8_text(source) {
                let s = text.trim();
                if let Some(paren) = s.find('(') {
                    return Some(s[..paren].trim().to_string());
                }
                return Some(s.to_string());
            }
        }
    }

    None
}

fn extract_signature(node: &Node, source: &[u8], language: &str) -> String {
    let text = node.utf8_text(source).unwrap_or("");
    let first_line = text.lines().next().unwrap_or("").trim();

    let sig = if is_python(language) {
        if let Some(colon) = first_line.find(':') {
            &first_line[..=colon]
        } else {
            first_line
        }
    } else if let Some(brace) = first_line.find('{') {
        first_line[..brace].trim()
    } else {
        first_line
    };

    if sig.len() > 200 {
        let mut boundary = 200;
        while boundary > 0 && !sig.is_char_boundary(boundary) {
            boundary -= 1;
        }
        format!("{}...", &sig[..boundary])
    } else {
        sig.to_string()
    }
}

/// The leading comment or docstring directly above a node, if any.
fn extract_doc(node: &Node, source: &[u8]) -> Option<String> {
    let mut sibling = node.prev_sibling()?;
    let mut lines = Vec::new();
    loop {
        if matches!(sibling.kind(), "line_comment" | "comment") {
            if let Ok(text) = sibling.utf8_text(source) {
                lines.push(text.trim_start_matches('/').trim_start_matches('#').trim().to_string());
            }
            match sibling.prev_sibling() {
                Some(prev) => sibling = prev,
                None => break,
            }
        } else {
            break;
        }
    }
    if lines.is_empty() {
        None
    } else {
        lines.reverse();
        Some(lines.join("\n"))
    }
}

fn extract_modifiers(node: &Node, source: &[u8]) -> Vec<String> {
    let text = node.utf8_text(source).unwrap_or("");
    let first_line = text.lines().next().unwrap_or("");
    let mut modifiers = Vec::new();
    for candidate in ["pub", "async", "static", "export", "public", "private", "protected", "abstract"] {
        if first_line.trim_start().starts_with(candidate) || first_line.contains(&format!(" {candidate} ")) {
            modifiers.push(candidate.to_string());
        }
    }
    modifiers
}

fn walk_node(node: &Node, source: &[u8], language: &str, scope: &str, out: &mut Vec<NewSymbol>, errors: &mut Vec<String>) {
    let kind = node.kind();

    if kind == "ERROR" {
        errors.push(format!("parse error near line {}", node.start_position().row + 1));
    }

    if let Some(sym_kind) = classify_node(kind) {
        let name = extract_name(node, source, language).unwrap_or_default();
        if !name.is_empty() {
            let start_line = (node.start_position().row + 1) as u32;
            let end_line = (node.end_position().row + 1) as u32;

            let final_kind = if !scope.is_empty() && matches!(sym_kind, SymbolKind::Function) && !is_go(language) {
                SymbolKind::Method
            } else {
                sym_kind
            };

            out.push(NewSymbol {
                name: name.clone(),
                kind: final_kind,
                signature: Some(extract_signature(node, source, language)),
                doc: extract_doc(node, source),
                defined_at_line: start_line,
                span_start_line: start_line,
                span_end_line: end_line,
                scope: if scope.is_empty() { None } else { Some(scope.to_string()) },
                modifiers: extract_modifiers(node, source),
            });

            let child_scope = if scope.is_empty() { name } else { format!("{scope}::{name}") };
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                walk_node(&child, source, language, &child_scope, out, errors);
            }
            return;
        }
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        walk_node(&child, source, language, scope, out, errors);
    }
}

pub struct TreeSitterBackend;

impl ParserBackend for TreeSitterBackend {
    fn name(&self) -> BackendKind {
        BackendKind::TreeSitter
    }

    fn supports(&self, language: &str) -> bool {
        language_for(language).is_some()
    }

    fn parse(&self, language: &str, content: &str) -> ParseOutcome {
        let Some(lang) = language_for(language) else {
            return ParseOutcome { symbols: vec![], errors: vec!["no grammar loaded".to_string()] };
        };

        let mut parser = Parser::new();
        if parser.set_language(&lang).is_err() {
            return ParseOutcome { symbols: vec![], errors: vec!["grammar failed to load".to_string()] };
        }

        let Some(tree) = parser.parse(content, None) else {
            return ParseOutcome { symbols: vec![], errors: vec!["tree-sitter produced no tree".to_string()] };
        };

        let root = tree.root_node();
        let source = content.as_bytes();
        let mut symbols = Vec::new();
        let mut errors = Vec::new();

        let mut cursor = root.walk();
        for child in root.children(&mut cursor) {
            walk_node(&child, source, language, "", &mut symbols, &mut errors);
        }

        ParseOutcome { symbols, errors }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> TreeSitterBackend {
        TreeSitterBackend
    }

    #[test]
    fn parses_rust_symbols() {
        let src = r#"
pub fn greet(name: &str) -> String {
    format!("Hello, {}!", name)
}

struct Config {
    name: String,
}

impl Config {
    pub fn new() -> Self {
        Config { name: String::new() }
    }
}

enum Status {
    Ok,
    Error(String),
}

trait Processor {
    fn process(&self) -> bool;
}
"#;
        let outcome = backend().parse("rust", src);
        assert!(outcome.symbols.iter().any(|s| s.name == "greet" && s.kind == SymbolKind::Function));
        assert!(outcome.symbols.iter().any(|s| s.name == "Config" && s.kind == SymbolKind::Struct));
        assert!(outcome.symbols.iter().any(|s| s.name == "Status" && s.kind == SymbolKind::Enum));
        assert!(outcome.symbols.iter().any(|s| s.name == "new" && s.kind == SymbolKind::Method));
    }

    #[test]
    fn methods_get_a_scope() {
        let src = "impl Config {\n    pub fn new() -> Self { Config {} }\n}\n";
        let outcome = backend().parse("rust", src);
        let new_fn = outcome.symbols.iter().find(|s| s.name == "new").unwrap();
        assert_eq!(new_fn.scope.as_deref(), Some("Config"));
        assert_eq!(new_fn.kind, SymbolKind::Method);
    }

    #[test]
    fn parses_python_symbols() {
        let src = "def greet(name):\n    return name\n\nclass Config:\n    def process(self):\n        return True\n";
        let outcome = backend().parse("python", src);
        assert!(outcome.symbols.iter().any(|s| s.name == "greet"));
        assert!(outcome.symbols.iter().any(|s| s.name == "Config" && s.kind == SymbolKind::Class));
    }

    #[test]
    fn signature_excludes_body() {
        let src = "pub fn process(config: &Config) -> Result<String, Error> {\n    todo!()\n}\n";
        let outcome = backend().parse("rust", src);
        let sig = outcome.symbols[0].signature.clone().unwrap();
        assert!(sig.contains("pub fn process"));
        assert!(!sig.contains('{'));
    }

    #[test]
    fn unsupported_language_is_unavailable() {
        assert!(!backend().supports("unknown"));
    }
}

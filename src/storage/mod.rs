//! Embedded SQL storage engine: files, symbols, and an FTS5 BM25 content
//! table, addressed by a stable per-repository hash.

mod migrations;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::error::{CoreError, ErrorKind, Result};
use crate::language::SymbolKind;

/// One row produced by `parse()`: a symbol found in a file, not yet
/// attached to a `file_id`.
#[derive(Debug, Clone)]
pub struct NewSymbol {
    pub name: String,
    pub kind: SymbolKind,
    pub signature: Option<String>,
    pub doc: Option<String>,
    pub defined_at_line: u32,
    pub span_start_line: u32,
    pub span_end_line: u32,
    pub scope: Option<String>,
    pub modifiers: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SymbolHit {
    pub symbol: String,
    pub kind: SymbolKind,
    pub file: String,
    pub line: u32,
    pub signature: Option<String>,
    pub doc: Option<String>,
    pub language: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Bm25Hit {
    pub file: String,
    pub language: String,
    pub snippet: String,
    pub score: f64,
    /// The 1-based line the earliest match falls on, computed from the
    /// FTS5 `offsets()` byte offset in `search_bm25`.
    pub line: u32,
}

/// Parses FTS5's `offsets()` output — space-separated quadruples of
/// `(column, phrase, byte_offset, byte_length)`, one per match — and
/// converts the earliest match in the content column (index 1; `path` is
/// column 0 and is `UNINDEXED`, so it never appears here) into a 1-based
/// line number by counting newlines in `content` up to that offset.
fn line_of_first_match(content: &str, offsets: &str) -> u32 {
    const CONTENT_COLUMN: i64 = 1;
    let nums: Vec<i64> = offsets.split_whitespace().filter_map(|s| s.parse().ok()).collect();

    let mut earliest: Option<usize> = None;
    for quad in nums.chunks(4) {
        if let [column, _phrase, byte_offset, _len] = quad {
            if *column == CONTENT_COLUMN {
                let offset = (*byte_offset).max(0) as usize;
                earliest = Some(earliest.map_or(offset, |e: usize| e.min(offset)));
            }
        }
    }

    let offset = earliest.unwrap_or(0).min(content.len());
    1 + content.as_bytes()[..offset].iter().filter(|&&b| b == b'\n').count() as u32
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct RepositoryStats {
    pub file_count: u64,
    pub symbol_count: u64,
    pub last_indexed_at: Option<u64>,
}

/// One repo = one embedded database file. Writer concurrency is serialized
/// per database via an internal mutex; reader concurrency is unrestricted
/// under WAL (a single `rusqlite::Connection` per `Store` still serializes
/// at the connection level, which matches the spec's "one writer" model —
/// concurrent readers across processes still benefit from WAL).
pub struct Store {
    conn: Mutex<Connection>,
}

/// Kind priority used to order `lookup_symbol` results when several kinds
/// match the same name, and to resolve the "most likely the definition"
/// heuristic.
fn kind_priority(kind: SymbolKind) -> u8 {
    match kind {
        SymbolKind::Class => 0,
        SymbolKind::Interface => 1,
        SymbolKind::Struct => 2,
        SymbolKind::Trait => 3,
        SymbolKind::Enum => 4,
        SymbolKind::Function => 5,
        SymbolKind::Method => 6,
        SymbolKind::TypeAlias => 7,
        SymbolKind::Macro => 8,
        SymbolKind::Namespace => 9,
        SymbolKind::Module => 10,
        SymbolKind::Constant => 11,
        SymbolKind::Variable => 12,
        SymbolKind::Property => 13,
        SymbolKind::Field => 14,
        SymbolKind::Label => 15,
        SymbolKind::Import => 16,
    }
}

impl Store {
    /// Opens (creating if absent) the database at `db_path`, enables WAL
    /// journaling, and applies pending migrations inside a transaction.
    /// A migration failure is fatal (`schema_migration_failed`); any other
    /// open failure that indicates corruption surfaces as `store_corrupt`.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut conn = Connection::open(db_path)
            .map_err(|e| CoreError::new(ErrorKind::StoreCorrupt, format!("opening {}: {e}", db_path.display())))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| CoreError::new(ErrorKind::StoreCorrupt, e.to_string()))?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| CoreError::new(ErrorKind::StoreCorrupt, e.to_string()))?;

        migrations::apply(&mut conn).map_err(|e| CoreError::new(ErrorKind::SchemaMigrationFailed, e.to_string()))?;

        Ok(Self { conn: Mutex::new(conn) })
    }

    /// In-memory store, for tests and ephemeral sessions.
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migrations::apply(&mut conn).map_err(|e| CoreError::new(ErrorKind::SchemaMigrationFailed, e.to_string()))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn ensure_repository(&self, repo_id: &str, name: &str, root_path: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO repository(repo_id, name, root_path, created_at, metadata_json)
             VALUES (?1, ?2, ?3, strftime('%s','now'), '{}')
             ON CONFLICT(repo_id) DO NOTHING",
            params![repo_id, name, root_path],
        )?;
        Ok(())
    }

    /// If `(repo_id, relative_path)` exists with the same hash, returns the
    /// existing `file_id` untouched — the caller may skip re-parsing. If
    /// the hash changed (or the row is new), existing symbols are deleted
    /// in the same transaction so the subsequent `replace_symbols` starts
    /// clean.
    pub fn upsert_file(
        &self,
        repo_id: &str,
        relative_path: &str,
        absolute_path: &str,
        language: &str,
        size: u64,
        hash: &str,
    ) -> Result<(i64, bool)> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let existing: Option<(i64, String)> = tx
            .query_row(
                "SELECT file_id, hash FROM files WHERE repo_id = ?1 AND relative_path = ?2",
                params![repo_id, relative_path],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (file_id, changed) = match existing {
            Some((file_id, old_hash)) if old_hash == hash => {
                tx.execute(
                    "UPDATE files SET indexed_at = strftime('%s','now') WHERE file_id = ?1",
                    params![file_id],
                )?;
                (file_id, false)
            }
            Some((file_id, _)) => {
                tx.execute("DELETE FROM symbols WHERE file_id = ?1", params![file_id])?;
                tx.execute(
                    "UPDATE files SET absolute_path = ?2, language = ?3, size = ?4, hash = ?5, indexed_at = strftime('%s','now')
                     WHERE file_id = ?1",
                    params![file_id, absolute_path, language, size as i64, hash],
                )?;
                (file_id, true)
            }
            None => {
                tx.execute(
                    "INSERT INTO files(repo_id, relative_path, absolute_path, language, size, hash, indexed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, strftime('%s','now'))",
                    params![repo_id, relative_path, absolute_path, language, size as i64, hash],
                )?;
                (tx.last_insert_rowid(), true)
            }
        };

        tx.commit()?;
        Ok((file_id, changed))
    }

    /// Must be called inside the same logical file-upsert as
    /// `upsert_file`; replaces all symbols for `file_id` atomically.
    pub fn replace_symbols(&self, file_id: i64, language: &str, symbols: &[NewSymbol]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM symbols WHERE file_id = ?1", params![file_id])?;
        for s in symbols {
            let modifiers_json = serde_json::to_string(&s.modifiers).unwrap_or_else(|_| "[]".to_string());
            tx.execute(
                "INSERT INTO symbols(file_id, name, kind, signature, doc, line, span_start, span_end, scope, modifiers_json, language)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    file_id,
                    s.name,
                    s.kind.as_str(),
                    s.signature,
                    s.doc,
                    s.defined_at_line,
                    s.span_start_line,
                    s.span_end_line,
                    s.scope,
                    modifiers_json,
                    language,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Writes the BM25 content row, replacing on conflict so each indexed
    /// file occupies exactly one row keyed by `relative_path`.
    pub fn upsert_content(&self, relative_path: &str, content: &str, file_hash: &str, size: u64, language: &str) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM bm25_content WHERE path = ?1", params![relative_path])?;
        tx.execute(
            "INSERT INTO bm25_content(path, content) VALUES (?1, ?2)",
            params![relative_path, content],
        )?;
        tx.execute(
            "INSERT INTO bm25_metadata(path, file_hash, size, language, indexed_at) VALUES (?1, ?2, ?3, ?4, strftime('%s','now'))
             ON CONFLICT(path) DO UPDATE SET file_hash = excluded.file_hash, size = excluded.size, language = excluded.language, indexed_at = excluded.indexed_at",
            params![relative_path, file_hash, size as i64, language],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Exact name, case-sensitive lookup. Ordered by kind priority, then
    /// shorter path first (a heuristic for "most likely the definition").
    pub fn lookup_symbol(&self, name: &str, kind: Option<SymbolKind>, limit: usize) -> Result<Vec<SymbolHit>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT s.name, s.kind, f.relative_path, s.line, s.signature, s.doc, s.language
             FROM symbols s JOIN files f ON f.file_id = s.file_id
             WHERE s.name = ?1 AND (?2 IS NULL OR s.kind = ?2)",
        )?;
        let kind_str = kind.map(|k| k.as_str());
        let rows = stmt.query_map(params![name, kind_str], |row| {
            let kind_str: String = row.get(1)?;
            let file: String = row.get(2)?;
            Ok((
                SymbolHit {
                    symbol: row.get(0)?,
                    kind: SymbolKind::from_str(&kind_str).unwrap_or(SymbolKind::Variable),
                    file: file.clone(),
                    line: row.get(3)?,
                    signature: row.get(4)?,
                    doc: row.get(5)?,
                    language: row.get(6)?,
                },
                file,
            ))
        })?;

        let mut hits: Vec<(SymbolHit, String)> = rows.collect::<std::result::Result<_, _>>()?;
        hits.sort_by(|a, b| {
            kind_priority(a.0.kind)
                .cmp(&kind_priority(b.0.kind))
                .then_with(|| a.1.len().cmp(&b.1.len()))
                .then_with(|| a.1.cmp(&b.1))
        });

        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for (hit, file) in hits {
            let key = (file.clone(), hit.line, hit.symbol.clone());
            if seen.insert(key) {
                out.push(hit);
            }
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    /// Uses the FTS engine's built-in BM25 ranker (`rank` virtual column);
    /// snippet has highlighted span markers and an ellipsis-bounded
    /// ~20-token window, via FTS5's `snippet()` function. Line number comes
    /// from FTS5's `offsets()` auxiliary function: the byte offset of the
    /// earliest match in the (unindexed) content column, converted to a
    /// 1-based line by counting newlines up to that offset.
    pub fn search_bm25(&self, query: &str, limit: usize) -> Result<Vec<Bm25Hit>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT bm25_content.path, bm25_metadata.language, snippet(bm25_content, 1, '[', ']', '...', 20), bm25(bm25_content), bm25_content.content, offsets(bm25_content)
                 FROM bm25_content
                 JOIN bm25_metadata ON bm25_metadata.path = bm25_content.path
                 WHERE bm25_content MATCH ?1
                 ORDER BY bm25(bm25_content)
                 LIMIT ?2",
            )
            .map_err(|e| CoreError::new(ErrorKind::InvalidQuery, e.to_string()))?;

        let rows = stmt
            .query_map(params![query, limit as i64], |row| {
                let content: String = row.get(4)?;
                let offsets: String = row.get(5)?;
                Ok(Bm25Hit {
                    file: row.get(0)?,
                    language: row.get(1)?,
                    snippet: row.get(2)?,
                    score: -row.get::<_, f64>(3)?,
                    line: line_of_first_match(&content, &offsets),
                })
            })
            .map_err(|e| CoreError::new(ErrorKind::InvalidQuery, e.to_string()))?;

        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    /// Fires an FTS optimize pass; idempotent per spec invariant.
    pub fn optimize_fts(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("INSERT INTO bm25_content(bm25_content) VALUES ('optimize')", [])?;
        Ok(())
    }

    /// Cascades: symbols for the file and its BM25 row are removed in the
    /// same transaction.
    pub fn delete_file(&self, repo_id: &str, relative_path: &str) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM files WHERE repo_id = ?1 AND relative_path = ?2",
            params![repo_id, relative_path],
        )?;
        tx.execute("DELETE FROM bm25_content WHERE path = ?1", params![relative_path])?;
        tx.execute("DELETE FROM bm25_metadata WHERE path = ?1", params![relative_path])?;
        tx.commit()?;
        Ok(())
    }

    pub fn file_hash(&self, repo_id: &str, relative_path: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        Ok(conn
            .query_row(
                "SELECT hash FROM files WHERE repo_id = ?1 AND relative_path = ?2",
                params![repo_id, relative_path],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn repository_stats(&self, repo_id: &str) -> Result<RepositoryStats> {
        let conn = self.conn.lock().unwrap();
        let file_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM files WHERE repo_id = ?1",
            params![repo_id],
            |row| row.get(0),
        )?;
        let symbol_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM symbols s JOIN files f ON f.file_id = s.file_id WHERE f.repo_id = ?1",
            params![repo_id],
            |row| row.get(0),
        )?;
        let last_indexed_at: Option<i64> = conn
            .query_row(
                "SELECT MAX(indexed_at) FROM files WHERE repo_id = ?1",
                params![repo_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();

        Ok(RepositoryStats {
            file_count: file_count as u64,
            symbol_count: symbol_count as u64,
            last_indexed_at: last_indexed_at.map(|v| v as u64),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_symbol(name: &str, kind: SymbolKind, line: u32) -> NewSymbol {
        NewSymbol {
            name: name.to_string(),
            kind,
            signature: None,
            doc: None,
            defined_at_line: line,
            span_start_line: line,
            span_end_line: line + 3,
            scope: None,
            modifiers: vec![],
        }
    }

    #[test]
    fn upsert_file_same_hash_is_noop_for_symbols() {
        let store = Store::open_in_memory().unwrap();
        let (file_id, changed1) = store.upsert_file("repo1", "a.py", "/root/a.py", "python", 10, "hash1").unwrap();
        store.replace_symbols(file_id, "python", &[sample_symbol("AuthManager", SymbolKind::Class, 10)]).unwrap();

        let (file_id2, changed2) = store.upsert_file("repo1", "a.py", "/root/a.py", "python", 10, "hash1").unwrap();
        assert_eq!(file_id, file_id2);
        assert!(changed1);
        assert!(!changed2);

        let hits = store.lookup_symbol("AuthManager", None, 20).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn symbol_lookup_s1_scenario() {
        let store = Store::open_in_memory().unwrap();
        let (file_id, _) = store.upsert_file("repo1", "src/auth.py", "/root/src/auth.py", "python", 100, "h1").unwrap();
        store
            .replace_symbols(
                file_id,
                "python",
                &[
                    sample_symbol("AuthManager", SymbolKind::Class, 10),
                    sample_symbol("login", SymbolKind::Method, 14),
                ],
            )
            .unwrap();

        let hits = store.lookup_symbol("AuthManager", None, 20).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].kind, SymbolKind::Class);
        assert_eq!(hits[0].file, "src/auth.py");
        assert_eq!(hits[0].line, 10);

        let hits = store.lookup_symbol("login", Some(SymbolKind::Method), 20).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].line, 14);
    }

    #[test]
    fn delete_file_removes_symbols_and_content() {
        let store = Store::open_in_memory().unwrap();
        let (file_id, _) = store.upsert_file("repo1", "a.py", "/root/a.py", "python", 10, "hash1").unwrap();
        store.replace_symbols(file_id, "python", &[sample_symbol("Foo", SymbolKind::Class, 1)]).unwrap();
        store.upsert_content("a.py", "class Foo: pass", "hash1", 10, "python").unwrap();

        store.delete_file("repo1", "a.py").unwrap();

        assert!(store.lookup_symbol("Foo", None, 20).unwrap().is_empty());
        assert!(store.search_bm25("Foo", 20).unwrap().is_empty());
    }

    #[test]
    fn search_bm25_s2_scenario() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_content("a.go", "package main // unicorn lives here", "h1", 30, "go").unwrap();
        store.upsert_content("b/c.py", "# a unicorn walked by", "h2", 20, "python").unwrap();
        store.upsert_content("d.md", "unicorn facts", "h3", 10, "markdown").unwrap();
        store.upsert_content("e.txt", "nothing interesting here", "h4", 20, "text").unwrap();

        let hits = store.search_bm25("unicorn", 10).unwrap();
        assert_eq!(hits.len(), 3);
        for hit in &hits {
            assert!(!hit.file.is_empty());
            assert_eq!(hit.line, 1);
        }
    }

    #[test]
    fn search_bm25_reports_the_line_the_match_is_actually_on() {
        let store = Store::open_in_memory().unwrap();
        let content = "line one\nline two\nthe unicorn appears here\nline four\n";
        store.upsert_content("multi.txt", content, "h1", content.len() as u64, "text").unwrap();

        let hits = store.search_bm25("unicorn", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].line, 3);
    }

    #[test]
    fn line_of_first_match_counts_newlines_before_the_offset() {
        let content = "aaa\nbbb\nccc unicorn ddd\n";
        // "ccc unicorn ddd" starts at byte 8; column 1 is the content column.
        let offsets = "1 0 8 7";
        assert_eq!(line_of_first_match(content, offsets), 3);
        assert_eq!(line_of_first_match(content, ""), 1);
    }

    #[test]
    fn repository_stats_counts() {
        let store = Store::open_in_memory().unwrap();
        let (file_id, _) = store.upsert_file("repo1", "a.py", "/root/a.py", "python", 10, "hash1").unwrap();
        store.replace_symbols(file_id, "python", &[sample_symbol("Foo", SymbolKind::Class, 1)]).unwrap();

        let stats = store.repository_stats("repo1").unwrap();
        assert_eq!(stats.file_count, 1);
        assert_eq!(stats.symbol_count, 1);
        assert!(stats.last_indexed_at.is_some());
    }
}

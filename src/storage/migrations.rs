//! Numbered SQL migrations applied in order at `Store::open`, inside a
//! single transaction, recording the resulting version in `schema_version`.

use rusqlite::Connection;

const MIGRATIONS: &[(i64, &str)] = &[(
    1,
    r#"
    CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);

    CREATE TABLE IF NOT EXISTS repository (
        repo_id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        root_path TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        metadata_json TEXT NOT NULL DEFAULT '{}'
    );

    CREATE TABLE IF NOT EXISTS files (
        file_id INTEGER PRIMARY KEY AUTOINCREMENT,
        repo_id TEXT NOT NULL,
        relative_path TEXT NOT NULL,
        absolute_path TEXT NOT NULL,
        language TEXT NOT NULL,
        size INTEGER NOT NULL,
        hash TEXT NOT NULL,
        indexed_at INTEGER NOT NULL,
        UNIQUE(repo_id, relative_path)
    );

    CREATE TABLE IF NOT EXISTS symbols (
        symbol_id INTEGER PRIMARY KEY AUTOINCREMENT,
        file_id INTEGER NOT NULL REFERENCES files(file_id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        kind TEXT NOT NULL,
        signature TEXT,
        doc TEXT,
        line INTEGER NOT NULL,
        span_start INTEGER NOT NULL,
        span_end INTEGER NOT NULL,
        scope TEXT,
        modifiers_json TEXT NOT NULL DEFAULT '[]',
        language TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_symbols_name ON symbols(name);
    CREATE INDEX IF NOT EXISTS idx_symbols_name_kind ON symbols(name, kind);
    CREATE INDEX IF NOT EXISTS idx_symbols_file_id ON symbols(file_id);

    CREATE VIRTUAL TABLE IF NOT EXISTS bm25_content USING fts5(
        path UNINDEXED,
        content,
        tokenize = 'unicode61 remove_diacritics 2'
    );

    CREATE TABLE IF NOT EXISTS bm25_metadata (
        path TEXT PRIMARY KEY,
        file_hash TEXT NOT NULL,
        size INTEGER NOT NULL,
        language TEXT NOT NULL,
        indexed_at INTEGER NOT NULL
    );
    "#,
)];

pub fn apply(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")?;

    let current: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| row.get(0))
        .unwrap_or(0);

    let tx = conn.transaction()?;
    for (version, sql) in MIGRATIONS {
        if *version <= current {
            continue;
        }
        tx.execute_batch(sql)?;
        tx.execute("INSERT INTO schema_version(version) VALUES (?1)", [version])?;
    }
    tx.commit()?;

    Ok(())
}

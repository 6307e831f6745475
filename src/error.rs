//! The closed error taxonomy shared by every fallible operation in the crate.

use std::fmt;
use std::path::PathBuf;

/// Stable, machine-readable error kind. Consumers (including an external
/// JSON-RPC layer) may match on this string; it must never change shape for
/// an existing variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NoIndex,
    StoreCorrupt,
    StoreLocked,
    ParseFailed,
    BackendTimeout,
    BackendUnavailable,
    InvalidQuery,
    Unauthorized,
    NotInWorktree,
    IoError,
    SchemaMigrationFailed,
    NoIdentity,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NoIndex => "no_index",
            ErrorKind::StoreCorrupt => "store_corrupt",
            ErrorKind::StoreLocked => "store_locked",
            ErrorKind::ParseFailed => "parse_failed",
            ErrorKind::BackendTimeout => "backend_timeout",
            ErrorKind::BackendUnavailable => "backend_unavailable",
            ErrorKind::InvalidQuery => "invalid_query",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::NotInWorktree => "not_in_worktree",
            ErrorKind::IoError => "io_error",
            ErrorKind::SchemaMigrationFailed => "schema_migration_failed",
            ErrorKind::NoIdentity => "no_identity",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The crate's single error type: a closed `kind` plus a free-form detail
/// string for logs. No shared exception channel, no downcasting.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct CoreError {
    pub kind: ErrorKind,
    pub detail: String,
}

impl CoreError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn no_index(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::NoIndex, detail)
    }

    pub fn store_corrupt(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::StoreCorrupt, detail)
    }

    pub fn unauthorized(repo_id: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, format!("repository {} is not on the allow-list", repo_id.into()))
    }

    pub fn not_in_worktree(path: &std::path::Path) -> Self {
        Self::new(ErrorKind::NotInWorktree, format!("{} escapes the worktree", path.display()))
    }

    pub fn io(path: &std::path::Path, source: &std::io::Error) -> Self {
        Self::new(ErrorKind::IoError, format!("{}: {}", path.display(), source))
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::new(ErrorKind::IoError, e.to_string())
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        CoreError::new(ErrorKind::StoreCorrupt, e.to_string())
    }
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// Raised by path validation when a candidate path is outside a worktree root.
#[derive(Debug)]
pub struct PathEscape(pub PathBuf);

pub type Result<T> = CoreResult<T>;

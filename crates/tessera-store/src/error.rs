//! Error types for the store module.

use std::path::PathBuf;

use thiserror::Error;

use tessera_core::{QueryError, WorkspaceId};

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The driver was closed; no further operations are possible.
    #[error("storage driver is closed")]
    Closed,

    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The query cannot be evaluated.
    #[error("invalid query: {0}")]
    InvalidQuery(#[from] QueryError),

    /// Existing storage belongs to another workspace.
    #[error("storage holds workspace {found}, expected {expected}")]
    WorkspaceMismatch {
        expected: WorkspaceId,
        found: String,
    },

    /// Existing storage was written by an unknown schema version.
    #[error("unsupported schema version: {0}")]
    UnsupportedSchema(String),

    /// `OpenMode::Create` on storage that already exists.
    #[error("storage already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    /// `OpenMode::Open` on storage that does not exist.
    #[error("storage not found: {}", .0.display())]
    NotFound(PathBuf),

    /// A complete log record that cannot be decoded.
    #[error("corrupt log at offset {offset}: {reason}")]
    CorruptLog { offset: u64, reason: String },

    /// A failed append could not be rolled back; the log must be reopened.
    #[error("log store is unusable after a failed write; reopen it")]
    LogUnusable,

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// A backend or mode this build does not support.
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
}

impl StoreError {
    /// A lock was poisoned by a panic while held.
    pub(crate) fn poisoned(what: &str) -> Self {
        StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("{what} lock poisoned"),
        ))
    }

    /// A blocking task failed to complete.
    pub(crate) fn join(err: tokio::task::JoinError) -> Self {
        StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("spawn_blocking failed: {err}"),
        ))
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

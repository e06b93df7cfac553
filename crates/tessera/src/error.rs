//! Error types for replicas.

use thiserror::Error;

use tessera_store::StoreError;

/// Errors that can occur during replica operations.
///
/// Rejected or superseded documents are not errors; they are reported as an
/// [`IngestOutcome`](crate::IngestOutcome).
#[derive(Debug, Error)]
pub enum ReplicaError {
    /// The replica (or its storage) was closed.
    #[error("replica is closed")]
    Closed,

    /// Storage error.
    #[error("storage error: {0}")]
    Store(StoreError),

    /// `overwrite_all_docs_by_author` stopped partway.
    #[error("overwrite stopped at {path}: {reason}")]
    Overwrite { path: String, reason: String },
}

impl From<StoreError> for ReplicaError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Closed => ReplicaError::Closed,
            other => ReplicaError::Store(other),
        }
    }
}

/// Result type for replica operations.
pub type Result<T> = std::result::Result<T, ReplicaError>;

//! Error types for Tessera Core.

use thiserror::Error;

/// Low-level errors from crypto and encoding primitives.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("encoding error: {0}")]
    EncodingError(String),
}

/// Reasons a document (or a document-to-be) is unacceptable.
///
/// Always recoverable: the caller rejects the document and nothing is written.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("invalid workspace address: {0}")]
    InvalidWorkspace(String),

    #[error("document belongs to workspace {got}, expected {expected}")]
    WorkspaceMismatch { expected: String, got: String },

    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("content hash does not match content")]
    ContentHashMismatch,

    #[error("timestamp {0} is out of range")]
    TimestampOutOfRange(i64),

    #[error("timestamp {timestamp} is too far in the future (now is {now})")]
    TimestampInFuture { timestamp: i64, now: i64 },

    #[error("deleteAfter {delete_after} must be later than timestamp {timestamp}")]
    DeleteAfterBeforeTimestamp { timestamp: i64, delete_after: i64 },

    #[error("document expired at {delete_after} (now is {now})")]
    Expired { delete_after: i64, now: i64 },

    #[error("unknown field: {0}")]
    UnknownField(String),

    #[error("signature verification failed")]
    SignatureFailed,

    #[error("author does not match signing keypair")]
    AuthorMismatch,

    #[error("malformed document: {0}")]
    Malformed(String),
}

impl From<CoreError> for ValidationError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::InvalidSignature | CoreError::InvalidPublicKey => {
                ValidationError::SignatureFailed
            }
            CoreError::InvalidHex(msg) | CoreError::EncodingError(msg) => {
                ValidationError::Malformed(msg)
            }
        }
    }
}

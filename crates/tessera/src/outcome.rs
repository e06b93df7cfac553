//! What happened to a document handed to `ingest` or `set`.

use tessera_core::{Document, LocalIndex, ValidationError};

/// The result of ingesting one document.
///
/// Only storage failures and a closed replica are errors; every other result,
/// including an invalid document, is one of these.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// The document was written.
    Success(IngestSuccess),

    /// The document was valid but nothing was written.
    NothingHappened {
        reason: NothingHappenedReason,
        doc: Document,
        max_local_index: LocalIndex,
    },

    /// The document was rejected.
    Failure {
        reason: FailureReason,
        error: ValidationError,
        max_local_index: LocalIndex,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestSuccess {
    /// The document as stored, carrying its new local index.
    pub doc: Document,
    pub max_local_index: LocalIndex,
    /// Whether the document is now the winner at its path.
    pub doc_is_latest: bool,
    /// The author's document at this path that was replaced, if any.
    pub prev_doc_from_same_author: Option<Document>,
    /// The winner at this path before the write, if any.
    pub prev_latest_doc: Option<Document>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NothingHappenedReason {
    /// The replica holds a newer document from the same author at this path.
    ObsoleteFromSameAuthor,
    /// The replica holds this exact document.
    AlreadyHadIt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    InvalidDocument,
}

impl IngestOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, IngestOutcome::Success(_))
    }

    /// The stored document, on success.
    pub fn doc(&self) -> Option<&Document> {
        match self {
            IngestOutcome::Success(success) => Some(&success.doc),
            _ => None,
        }
    }

    pub fn max_local_index(&self) -> LocalIndex {
        match self {
            IngestOutcome::Success(success) => success.max_local_index,
            IngestOutcome::NothingHappened {
                max_local_index, ..
            }
            | IngestOutcome::Failure {
                max_local_index, ..
            } => *max_local_index,
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestOutcome::Success(_) => "success",
            IngestOutcome::NothingHappened {
                reason: NothingHappenedReason::ObsoleteFromSameAuthor,
                ..
            } => "obsolete_from_same_author",
            IngestOutcome::NothingHappened {
                reason: NothingHappenedReason::AlreadyHadIt,
                ..
            } => "already_had_it",
            IngestOutcome::Failure { .. } => "invalid_document",
        }
    }
}

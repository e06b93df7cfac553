//! Format validators: schema checks, reserved-field stripping and signing.
//!
//! The replica only talks to the [`FormatValidator`] trait. [`Ed25519Validator`]
//! is the `tes.1` format: Ed25519 signatures over canonical CBOR, Blake3
//! content hashes, microsecond timestamps.

use crate::canonical::signed_message;
use crate::crypto::{digest, Keypair};
use crate::document::{Document, ExtraFields};
use crate::error::ValidationError;
use crate::types::{check_workspace_address, Timestamp};

/// Format tag produced and accepted by [`Ed25519Validator`].
pub const FORMAT_TES1: &str = "tes.1";

/// Earliest acceptable timestamp (microseconds; rejects millisecond clocks).
pub const MIN_TIMESTAMP: Timestamp = 10_000_000_000_000;

/// Latest acceptable timestamp: 2^53 - 2, still exact in a JSON number.
pub const MAX_TIMESTAMP: Timestamp = 9_007_199_254_740_990;

/// How far ahead of `now` a timestamp may be.
pub const FUTURE_CUTOFF_MICROS: Timestamp = 10 * 60 * 1_000_000;

pub const MAX_PATH_LEN: usize = 512;

/// Characters allowed in a path besides ASCII alphanumerics.
const PATH_PUNCTUATION: &str = "/'()-._~!$&*+,:;=@%";

/// A document split from the fields the replica does not store.
#[derive(Debug, Clone, PartialEq)]
pub struct Stripped {
    pub doc: Document,
    /// Reserved fields that were removed, by wire name.
    pub extras: ExtraFields,
}

/// Validation and signing capability for one document format.
///
/// Implementations must be deterministic and pure.
pub trait FormatValidator: Send + Sync {
    /// The format tag this validator accepts.
    fn format(&self) -> &str;

    /// Check structure, timestamps, content hash and signature.
    fn check_valid(&self, doc: &Document, now: Timestamp) -> Result<(), ValidationError>;

    /// Sign `doc` with `keypair`, replacing its signature.
    fn sign(&self, keypair: &Keypair, doc: Document) -> Result<Document, ValidationError>;

    /// Remove reserved (underscore-prefixed) fields. Any other unknown field
    /// makes the document invalid.
    fn remove_extra_fields(&self, doc: Document) -> Result<Stripped, ValidationError>;
}

/// The `tes.1` validator.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Validator;

impl Ed25519Validator {
    pub fn new() -> Self {
        Self
    }

    /// Timestamp and `delete_after` bounds.
    pub fn check_timestamps(
        timestamp: Timestamp,
        delete_after: Option<Timestamp>,
        now: Timestamp,
    ) -> Result<(), ValidationError> {
        if !(MIN_TIMESTAMP..=MAX_TIMESTAMP).contains(&timestamp) {
            return Err(ValidationError::TimestampOutOfRange(timestamp));
        }
        if timestamp > now.saturating_add(FUTURE_CUTOFF_MICROS) {
            return Err(ValidationError::TimestampInFuture { timestamp, now });
        }
        if let Some(delete_after) = delete_after {
            if !(MIN_TIMESTAMP..=MAX_TIMESTAMP).contains(&delete_after) {
                return Err(ValidationError::TimestampOutOfRange(delete_after));
            }
            if delete_after <= timestamp {
                return Err(ValidationError::DeleteAfterBeforeTimestamp {
                    timestamp,
                    delete_after,
                });
            }
            if delete_after <= now {
                return Err(ValidationError::Expired { delete_after, now });
            }
        }
        Ok(())
    }

    /// Path syntax. Ephemeral documents must carry a `!` in their path and
    /// permanent ones must not.
    pub fn check_path(path: &str, delete_after: Option<Timestamp>) -> Result<(), ValidationError> {
        let invalid = |reason| ValidationError::InvalidPath {
            path: path.to_string(),
            reason,
        };

        if path.len() < 2 || path.len() > MAX_PATH_LEN {
            return Err(invalid("length must be between 2 and 512 bytes"));
        }
        if !path.starts_with('/') {
            return Err(invalid("must start with '/'"));
        }
        if path.ends_with('/') {
            return Err(invalid("must not end with '/'"));
        }
        if path.contains("//") {
            return Err(invalid("must not contain '//'"));
        }
        if path.starts_with("/@") {
            return Err(invalid("must not start with '/@'"));
        }
        if !path
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || PATH_PUNCTUATION.contains(c))
        {
            return Err(invalid("contains a disallowed character"));
        }
        match (path.contains('!'), delete_after.is_some()) {
            (true, false) => Err(invalid("'!' is only allowed in ephemeral documents")),
            (false, true) => Err(invalid("ephemeral documents need a '!' in the path")),
            _ => Ok(()),
        }
    }
}

impl FormatValidator for Ed25519Validator {
    fn format(&self) -> &str {
        FORMAT_TES1
    }

    fn check_valid(&self, doc: &Document, now: Timestamp) -> Result<(), ValidationError> {
        if doc.format != FORMAT_TES1 {
            return Err(ValidationError::UnsupportedFormat(doc.format.clone()));
        }
        if let Some(key) = doc.extra.keys().next() {
            return Err(ValidationError::UnknownField(key.clone()));
        }
        check_workspace_address(doc.workspace.as_str())?;
        Self::check_path(&doc.path, doc.delete_after)?;
        Self::check_timestamps(doc.timestamp, doc.delete_after, now)?;

        if digest(&doc.content) != doc.content_hash {
            return Err(ValidationError::ContentHashMismatch);
        }

        doc.author
            .verify(&signed_message(doc), &doc.signature)
            .map_err(ValidationError::from)
    }

    fn sign(&self, keypair: &Keypair, mut doc: Document) -> Result<Document, ValidationError> {
        if doc.format != FORMAT_TES1 {
            return Err(ValidationError::UnsupportedFormat(doc.format));
        }
        if doc.author != keypair.public_key() {
            return Err(ValidationError::AuthorMismatch);
        }
        doc.signature = keypair.sign(&signed_message(&doc));
        Ok(doc)
    }

    fn remove_extra_fields(&self, mut doc: Document) -> Result<Stripped, ValidationError> {
        let mut extras = ExtraFields::new();

        if let Some(index) = doc.local_index.take() {
            extras.insert("_localIndex".to_string(), index.into());
        }
        for (key, value) in std::mem::take(&mut doc.extra) {
            if !key.starts_with('_') {
                return Err(ValidationError::UnknownField(key));
            }
            extras.insert(key, value);
        }

        Ok(Stripped { doc, extras })
    }
}

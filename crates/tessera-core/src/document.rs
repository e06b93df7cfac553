//! Document: the unit of storage and replication.
//!
//! A document lives at a `path` in a workspace and is signed by its `author`.
//! Each (path, author) pair holds at most one current document; documents
//! from different authors at the same path form that path's history.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::crypto::{digest, Blake3Hash, Ed25519PublicKey, Ed25519Signature};
use crate::types::{LocalIndex, Timestamp, WorkspaceId};

/// Fields a document may carry beyond the signed schema, keyed by wire name.
pub type ExtraFields = BTreeMap<String, serde_json::Value>;

/// A signed document.
///
/// The wire form is camelCase JSON. `_localIndex` and any other
/// underscore-prefixed field are local bookkeeping and are never signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Validator format tag, e.g. `tes.1`.
    pub format: String,
    pub workspace: WorkspaceId,
    pub path: String,
    pub author: Ed25519PublicKey,
    pub content: String,
    pub content_hash: Blake3Hash,
    /// Writer-claimed time in microseconds. Primary ordering key.
    pub timestamp: Timestamp,
    /// Expiry time in microseconds; `None` for permanent documents.
    #[serde(default)]
    pub delete_after: Option<Timestamp>,
    pub signature: Ed25519Signature,
    /// Assigned by the storage driver on write.
    #[serde(rename = "_localIndex", default, skip_serializing_if = "Option::is_none")]
    pub local_index: Option<LocalIndex>,
    /// Unrecognized fields received from a peer.
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl Document {
    /// Build an unsigned document; `content_hash` is computed from `content`.
    pub fn unsigned(
        format: impl Into<String>,
        workspace: WorkspaceId,
        author: Ed25519PublicKey,
        path: impl Into<String>,
        content: impl Into<String>,
        timestamp: Timestamp,
        delete_after: Option<Timestamp>,
    ) -> Self {
        let content = content.into();
        Self {
            format: format.into(),
            workspace,
            path: path.into(),
            author,
            content_hash: digest(&content),
            content,
            timestamp,
            delete_after,
            signature: Ed25519Signature::ZERO,
            local_index: None,
            extra: ExtraFields::new(),
        }
    }

    /// Length of the content in bytes.
    pub fn content_length(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Whether the document is past its `delete_after` at `now`.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        matches!(self.delete_after, Some(t) if t <= now)
    }

    /// The document with driver bookkeeping removed, as it was signed.
    pub fn without_local_index(mut self) -> Self {
        self.local_index = None;
        self
    }

    /// Parse the JSON wire form.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// What a caller supplies to `set`: content and intent, no signature.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocToSet {
    pub path: String,
    pub content: String,
    /// Explicit timestamp. When `None`, the replica picks one that wins.
    pub timestamp: Option<Timestamp>,
    /// Absolute expiry time. When the timestamp is chosen automatically this
    /// is read as a lifespan from the current time and moved along with the
    /// chosen timestamp.
    pub delete_after: Option<Timestamp>,
}

impl DocToSet {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn delete_after(mut self, delete_after: Timestamp) -> Self {
        self.delete_after = Some(delete_after);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;

    fn sample() -> Document {
        let author = Keypair::from_seed(&[1; 32]).public_key();
        Document::unsigned(
            "tes.1",
            WorkspaceId::parse("+club.abc").unwrap(),
            author,
            "/notes/a.txt",
            "hello",
            1_600_000_000_000_000,
            None,
        )
    }

    #[test]
    fn test_unsigned_hashes_content() {
        let doc = sample();
        assert_eq!(doc.content_hash, digest("hello"));
        assert_eq!(doc.signature, Ed25519Signature::ZERO);
        assert_eq!(doc.content_length(), 5);
    }

    #[test]
    fn test_json_wire_names() {
        let mut doc = sample();
        doc.local_index = Some(7);
        let json = doc.to_json().unwrap();
        assert!(json.contains("\"contentHash\""));
        assert!(json.contains("\"deleteAfter\":null"));
        assert!(json.contains("\"_localIndex\":7"));

        let back = Document::from_json(&json).unwrap();
        assert_eq!(back, doc);
        assert!(back.extra.is_empty());
    }

    #[test]
    fn test_json_collects_unknown_fields() {
        let mut value = serde_json::to_value(sample()).unwrap();
        value["_seenBy"] = serde_json::json!("peer-1");
        value["color"] = serde_json::json!("blue");

        let doc: Document = serde_json::from_value(value).unwrap();
        assert_eq!(doc.extra.len(), 2);
        assert_eq!(doc.extra["_seenBy"], serde_json::json!("peer-1"));
    }

    #[test]
    fn test_expiry_boundary() {
        let mut doc = sample();
        assert!(!doc.is_expired(i64::MAX));
        doc.delete_after = Some(100);
        assert!(!doc.is_expired(99));
        assert!(doc.is_expired(100));
        assert!(doc.is_expired(101));
    }
}

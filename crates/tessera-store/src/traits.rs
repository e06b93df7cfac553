//! StorageDriver trait: the abstract interface a replica stores through.
//!
//! Every implementation must return the same documents in the same order
//! for the same query, so replicas stay interchangeable.

use async_trait::async_trait;
use tessera_core::{Document, LocalIndex, Query, Timestamp, WorkspaceId};

use crate::error::Result;

/// Config key holding the storage schema version.
pub const CONFIG_SCHEMA_VERSION: &str = "schemaVersion";

/// Config key holding the workspace the storage is bound to.
pub const CONFIG_WORKSPACE: &str = "workspace";

/// Schema version written by this build.
pub const SCHEMA_VERSION: &str = "1";

/// How a durable driver treats existing storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenMode {
    /// Fail if storage already exists.
    Create,
    /// Fail if storage does not exist.
    Open,
    #[default]
    CreateOrOpen,
}

/// The storage driver: document rows keyed by (path, author) plus a small
/// string key/value config.
///
/// All I/O methods are async; durable drivers run blocking work through
/// `spawn_blocking`. After [`close`](StorageDriver::close) every other
/// method fails with [`StoreError::Closed`](crate::StoreError::Closed).
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// The workspace this driver is bound to.
    fn workspace(&self) -> &WorkspaceId;

    fn is_closed(&self) -> bool;

    /// Highest local index ever assigned, or `-1` if none.
    fn max_local_index(&self) -> Result<LocalIndex>;

    // ─────────────────────────────────────────────────────────────────────────
    // Documents
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert or replace the document at (path, author).
    ///
    /// Assigns a fresh local index, greater than any assigned before, and
    /// returns the stored document carrying it.
    async fn upsert(&self, doc: Document) -> Result<Document>;

    /// Evaluate a query. A query that cannot be run is an error, not an
    /// empty result.
    async fn query_docs(&self, query: &Query) -> Result<Vec<Document>>;

    /// Delete every document with `delete_after <= now`. Returns how many
    /// were removed.
    async fn remove_expired_documents(&self, now: Timestamp) -> Result<usize>;

    // ─────────────────────────────────────────────────────────────────────────
    // Config
    // ─────────────────────────────────────────────────────────────────────────

    async fn get_config(&self, key: &str) -> Result<Option<String>>;

    async fn set_config(&self, key: &str, value: &str) -> Result<()>;

    /// Returns whether the key existed.
    async fn delete_config(&self, key: &str) -> Result<bool>;

    /// Sorted config keys.
    async fn list_config_keys(&self) -> Result<Vec<String>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Release resources. With `erase`, documents and config are destroyed,
    /// including any backing file.
    async fn close(&self, erase: bool) -> Result<()>;
}

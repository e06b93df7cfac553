//! In-memory implementation of the StorageDriver trait.
//!
//! The reference driver: the durable drivers must agree with it on every
//! query. Nothing is persisted.

use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

use tessera_core::{Document, LocalIndex, Query, Timestamp, WorkspaceId};

use crate::error::{Result, StoreError};
use crate::table::DocTable;
use crate::traits::StorageDriver;

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock;
/// `None` marks a closed store.
pub struct MemoryStore {
    workspace: WorkspaceId,
    inner: RwLock<Option<DocTable>>,
}

impl MemoryStore {
    /// Create a new empty store bound to `workspace`.
    pub fn new(workspace: WorkspaceId) -> Self {
        Self {
            inner: RwLock::new(Some(DocTable::new(&workspace))),
            workspace,
        }
    }

    fn read<T>(&self, f: impl FnOnce(&DocTable) -> T) -> Result<T> {
        let inner = self
            .inner
            .read()
            .map_err(|_| StoreError::poisoned("memory store"))?;
        inner.as_ref().map(f).ok_or(StoreError::Closed)
    }

    fn write<T>(&self, f: impl FnOnce(&mut DocTable) -> T) -> Result<T> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| StoreError::poisoned("memory store"))?;
        inner.as_mut().map(f).ok_or(StoreError::Closed)
    }
}

#[async_trait]
impl StorageDriver for MemoryStore {
    fn workspace(&self) -> &WorkspaceId {
        &self.workspace
    }

    fn is_closed(&self) -> bool {
        self.inner.read().map(|inner| inner.is_none()).unwrap_or(true)
    }

    fn max_local_index(&self) -> Result<LocalIndex> {
        self.read(DocTable::max_local_index)
    }

    async fn upsert(&self, doc: Document) -> Result<Document> {
        self.write(|table| table.upsert(doc))
    }

    async fn query_docs(&self, query: &Query) -> Result<Vec<Document>> {
        Ok(self.read(|table| table.query(query))??)
    }

    async fn remove_expired_documents(&self, now: Timestamp) -> Result<usize> {
        let removed = self.write(|table| table.remove_expired(now))?;
        if removed > 0 {
            debug!(removed, now, "removed expired documents");
        }
        Ok(removed)
    }

    async fn get_config(&self, key: &str) -> Result<Option<String>> {
        self.read(|table| table.get_config(key))
    }

    async fn set_config(&self, key: &str, value: &str) -> Result<()> {
        self.write(|table| table.set_config(key, value))
    }

    async fn delete_config(&self, key: &str) -> Result<bool> {
        self.write(|table| table.delete_config(key))
    }

    async fn list_config_keys(&self) -> Result<Vec<String>> {
        self.read(DocTable::config_keys)
    }

    async fn close(&self, _erase: bool) -> Result<()> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| StoreError::poisoned("memory store"))?;
        // Dropping the table is already an erase.
        inner.take().map(drop).ok_or(StoreError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::{Keypair, OrderBy, NO_LOCAL_INDEX};

    fn workspace() -> WorkspaceId {
        WorkspaceId::parse("+test.abc").unwrap()
    }

    fn doc(keypair: &Keypair, path: &str, timestamp: Timestamp) -> Document {
        Document::unsigned(
            "tes.1",
            workspace(),
            keypair.public_key(),
            path,
            "hello",
            timestamp,
            None,
        )
    }

    #[tokio::test]
    async fn test_upsert_assigns_increasing_indexes() {
        let store = MemoryStore::new(workspace());
        let kp = Keypair::from_seed(&[1; 32]);
        assert_eq!(store.max_local_index().unwrap(), NO_LOCAL_INDEX);

        let a = store.upsert(doc(&kp, "/a", 10)).await.unwrap();
        let b = store.upsert(doc(&kp, "/b", 10)).await.unwrap();
        let a2 = store.upsert(doc(&kp, "/a", 20)).await.unwrap();

        assert_eq!(a.local_index, Some(0));
        assert_eq!(b.local_index, Some(1));
        assert_eq!(a2.local_index, Some(2));
        assert_eq!(store.max_local_index().unwrap(), 2);

        let all = store
            .query_docs(&Query::all().order_by(OrderBy::LocalIndexAsc))
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].timestamp, 20);
    }

    #[tokio::test]
    async fn test_closed_store_fails_fast() {
        let store = MemoryStore::new(workspace());
        store.close(false).await.unwrap();

        assert!(store.is_closed());
        assert!(matches!(store.max_local_index(), Err(StoreError::Closed)));
        assert!(matches!(
            store.query_docs(&Query::all()).await,
            Err(StoreError::Closed)
        ));
        assert!(matches!(store.close(false).await, Err(StoreError::Closed)));
    }

    #[tokio::test]
    async fn test_invalid_query_is_an_error() {
        let store = MemoryStore::new(workspace());
        let query = Query::all()
            .order_by(OrderBy::LocalIndexAsc)
            .start_after(tessera_core::StartAfter::Path("/a".into()));
        assert!(matches!(
            store.query_docs(&query).await,
            Err(StoreError::InvalidQuery(_))
        ));
    }
}

//! In-process document table shared by the memory and log drivers.

use std::collections::BTreeMap;

use tessera_core::{
    run_query, Document, Ed25519PublicKey, LocalIndex, Query, QueryError, Timestamp,
    WorkspaceId, NO_LOCAL_INDEX,
};

use crate::traits::{CONFIG_SCHEMA_VERSION, CONFIG_WORKSPACE, SCHEMA_VERSION};

/// Documents keyed by (path, author), config, and the local index
/// high-water mark.
#[derive(Debug, Clone)]
pub(crate) struct DocTable {
    docs: BTreeMap<(String, Ed25519PublicKey), Document>,
    config: BTreeMap<String, String>,
    max_local_index: LocalIndex,
}

impl DocTable {
    /// An empty table with the schema and workspace config keys set.
    pub fn new(workspace: &WorkspaceId) -> Self {
        let mut table = Self::empty();
        table.set_config(CONFIG_SCHEMA_VERSION, SCHEMA_VERSION);
        table.set_config(CONFIG_WORKSPACE, workspace.as_str());
        table
    }

    pub fn empty() -> Self {
        Self {
            docs: BTreeMap::new(),
            config: BTreeMap::new(),
            max_local_index: NO_LOCAL_INDEX,
        }
    }

    pub fn max_local_index(&self) -> LocalIndex {
        self.max_local_index
    }

    pub fn next_local_index(&self) -> LocalIndex {
        self.max_local_index + 1
    }

    /// Store `doc` under a fresh local index.
    pub fn upsert(&mut self, mut doc: Document) -> Document {
        doc.local_index = Some(self.next_local_index());
        self.insert_indexed(doc.clone());
        doc
    }

    /// Store a document that already carries its local index.
    pub fn insert_indexed(&mut self, doc: Document) {
        if let Some(index) = doc.local_index {
            self.max_local_index = self.max_local_index.max(index);
        }
        self.docs.insert((doc.path.clone(), doc.author), doc);
    }

    pub fn query(&self, query: &Query) -> Result<Vec<Document>, QueryError> {
        run_query(self.docs.values(), query)
    }

    pub fn count_expired(&self, now: Timestamp) -> usize {
        self.docs.values().filter(|doc| doc.is_expired(now)).count()
    }

    pub fn remove_expired(&mut self, now: Timestamp) -> usize {
        let before = self.docs.len();
        self.docs.retain(|_, doc| !doc.is_expired(now));
        before - self.docs.len()
    }

    pub fn get_config(&self, key: &str) -> Option<String> {
        self.config.get(key).cloned()
    }

    pub fn set_config(&mut self, key: &str, value: &str) {
        self.config.insert(key.to_string(), value.to_string());
    }

    pub fn delete_config(&mut self, key: &str) -> bool {
        self.config.remove(key).is_some()
    }

    pub fn config_keys(&self) -> Vec<String> {
        self.config.keys().cloned().collect()
    }
}

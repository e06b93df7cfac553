//! The Replica: one workspace, one storage driver, one validator.
//!
//! Writes from any source go through [`Replica::ingest`], which decides
//! whether an incoming document supersedes what is stored. The
//! read-decide-write section runs under a per-replica async mutex so two
//! concurrent ingests at the same path cannot both think they won.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use tessera_core::{
    cmp_newest_first, latest, Clock, DocToSet, Document, Ed25519PublicKey, Ed25519Validator,
    FormatValidator, HistoryMode, Keypair, LocalIndex, OrderBy, Query, StartAfter, Stripped,
    SystemClock, ValidationError, WorkspaceId,
};
use tessera_store::StorageDriver;

use crate::error::{ReplicaError, Result};
use crate::events::{EventFilter, ReplicaEvent, Subscription};
use crate::outcome::{FailureReason, IngestOutcome, IngestSuccess, NothingHappenedReason};

/// Configuration for a Replica.
#[derive(Debug, Clone)]
pub struct ReplicaConfig {
    /// Events buffered per subscriber before the oldest are dropped.
    pub event_capacity: usize,
    /// Delete expired documents when the replica opens.
    pub sweep_on_open: bool,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            event_capacity: 1024,
            sweep_on_open: true,
        }
    }
}

/// A local copy of one workspace.
///
/// Once closed, every operation fails with [`ReplicaError::Closed`].
pub struct Replica<S: StorageDriver> {
    driver: S,
    validator: Box<dyn FormatValidator>,
    clock: Box<dyn Clock>,
    /// Guards the read-decide-write section of ingest, and close.
    ingest_lock: Mutex<()>,
    closed: AtomicBool,
    events: broadcast::Sender<ReplicaEvent>,
}

impl<S: StorageDriver> Replica<S> {
    /// Open a replica over `driver` with the `tes.1` validator and the
    /// system clock.
    pub async fn open(driver: S, config: ReplicaConfig) -> Result<Self> {
        Self::open_with(driver, Ed25519Validator::new(), SystemClock, config).await
    }

    /// Open a replica with an explicit validator and clock.
    pub async fn open_with(
        driver: S,
        validator: impl FormatValidator + 'static,
        clock: impl Clock + 'static,
        config: ReplicaConfig,
    ) -> Result<Self> {
        if driver.is_closed() {
            return Err(ReplicaError::Closed);
        }

        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let replica = Self {
            driver,
            validator: Box::new(validator),
            clock: Box::new(clock),
            ingest_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
            events,
        };

        if config.sweep_on_open {
            replica.remove_expired_documents().await?;
        }

        info!(
            workspace = %replica.workspace(),
            format = replica.validator.format(),
            max_local_index = replica.driver.max_local_index()?,
            "opened replica"
        );
        Ok(replica)
    }

    /// The workspace this replica holds.
    pub fn workspace(&self) -> &WorkspaceId {
        self.driver.workspace()
    }

    /// Get the storage driver reference.
    pub fn driver(&self) -> &S {
        &self.driver
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(AtomicOrdering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(ReplicaError::Closed)
        } else {
            Ok(())
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Close the replica and its driver. With `erase`, stored documents and
    /// config are destroyed.
    ///
    /// Waits for an in-flight ingest to finish. Closing twice is an error.
    pub async fn close(&self, erase: bool) -> Result<()> {
        self.ensure_open()?;

        let guard = self.ingest_lock.lock().await;
        if self.closed.swap(true, AtomicOrdering::SeqCst) {
            return Err(ReplicaError::Closed);
        }
        self.notify(ReplicaEvent::WillClose);
        let closed = self.driver.close(erase).await;
        drop(guard);

        closed?;
        self.notify(ReplicaEvent::DidClose);
        info!(workspace = %self.workspace(), erase, "closed replica");
        Ok(())
    }

    /// Subscribe to events matching `filter`.
    pub fn subscribe(&self, filter: EventFilter) -> Result<Subscription> {
        self.ensure_open()?;
        Ok(Subscription::new(self.events.subscribe(), filter))
    }

    fn notify(&self, event: ReplicaEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Config
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn get_config(&self, key: &str) -> Result<Option<String>> {
        self.ensure_open()?;
        Ok(self.driver.get_config(key).await?)
    }

    pub async fn set_config(&self, key: &str, value: &str) -> Result<()> {
        self.ensure_open()?;
        Ok(self.driver.set_config(key, value).await?)
    }

    /// Returns whether the key existed.
    pub async fn delete_config(&self, key: &str) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.driver.delete_config(key).await?)
    }

    pub async fn list_config_keys(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        Ok(self.driver.list_config_keys().await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// Highest local index assigned so far, `-1` if none.
    pub fn max_local_index(&self) -> Result<LocalIndex> {
        self.ensure_open()?;
        Ok(self.driver.max_local_index()?)
    }

    /// Run `query` against the driver.
    ///
    /// Expiry is sweep-only: an expired document stays visible until
    /// [`remove_expired_documents`](Self::remove_expired_documents) runs (or
    /// the replica is reopened with `sweep_on_open`).
    pub async fn query_docs(&self, query: &Query) -> Result<Vec<Document>> {
        self.ensure_open()?;
        Ok(self.driver.query_docs(query).await?)
    }

    /// Documents written after `start_after`, oldest write first. The usual
    /// way to page through changes is to pass the last index seen.
    pub async fn get_docs_after_local_index(
        &self,
        history_mode: HistoryMode,
        start_after: LocalIndex,
        limit: Option<usize>,
    ) -> Result<Vec<Document>> {
        let mut query = Query {
            history_mode,
            ..Query::default()
        }
        .order_by(OrderBy::LocalIndexAsc)
        .start_after(StartAfter::LocalIndex(start_after));
        query.limit = limit;
        self.query_docs(&query).await
    }

    /// Every author's document at every path.
    pub async fn get_all_docs(&self) -> Result<Vec<Document>> {
        self.query_docs(&Query::all()).await
    }

    /// The winning document at every path.
    pub async fn get_latest_docs(&self) -> Result<Vec<Document>> {
        self.query_docs(&Query::latest()).await
    }

    /// Every author's document at `path`, newest first.
    pub async fn get_all_docs_at_path(&self, path: &str) -> Result<Vec<Document>> {
        self.query_docs(&Query::all().path(path)).await
    }

    pub async fn get_latest_doc_at_path(&self, path: &str) -> Result<Option<Document>> {
        let docs = self.query_docs(&Query::latest().path(path)).await?;
        Ok(docs.into_iter().next())
    }

    /// Distinct paths of the documents `query` selects, sorted. `limit`
    /// counts paths, not documents.
    pub async fn query_paths(&self, query: &Query) -> Result<Vec<String>> {
        self.query_distinct(query, |doc| doc.path).await
    }

    /// Distinct authors of the documents `query` selects, sorted. `limit`
    /// counts authors, not documents.
    pub async fn query_authors(&self, query: &Query) -> Result<Vec<Ed25519PublicKey>> {
        self.query_distinct(query, |doc| doc.author).await
    }

    async fn query_distinct<T: Ord>(
        &self,
        query: &Query,
        key: impl Fn(Document) -> T,
    ) -> Result<Vec<T>> {
        let unlimited = Query {
            limit: None,
            ..query.clone()
        };
        let docs = self.query_docs(&unlimited).await?;
        let distinct: BTreeSet<T> = docs.into_iter().map(key).collect();
        Ok(distinct
            .into_iter()
            .take(query.limit.unwrap_or(usize::MAX))
            .collect())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────────

    /// Sign and ingest a new document from `keypair`.
    ///
    /// Without an explicit timestamp the document is stamped so it wins at
    /// its path: `max(now, latest.timestamp + 1)`. A `delete_after` given
    /// alongside is moved forward by the same amount so the lifespan is
    /// kept.
    pub async fn set(&self, keypair: &Keypair, doc_to_set: DocToSet) -> Result<IngestOutcome> {
        self.ensure_open()?;
        let DocToSet {
            path,
            content,
            timestamp,
            delete_after,
        } = doc_to_set;

        let (timestamp, delete_after) = match timestamp {
            Some(timestamp) => (timestamp, delete_after),
            None => {
                let now = self.clock.now_micros();
                let timestamp = match self.get_latest_doc_at_path(&path).await? {
                    Some(prev) => now.max(prev.timestamp.saturating_add(1)),
                    None => now,
                };
                let bump = timestamp - now;
                (timestamp, delete_after.map(|t| t.saturating_add(bump)))
            }
        };
        debug!(path = %path, timestamp, ?delete_after, "set");

        let doc = Document::unsigned(
            self.validator.format(),
            self.workspace().clone(),
            keypair.public_key(),
            path,
            content,
            timestamp,
            delete_after,
        );
        match self.validator.sign(keypair, doc) {
            Ok(signed) => self.ingest(signed).await,
            Err(error) => self.failure(error),
        }
    }

    /// Ingest a signed document from any source.
    ///
    /// Subscribers are notified after the ingest lock is released, for
    /// every outcome.
    pub async fn ingest(&self, doc: Document) -> Result<IngestOutcome> {
        self.ensure_open()?;
        let path = doc.path.clone();

        let outcome = self.ingest_inner(doc).await?;
        debug!(
            path = %path,
            outcome = outcome.kind(),
            max_local_index = outcome.max_local_index(),
            "ingested"
        );

        self.notify(ReplicaEvent::Ingest {
            path,
            outcome: outcome.clone(),
        });
        Ok(outcome)
    }

    async fn ingest_inner(&self, doc: Document) -> Result<IngestOutcome> {
        let Stripped { doc, extras } = match self.validator.remove_extra_fields(doc) {
            Ok(stripped) => stripped,
            Err(error) => return self.failure(error),
        };
        if !extras.is_empty() {
            debug!(fields = ?extras.keys().collect::<Vec<_>>(), "stripped extra fields");
        }

        if &doc.workspace != self.workspace() {
            return self.failure(ValidationError::WorkspaceMismatch {
                expected: self.workspace().to_string(),
                got: doc.workspace.to_string(),
            });
        }
        if let Err(error) = self.validator.check_valid(&doc, self.clock.now_micros()) {
            return self.failure(error);
        }

        let _guard = self.ingest_lock.lock().await;
        // close may have won the lock first
        self.ensure_open()?;

        let existing = self
            .driver
            .query_docs(&Query::all().path(doc.path.as_str()))
            .await?;
        let prev_latest = latest(&existing).cloned();
        let prev_same_author = existing.iter().find(|d| d.author == doc.author).cloned();

        let doc_is_latest = prev_latest
            .as_ref()
            .map_or(true, |prev| cmp_newest_first(&doc, prev) == Ordering::Less);

        if !doc_is_latest {
            if let Some(prev) = &prev_same_author {
                let reason = match cmp_newest_first(&doc, prev) {
                    Ordering::Greater => Some(NothingHappenedReason::ObsoleteFromSameAuthor),
                    Ordering::Equal => Some(NothingHappenedReason::AlreadyHadIt),
                    Ordering::Less => None,
                };
                if let Some(reason) = reason {
                    return Ok(IngestOutcome::NothingHappened {
                        reason,
                        doc,
                        max_local_index: self.driver.max_local_index()?,
                    });
                }
            }
        }

        let written = self.driver.upsert(doc).await?;
        let max_local_index = self.driver.max_local_index()?;

        Ok(IngestOutcome::Success(IngestSuccess {
            doc: written,
            max_local_index,
            doc_is_latest,
            prev_doc_from_same_author: prev_same_author,
            prev_latest_doc: prev_latest,
        }))
    }

    fn failure(&self, error: ValidationError) -> Result<IngestOutcome> {
        debug!(%error, "rejected document");
        Ok(IngestOutcome::Failure {
            reason: FailureReason::InvalidDocument,
            error,
            max_local_index: self.driver.max_local_index()?,
        })
    }

    /// Replace every non-empty document by `keypair`'s author, history
    /// included, with an empty one one microsecond newer.
    ///
    /// Returns how many documents were overwritten. Not atomic: stops at the
    /// first document that cannot be overwritten and leaves earlier ones
    /// overwritten.
    pub async fn overwrite_all_docs_by_author(&self, keypair: &Keypair) -> Result<usize> {
        let author = keypair.public_key();
        let docs = self.query_docs(&Query::all().author(author)).await?;
        let total = docs.len();
        let mut overwritten = 0;

        for doc in docs {
            if doc.is_empty() {
                continue;
            }
            let path = doc.path.clone();
            let stop = |reason: String| {
                warn!(path = %path, %reason, "overwrite stopped");
                ReplicaError::Overwrite {
                    path: path.clone(),
                    reason,
                }
            };

            let Stripped { doc, .. } = self
                .validator
                .remove_extra_fields(doc)
                .map_err(|e| stop(e.to_string()))?;
            let empty = Document::unsigned(
                doc.format,
                doc.workspace,
                doc.author,
                doc.path,
                "",
                doc.timestamp.saturating_add(1),
                doc.delete_after,
            );
            let signed = self
                .validator
                .sign(keypair, empty)
                .map_err(|e| stop(e.to_string()))?;

            match self.ingest(signed).await? {
                IngestOutcome::Success(_) => overwritten += 1,
                IngestOutcome::NothingHappened { reason, .. } => {
                    return Err(stop(format!("nothing happened: {reason:?}")))
                }
                IngestOutcome::Failure { error, .. } => return Err(stop(error.to_string())),
            }
        }

        info!(
            author = %author,
            overwritten,
            already_empty = total - overwritten,
            "overwrote documents by author"
        );
        Ok(overwritten)
    }

    /// Delete documents whose `delete_after` has passed.
    pub async fn remove_expired_documents(&self) -> Result<usize> {
        self.ensure_open()?;
        let removed = self
            .driver
            .remove_expired_documents(self.clock.now_micros())
            .await?;
        if removed > 0 {
            info!(workspace = %self.workspace(), removed, "removed expired documents");
        }
        Ok(removed)
    }
}

//! Append-only log implementation of the StorageDriver trait.
//!
//! Every mutation is appended to a file as a length-prefixed CBOR record and
//! applied to an in-memory [`DocTable`]. Opening the file replays the log.
//! A record cut short by a crash is dropped and the file truncated to the
//! last complete record; a complete record that fails to decode is
//! [`StoreError::CorruptLog`]. An append that fails is cut back out of the
//! file before the table sees it.
//!
//! Record framing: `u32` big-endian body length, then the CBOR body.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use tessera_core::{
    Blake3Hash, Document, Ed25519PublicKey, Ed25519Signature, ExtraFields, LocalIndex, Query,
    Timestamp, WorkspaceId,
};

use crate::error::{Result, StoreError};
use crate::table::DocTable;
use crate::traits::{
    OpenMode, StorageDriver, CONFIG_SCHEMA_VERSION, CONFIG_WORKSPACE, SCHEMA_VERSION,
};

/// Largest record body accepted on replay.
const MAX_RECORD_LEN: u32 = 64 * 1024 * 1024;

/// A stored document as it appears in the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LogDoc {
    format: String,
    workspace: WorkspaceId,
    path: String,
    author: Ed25519PublicKey,
    content: String,
    content_hash: Blake3Hash,
    timestamp: Timestamp,
    delete_after: Option<Timestamp>,
    signature: Ed25519Signature,
    local_index: LocalIndex,
}

impl LogDoc {
    fn from_document(doc: &Document, local_index: LocalIndex) -> Self {
        Self {
            format: doc.format.clone(),
            workspace: doc.workspace.clone(),
            path: doc.path.clone(),
            author: doc.author,
            content: doc.content.clone(),
            content_hash: doc.content_hash,
            timestamp: doc.timestamp,
            delete_after: doc.delete_after,
            signature: doc.signature,
            local_index,
        }
    }

    fn into_document(self) -> Document {
        Document {
            format: self.format,
            workspace: self.workspace,
            path: self.path,
            author: self.author,
            content: self.content,
            content_hash: self.content_hash,
            timestamp: self.timestamp,
            delete_after: self.delete_after,
            signature: self.signature,
            local_index: Some(self.local_index),
            extra: ExtraFields::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum LogRecord {
    Upsert(LogDoc),
    RemoveExpired { now: Timestamp },
    SetConfig { key: String, value: String },
    DeleteConfig { key: String },
}

fn encode_record(record: &LogRecord) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    ciborium::into_writer(record, &mut body)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;

    let len = u32::try_from(body.len())
        .ok()
        .filter(|len| *len <= MAX_RECORD_LEN)
        .ok_or_else(|| StoreError::Serialization("log record too large".into()))?;

    let mut framed = Vec::with_capacity(4 + body.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(&body);
    Ok(framed)
}

/// Fill `buf` completely. `Ok(false)` means the input ended first.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Decode every complete record. Returns them with the byte length of the
/// complete prefix.
fn read_records(file: &File) -> Result<(Vec<LogRecord>, u64)> {
    let mut reader = BufReader::new(file);
    let mut records = Vec::new();
    let mut offset: u64 = 0;

    loop {
        let mut len_buf = [0u8; 4];
        if !read_full(&mut reader, &mut len_buf)? {
            break;
        }
        let len = u32::from_be_bytes(len_buf);
        if len > MAX_RECORD_LEN {
            return Err(StoreError::CorruptLog {
                offset,
                reason: format!("record length {len} exceeds limit"),
            });
        }

        let mut body = vec![0u8; len as usize];
        if !read_full(&mut reader, &mut body)? {
            break;
        }
        let record: LogRecord =
            ciborium::from_reader(&body[..]).map_err(|e| StoreError::CorruptLog {
                offset,
                reason: e.to_string(),
            })?;

        records.push(record);
        offset += 4 + u64::from(len);
    }

    Ok((records, offset))
}

fn apply(table: &mut DocTable, record: LogRecord) {
    match record {
        LogRecord::Upsert(doc) => table.insert_indexed(doc.into_document()),
        LogRecord::RemoveExpired { now } => {
            table.remove_expired(now);
        }
        LogRecord::SetConfig { key, value } => table.set_config(&key, &value),
        LogRecord::DeleteConfig { key } => {
            table.delete_config(&key);
        }
    }
}

/// The write side of the log.
struct LogFile {
    file: File,
    /// Set when a failed append could not be undone.
    broken: bool,
}

impl LogFile {
    fn new(file: File) -> Self {
        Self {
            file,
            broken: false,
        }
    }

    /// Persist a record. On failure the file is cut back to where the record
    /// began, so a record is either durable in full or absent.
    fn append(&mut self, record: &LogRecord) -> Result<()> {
        if self.broken {
            return Err(StoreError::LogUnusable);
        }
        let framed = encode_record(record)?;
        let start = self.file.stream_position()?;

        let written = self
            .file
            .write_all(&framed)
            .and_then(|()| self.file.sync_data());
        if let Err(err) = written {
            if let Err(rollback_err) = rollback(&mut self.file, start) {
                warn!(%err, %rollback_err, offset = start, "could not roll back failed log append");
                self.broken = true;
            }
            return Err(err.into());
        }
        Ok(())
    }
}

/// Cut the log back to `len` and put the write position there.
fn rollback(file: &mut File, len: u64) -> std::io::Result<()> {
    file.set_len(len)?;
    file.seek(SeekFrom::Start(len))?;
    file.sync_data()
}

/// Append `record` and apply it to a table that is not shared yet.
fn persist(log: &mut LogFile, table: &mut DocTable, record: LogRecord) -> Result<()> {
    log.append(&record)?;
    apply(table, record);
    Ok(())
}

/// State readers see. A record reaches it only once it is durable.
struct Shared {
    table: RwLock<DocTable>,
    max_local_index: AtomicI64,
}

impl Shared {
    fn read<T>(&self, f: impl FnOnce(&DocTable) -> T) -> Result<T> {
        let table = self
            .table
            .read()
            .map_err(|_| StoreError::poisoned("log table"))?;
        Ok(f(&table))
    }

    fn commit(&self, log: &mut LogFile, record: LogRecord) -> Result<()> {
        log.append(&record)?;
        let mut table = self
            .table
            .write()
            .map_err(|_| StoreError::poisoned("log table"))?;
        apply(&mut table, record);
        self.max_local_index
            .store(table.max_local_index(), Ordering::SeqCst);
        Ok(())
    }
}

/// Durable store backed by an append-only record log.
///
/// The whole table lives in memory; the log is only read on open. Appends are
/// serialized on the writer lock, and reads only touch the table, so a query
/// never waits for an fsync.
pub struct LogStore {
    workspace: WorkspaceId,
    path: PathBuf,
    /// `None` once closed.
    writer: Arc<Mutex<Option<LogFile>>>,
    shared: Arc<Shared>,
    closed: AtomicBool,
}

impl LogStore {
    /// Open the log at `path`, replaying it, bound to `workspace`.
    pub fn open(path: impl AsRef<Path>, workspace: WorkspaceId, mode: OpenMode) -> Result<Self> {
        let path = path.as_ref();
        let exists = path.exists();
        match (mode, exists) {
            (OpenMode::Create, true) => return Err(StoreError::AlreadyExists(path.to_path_buf())),
            (OpenMode::Open, false) => return Err(StoreError::NotFound(path.to_path_buf())),
            _ => {}
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let (records, valid_len) = read_records(&file)?;
        let file_len = file.metadata()?.len();
        if valid_len < file_len {
            warn!(
                path = %path.display(),
                dropped_bytes = file_len - valid_len,
                "truncating incomplete trailing log record"
            );
            file.set_len(valid_len)?;
        }
        // Appends go after the last complete record.
        file.seek(SeekFrom::End(0))?;

        let replayed = records.len();
        let mut table = DocTable::empty();
        for record in records {
            apply(&mut table, record);
        }

        let mut log = LogFile::new(file);
        bind_workspace(&mut log, &mut table, &workspace)?;
        let max_local_index = table.max_local_index();

        info!(
            workspace = %workspace,
            path = %path.display(),
            replayed,
            max_local_index,
            "opened log store"
        );

        Ok(Self {
            workspace,
            path: path.to_path_buf(),
            writer: Arc::new(Mutex::new(Some(log))),
            shared: Arc::new(Shared {
                table: RwLock::new(table),
                max_local_index: AtomicI64::new(max_local_index),
            }),
            closed: AtomicBool::new(false),
        })
    }

    /// Run a write against the log on the blocking pool.
    async fn with_writer<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut LogFile, &Shared) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        let writer = Arc::clone(&self.writer);
        let shared = Arc::clone(&self.shared);

        tokio::task::spawn_blocking(move || {
            let mut guard = writer
                .lock()
                .map_err(|_| StoreError::poisoned("log writer"))?;
            let log = guard.as_mut().ok_or(StoreError::Closed)?;
            f(log, &*shared)
        })
        .await
        .map_err(StoreError::join)?
    }

    /// Read the in-memory table without touching the file.
    fn read<T>(&self, f: impl FnOnce(&DocTable) -> T) -> Result<T> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        self.shared.read(f)
    }
}

/// Check or stamp the schema version and workspace config keys.
fn bind_workspace(log: &mut LogFile, table: &mut DocTable, workspace: &WorkspaceId) -> Result<()> {
    match table.get_config(CONFIG_SCHEMA_VERSION) {
        Some(version) if version != SCHEMA_VERSION => {
            return Err(StoreError::UnsupportedSchema(version))
        }
        Some(_) => {}
        None => persist(
            log,
            table,
            LogRecord::SetConfig {
                key: CONFIG_SCHEMA_VERSION.into(),
                value: SCHEMA_VERSION.into(),
            },
        )?,
    }

    match table.get_config(CONFIG_WORKSPACE) {
        Some(found) if found != workspace.as_str() => Err(StoreError::WorkspaceMismatch {
            expected: workspace.clone(),
            found,
        }),
        Some(_) => Ok(()),
        None => persist(
            log,
            table,
            LogRecord::SetConfig {
                key: CONFIG_WORKSPACE.into(),
                value: workspace.as_str().into(),
            },
        ),
    }
}

#[async_trait]
impl StorageDriver for LogStore {
    fn workspace(&self) -> &WorkspaceId {
        &self.workspace
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn max_local_index(&self) -> Result<LocalIndex> {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        Ok(self.shared.max_local_index.load(Ordering::SeqCst))
    }

    async fn upsert(&self, doc: Document) -> Result<Document> {
        self.with_writer(move |log, shared| {
            // Writers are serialized, so nobody else can take this index.
            let index = shared.read(DocTable::next_local_index)?;
            shared.commit(log, LogRecord::Upsert(LogDoc::from_document(&doc, index)))?;

            let mut doc = doc;
            doc.local_index = Some(index);
            Ok(doc)
        })
        .await
    }

    async fn query_docs(&self, query: &Query) -> Result<Vec<Document>> {
        Ok(self.read(|table| table.query(query))??)
    }

    async fn remove_expired_documents(&self, now: Timestamp) -> Result<usize> {
        let removed = self
            .with_writer(move |log, shared| {
                // Only log sweeps that change something.
                let removed = shared.read(|table| table.count_expired(now))?;
                if removed > 0 {
                    shared.commit(log, LogRecord::RemoveExpired { now })?;
                }
                Ok(removed)
            })
            .await?;

        if removed > 0 {
            debug!(removed, now, "removed expired documents");
        }
        Ok(removed)
    }

    async fn get_config(&self, key: &str) -> Result<Option<String>> {
        self.read(|table| table.get_config(key))
    }

    async fn set_config(&self, key: &str, value: &str) -> Result<()> {
        let record = LogRecord::SetConfig {
            key: key.to_string(),
            value: value.to_string(),
        };
        self.with_writer(move |log, shared| shared.commit(log, record))
            .await
    }

    async fn delete_config(&self, key: &str) -> Result<bool> {
        let key = key.to_string();
        self.with_writer(move |log, shared| {
            if shared.read(|table| table.get_config(&key).is_none())? {
                return Ok(false);
            }
            shared.commit(log, LogRecord::DeleteConfig { key })?;
            Ok(true)
        })
        .await
    }

    async fn list_config_keys(&self) -> Result<Vec<String>> {
        self.read(DocTable::config_keys)
    }

    async fn close(&self, erase: bool) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        let writer = Arc::clone(&self.writer);
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let taken = writer
                .lock()
                .map_err(|_| StoreError::poisoned("log writer"))?
                .take();
            if let Some(log) = taken {
                log.file.sync_all()?;
            }
            if erase {
                std::fs::remove_file(&path)?;
            }
            Ok(())
        })
        .await
        .map_err(StoreError::join)??;

        info!(workspace = %self.workspace, erase, "closed log store");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::{Keypair, OrderBy};

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
    async fn test_replay_restores_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replica.log");
        let kp = Keypair::from_seed(&[1; 32]);

        let before = {
            let store = LogStore::open(&path, workspace(), OpenMode::Create).unwrap();
            store.upsert(doc(&kp, "/a", 10)).await.unwrap();
            store.upsert(doc(&kp, "/b", 10)).await.unwrap();
            store.upsert(doc(&kp, "/a", 20)).await.unwrap();
            store.set_config("peer", "alpha").await.unwrap();
            store.delete_config("peer").await.unwrap();
            store.set_config("color", "blue").await.unwrap();
            let docs = store.query_docs(&Query::all()).await.unwrap();
            store.close(false).await.unwrap();
            docs
        };

        let store = LogStore::open(&path, workspace(), OpenMode::Open).unwrap();
        assert_eq!(store.query_docs(&Query::all()).await.unwrap(), before);
        assert_eq!(store.max_local_index().unwrap(), 2);
        assert_eq!(store.get_config("peer").await.unwrap(), None);
        assert_eq!(
            store.get_config("color").await.unwrap().as_deref(),
            Some("blue")
        );
    }

    #[tokio::test]
    async fn test_torn_tail_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replica.log");
        let kp = Keypair::from_seed(&[1; 32]);

        {
            let store = LogStore::open(&path, workspace(), OpenMode::Create).unwrap();
            store.upsert(doc(&kp, "/a", 10)).await.unwrap();
            store.close(false).await.unwrap();
        }
        let good_len = std::fs::metadata(&path).unwrap().len();

        // A length prefix promising more bytes than follow.
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&100u32.to_be_bytes()).unwrap();
        file.write_all(&[0xa1, 0x00]).unwrap();
        drop(file);

        let store = LogStore::open(&path, workspace(), OpenMode::Open).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), good_len);
        assert_eq!(store.query_docs(&Query::all()).await.unwrap().len(), 1);

        let next = store.upsert(doc(&kp, "/b", 10)).await.unwrap();
        assert_eq!(next.local_index, Some(1));
    }

    #[tokio::test]
    async fn test_corrupt_record_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replica.log");

        let mut file = File::create(&path).unwrap();
        file.write_all(&3u32.to_be_bytes()).unwrap();
        file.write_all(&[0xff, 0xff, 0xff]).unwrap();
        drop(file);

        assert!(matches!(
            LogStore::open(&path, workspace(), OpenMode::Open),
            Err(StoreError::CorruptLog { offset: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_sweep_is_replayed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replica.log");
        let kp = Keypair::from_seed(&[1; 32]);

        {
            let store = LogStore::open(&path, workspace(), OpenMode::Create).unwrap();
            let mut ephemeral = doc(&kp, "/tmp!", 10);
            ephemeral.delete_after = Some(50);
            store.upsert(ephemeral).await.unwrap();
            store.upsert(doc(&kp, "/keep", 10)).await.unwrap();
            assert_eq!(store.remove_expired_documents(50).await.unwrap(), 1);
            assert_eq!(store.remove_expired_documents(50).await.unwrap(), 0);
            store.close(false).await.unwrap();
        }

        let store = LogStore::open(&path, workspace(), OpenMode::Open).unwrap();
        let docs = store
            .query_docs(&Query::all().order_by(OrderBy::LocalIndexAsc))
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].path, "/keep");
        assert_eq!(store.max_local_index().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_workspace_mismatch_and_erase() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replica.log");

        let store = LogStore::open(&path, workspace(), OpenMode::Create).unwrap();
        store.close(false).await.unwrap();

        let other = WorkspaceId::parse("+other.xyz").unwrap();
        assert!(matches!(
            LogStore::open(&path, other, OpenMode::CreateOrOpen),
            Err(StoreError::WorkspaceMismatch { .. })
        ));

        let store = LogStore::open(&path, workspace(), OpenMode::Open).unwrap();
        store.close(true).await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_failed_append_leaves_no_trace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replica.log");
        let kp = Keypair::from_seed(&[1; 32]);

        let store = LogStore::open(&path, workspace(), OpenMode::Create).unwrap();
        store.upsert(doc(&kp, "/a", 10)).await.unwrap();
        let len = std::fs::metadata(&path).unwrap().len();

        // A handle that cannot be written or truncated.
        let mut read_only = File::open(&path).unwrap();
        read_only.seek(SeekFrom::End(0)).unwrap();
        *store.writer.lock().unwrap() = Some(LogFile::new(read_only));

        assert!(matches!(
            store.upsert(doc(&kp, "/b", 10)).await,
            Err(StoreError::Io(_))
        ));
        assert_eq!(store.max_local_index().unwrap(), 0);
        assert_eq!(store.query_docs(&Query::all()).await.unwrap().len(), 1);

        // The rollback failed too, so the log refuses further writes.
        assert!(matches!(
            store.upsert(doc(&kp, "/c", 10)).await,
            Err(StoreError::LogUnusable)
        ));
        assert!(matches!(
            store.set_config("k", "v").await,
            Err(StoreError::LogUnusable)
        ));
        store.close(false).await.unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), len);

        let store = LogStore::open(&path, workspace(), OpenMode::Open).unwrap();
        assert_eq!(store.max_local_index().unwrap(), 0);
        let next = store.upsert(doc(&kp, "/b", 10)).await.unwrap();
        assert_eq!(next.local_index, Some(1));
    }

    #[test]
    fn test_rollback_cuts_partial_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replica.log");
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .unwrap();

        let record = encode_record(&LogRecord::DeleteConfig { key: "k".into() }).unwrap();
        file.write_all(&record).unwrap();
        let start = file.stream_position().unwrap();
        file.write_all(&record[..3]).unwrap();

        rollback(&mut file, start).unwrap();
        assert_eq!(file.metadata().unwrap().len(), start);
        assert_eq!(file.stream_position().unwrap(), start);

        let (records, valid_len) = read_records(&File::open(&path).unwrap()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(valid_len, start);
    }

    #[tokio::test]
    async fn test_reads_do_not_wait_for_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replica.log");
        let kp = Keypair::from_seed(&[1; 32]);

        let store = LogStore::open(&path, workspace(), OpenMode::Create).unwrap();
        store.upsert(doc(&kp, "/a", 10)).await.unwrap();

        // Stands in for an append stuck in fsync.
        let _writing = store.writer.lock().unwrap();
        assert_eq!(store.max_local_index().unwrap(), 0);
        assert_eq!(store.query_docs(&Query::all()).await.unwrap().len(), 1);
        assert!(store.get_config("workspace").await.unwrap().is_some());
    }
}

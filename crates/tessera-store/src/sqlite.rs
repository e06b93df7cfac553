//! SQLite implementation of the StorageDriver trait.
//!
//! The primary durable backend. It uses rusqlite with bundled SQLite,
//! wrapped in async via tokio::spawn_blocking. Queries are translated to SQL;
//! "latest at a path" is a window function over the same order the
//! in-process evaluator uses.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use tessera_core::{
    Blake3Hash, Document, Ed25519PublicKey, Ed25519Signature, ExtraFields, HistoryMode,
    LocalIndex, OrderBy, Query, StartAfter, Timestamp, WorkspaceId,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{
    OpenMode, StorageDriver, CONFIG_SCHEMA_VERSION, CONFIG_WORKSPACE, SCHEMA_VERSION,
};

const DOC_COLUMNS: &str = "path, author, format, workspace, content, content_hash, \
                           timestamp, delete_after, signature, local_index";

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All I/O uses spawn_blocking to avoid
/// blocking the async runtime. The connection slot is emptied on close.
pub struct SqliteStore {
    workspace: WorkspaceId,
    /// Backing file; `None` for an in-memory database.
    path: Option<PathBuf>,
    conn: Arc<Mutex<Option<Connection>>>,
    closed: AtomicBool,
    /// Mirror of the `counters` row, so `max_local_index` needs no I/O.
    max_local_index: AtomicI64,
}

impl SqliteStore {
    /// Open a SQLite database at the given path, bound to `workspace`.
    pub fn open(path: impl AsRef<Path>, workspace: WorkspaceId, mode: OpenMode) -> Result<Self> {
        let path = path.as_ref();
        match (mode, path.exists()) {
            (OpenMode::Create, true) => return Err(StoreError::AlreadyExists(path.to_path_buf())),
            (OpenMode::Open, false) => return Err(StoreError::NotFound(path.to_path_buf())),
            _ => {}
        }

        let conn = Connection::open(path)?;
        Self::init(conn, workspace, Some(path.to_path_buf()))
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory(workspace: WorkspaceId) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, workspace, None)
    }

    fn init(mut conn: Connection, workspace: WorkspaceId, path: Option<PathBuf>) -> Result<Self> {
        migration::migrate(&mut conn)?;
        bind_workspace(&conn, &workspace)?;

        let max_local_index: LocalIndex = conn.query_row(
            "SELECT value FROM counters WHERE name = 'local_index'",
            [],
            |row| row.get(0),
        )?;

        info!(
            workspace = %workspace,
            path = ?path,
            max_local_index,
            "opened sqlite store"
        );

        Ok(Self {
            workspace,
            path,
            conn: Arc::new(Mutex::new(Some(conn))),
            closed: AtomicBool::new(false),
            max_local_index: AtomicI64::new(max_local_index),
        })
    }

    /// Execute a blocking operation on the connection.
    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_closed() {
            return Err(StoreError::Closed);
        }
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::poisoned("sqlite connection"))?;
            let conn = guard.as_mut().ok_or(StoreError::Closed)?;
            f(conn)
        })
        .await
        .map_err(StoreError::join)?
    }
}

/// Check or stamp the schema version and workspace config keys.
fn bind_workspace(conn: &Connection, workspace: &WorkspaceId) -> Result<()> {
    match read_config(conn, CONFIG_SCHEMA_VERSION)? {
        Some(version) if version != SCHEMA_VERSION => {
            return Err(StoreError::UnsupportedSchema(version))
        }
        Some(_) => {}
        None => write_config(conn, CONFIG_SCHEMA_VERSION, SCHEMA_VERSION)?,
    }

    match read_config(conn, CONFIG_WORKSPACE)? {
        Some(found) if found != workspace.as_str() => Err(StoreError::WorkspaceMismatch {
            expected: workspace.clone(),
            found,
        }),
        Some(_) => Ok(()),
        None => write_config(conn, CONFIG_WORKSPACE, workspace.as_str()),
    }
}

fn read_config(conn: &Connection, key: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row("SELECT value FROM config WHERE key = ?1", [key], |row| {
            row.get(0)
        })
        .optional()?)
}

fn write_config(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO config (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        [key, value],
    )?;
    Ok(())
}

/// Delete the database file and its SQLite side files.
fn remove_db_files(path: &Path) -> Result<()> {
    let mut files = vec![path.to_path_buf()];
    for suffix in ["-wal", "-shm", "-journal"] {
        let mut name = path.as_os_str().to_owned();
        name.push(suffix);
        files.push(PathBuf::from(name));
    }

    for file in files {
        match std::fs::remove_file(&file) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn fixed_bytes<const N: usize>(row: &Row<'_>, column: &str) -> rusqlite::Result<[u8; N]> {
    let bytes: Vec<u8> = row.get(column)?;
    bytes
        .try_into()
        .map_err(|_| rusqlite::Error::InvalidColumnType(0, column.into(), Type::Blob))
}

// Helper to convert a row to Document
fn row_to_document(row: &Row<'_>) -> rusqlite::Result<Document> {
    let workspace: String = row.get("workspace")?;
    let workspace = WorkspaceId::parse(&workspace)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;

    Ok(Document {
        format: row.get("format")?,
        workspace,
        path: row.get("path")?,
        author: Ed25519PublicKey(fixed_bytes(row, "author")?),
        content: row.get("content")?,
        content_hash: Blake3Hash(fixed_bytes(row, "content_hash")?),
        timestamp: row.get("timestamp")?,
        delete_after: row.get("delete_after")?,
        signature: Ed25519Signature(fixed_bytes(row, "signature")?),
        local_index: Some(row.get("local_index")?),
        extra: ExtraFields::new(),
    })
}

/// Translate a query into SQL with anonymous `?` parameters, in order.
///
/// Callers must have run [`Query::validate`] first.
fn build_select(query: &Query) -> (String, Vec<Value>) {
    let mut sql = format!("SELECT {DOC_COLUMNS} FROM ");
    let mut clauses: Vec<&'static str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    match query.history_mode {
        HistoryMode::All => sql.push_str("docs"),
        HistoryMode::Latest => {
            sql.push_str(
                "(SELECT *, ROW_NUMBER() OVER (
                    PARTITION BY path ORDER BY timestamp DESC, signature ASC
                 ) AS path_rank FROM docs)",
            );
            clauses.push("path_rank = 1");
        }
    }

    let filter = &query.filter;
    if let Some(path) = &filter.path {
        clauses.push("path = ?");
        values.push(Value::Text(path.clone()));
    }
    if let Some(prefix) = filter.path_starts_with.as_ref().filter(|p| !p.is_empty()) {
        clauses.push("substr(path, 1, ?) = ?");
        values.push(Value::Integer(prefix.chars().count() as i64));
        values.push(Value::Text(prefix.clone()));
    }
    if let Some(suffix) = filter.path_ends_with.as_ref().filter(|s| !s.is_empty()) {
        clauses.push("substr(path, -?) = ?");
        values.push(Value::Integer(suffix.chars().count() as i64));
        values.push(Value::Text(suffix.clone()));
    }
    if let Some(author) = &filter.author {
        clauses.push("author = ?");
        values.push(Value::Blob(author.as_bytes().to_vec()));
    }
    for (clause, bound) in [
        ("timestamp = ?", filter.timestamp),
        ("timestamp > ?", filter.timestamp_gt),
        ("timestamp < ?", filter.timestamp_lt),
    ] {
        if let Some(t) = bound {
            clauses.push(clause);
            values.push(Value::Integer(t));
        }
    }
    for (clause, bound) in [
        ("content_length = ?", filter.content_length),
        ("content_length > ?", filter.content_length_gt),
        ("content_length < ?", filter.content_length_lt),
    ] {
        if let Some(n) = bound {
            clauses.push(clause);
            values.push(Value::Integer(i64::try_from(n).unwrap_or(i64::MAX)));
        }
    }

    match (&query.start_after, query.order_by) {
        (Some(StartAfter::Path(p)), OrderBy::PathAsc) => {
            clauses.push("path > ?");
            values.push(Value::Text(p.clone()));
        }
        (Some(StartAfter::Path(p)), OrderBy::PathDesc) => {
            clauses.push("path < ?");
            values.push(Value::Text(p.clone()));
        }
        (Some(StartAfter::LocalIndex(i)), OrderBy::LocalIndexAsc) => {
            clauses.push("local_index > ?");
            values.push(Value::Integer(*i));
        }
        (Some(StartAfter::LocalIndex(i)), OrderBy::LocalIndexDesc) => {
            clauses.push("local_index < ?");
            values.push(Value::Integer(*i));
        }
        _ => {}
    }

    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }

    sql.push_str(match query.order_by {
        OrderBy::PathAsc => " ORDER BY path ASC, timestamp DESC, signature ASC",
        OrderBy::PathDesc => " ORDER BY path DESC, timestamp DESC, signature ASC",
        OrderBy::LocalIndexAsc => " ORDER BY local_index ASC",
        OrderBy::LocalIndexDesc => " ORDER BY local_index DESC",
    });

    if let Some(limit) = query.limit {
        sql.push_str(" LIMIT ?");
        values.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
    }

    (sql, values)
}

#[async_trait]
impl StorageDriver for SqliteStore {
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
        Ok(self.max_local_index.load(Ordering::SeqCst))
    }

    async fn upsert(&self, doc: Document) -> Result<Document> {
        let stored = self
            .with_conn(move |conn| {
                let tx = conn.transaction()?;

                let index: LocalIndex = tx.query_row(
                    "SELECT value + 1 FROM counters WHERE name = 'local_index'",
                    [],
                    |row| row.get(0),
                )?;
                tx.execute(
                    "UPDATE counters SET value = ?1 WHERE name = 'local_index'",
                    [index],
                )?;

                // Replaces any row at (path, author).
                tx.execute(
                    "INSERT OR REPLACE INTO docs (
                        path, author, format, workspace, content, content_hash,
                        content_length, timestamp, delete_after, signature, local_index
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![
                        doc.path,
                        doc.author.as_bytes().as_slice(),
                        doc.format,
                        doc.workspace.as_str(),
                        doc.content,
                        doc.content_hash.as_bytes().as_slice(),
                        doc.content_length() as i64,
                        doc.timestamp,
                        doc.delete_after,
                        doc.signature.as_bytes().as_slice(),
                        index,
                    ],
                )?;
                tx.commit()?;

                let mut doc = doc;
                doc.local_index = Some(index);
                Ok(doc)
            })
            .await?;

        if let Some(index) = stored.local_index {
            self.max_local_index.fetch_max(index, Ordering::SeqCst);
        }
        Ok(stored)
    }

    async fn query_docs(&self, query: &Query) -> Result<Vec<Document>> {
        query.validate()?;
        if query.limit == Some(0) {
            return Ok(Vec::new());
        }

        let (sql, values) = build_select(query);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let docs = stmt
                .query_map(params_from_iter(values.iter()), row_to_document)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(docs)
        })
        .await
    }

    async fn remove_expired_documents(&self, now: Timestamp) -> Result<usize> {
        let removed = self
            .with_conn(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM docs WHERE delete_after IS NOT NULL AND delete_after <= ?1",
                    [now],
                )?)
            })
            .await?;

        if removed > 0 {
            debug!(removed, now, "removed expired documents");
        }
        Ok(removed)
    }

    async fn get_config(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.with_conn(move |conn| read_config(conn, &key)).await
    }

    async fn set_config(&self, key: &str, value: &str) -> Result<()> {
        let (key, value) = (key.to_string(), value.to_string());
        self.with_conn(move |conn| write_config(conn, &key, &value))
            .await
    }

    async fn delete_config(&self, key: &str) -> Result<bool> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            Ok(conn.execute("DELETE FROM config WHERE key = ?1", [key])? > 0)
        })
        .await
    }

    async fn list_config_keys(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT key FROM config ORDER BY key")?;
            let keys = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(keys)
        })
        .await
    }

    async fn close(&self, erase: bool) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        let conn = Arc::clone(&self.conn);
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || {
            let taken = conn
                .lock()
                .map_err(|_| StoreError::poisoned("sqlite connection"))?
                .take();
            if let Some(conn) = taken {
                conn.close().map_err(|(_, e)| StoreError::Database(e))?;
            }
            match (erase, path) {
                (true, Some(path)) => remove_db_files(&path),
                _ => Ok(()),
            }
        })
        .await
        .map_err(StoreError::join)??;

        info!(workspace = %self.workspace, erase, "closed sqlite store");
        Ok(())
    }
}

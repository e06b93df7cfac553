//! Database schema migrations for SQLite.
//!
//! We use a simple versioned migration system. Each migration is a SQL string
//! that transforms the schema from version N to N+1.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// Idempotent. Fails with `UnsupportedSchema` if the database was written by
/// a newer version.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current > CURRENT_VERSION {
        return Err(StoreError::UnsupportedSchema(current.to_string()));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at)
                 VALUES (?1, CAST(strftime('%s', 'now') AS INTEGER) * 1000)",
                [version],
            )?;
        }

        tx.commit()?;
    }

    Ok(())
}

/// Apply a specific migration version.
fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- One current document per (path, author)
        CREATE TABLE docs (
            path TEXT NOT NULL,
            author BLOB NOT NULL,             -- 32 bytes, Ed25519 public key
            format TEXT NOT NULL,
            workspace TEXT NOT NULL,
            content TEXT NOT NULL,
            content_hash BLOB NOT NULL,       -- 32 bytes, Blake3
            content_length INTEGER NOT NULL,  -- bytes, not characters
            timestamp INTEGER NOT NULL,       -- microseconds
            delete_after INTEGER,             -- microseconds, NULL if permanent
            signature BLOB NOT NULL,          -- 64 bytes, Ed25519
            local_index INTEGER NOT NULL UNIQUE,

            PRIMARY KEY (path, author)
        );

        -- String key/value config
        CREATE TABLE config (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        -- Local index high-water mark; survives deletion of the newest row
        CREATE TABLE counters (
            name TEXT PRIMARY KEY,
            value INTEGER NOT NULL
        );
        INSERT INTO counters (name, value) VALUES ('local_index', -1);

        CREATE INDEX idx_docs_path_newest ON docs(path, timestamp DESC, signature ASC);
        CREATE INDEX idx_docs_author ON docs(author);
        CREATE INDEX idx_docs_delete_after ON docs(delete_after) WHERE delete_after IS NOT NULL;
        "#,
    )?;

    Ok(())
}

//! # Tessera Store
//!
//! Storage drivers for Tessera replicas. A replica talks to its storage
//! only through the [`StorageDriver`] trait, so drivers are interchangeable.
//!
//! ## Key Types
//!
//! - [`StorageDriver`] - The async trait for all storage operations
//! - [`MemoryStore`] - In-memory reference driver
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`LogStore`] - Append-only record log, replayed on open
//! - [`OpenMode`] - Create / open / create-or-open for durable drivers
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tessera_core::{Query, WorkspaceId};
//! use tessera_store::{OpenMode, SqliteStore, StorageDriver};
//!
//! async fn example() {
//!     let workspace = WorkspaceId::parse("+gardening.a1b2c3").unwrap();
//!
//!     // Open a SQLite database
//!     let store = SqliteStore::open("replica.db", workspace.clone(), OpenMode::CreateOrOpen)
//!         .unwrap();
//!
//!     // Or use an in-memory database for testing
//!     let store = SqliteStore::open_memory(workspace).unwrap();
//!
//!     let latest = store.query_docs(&Query::latest()).await.unwrap();
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Upsert by (path, author)**: a write replaces that author's document
//!   at that path
//! - **Fresh local index on every write**: never reused, even after the row
//!   it was assigned to is deleted
//! - **Same answers everywhere**: every driver returns the same documents in
//!   the same order for a query

pub mod error;
pub mod log;
pub mod memory;
pub mod migration;
pub mod sqlite;
mod table;
pub mod traits;

pub use error::{Result, StoreError};
pub use log::LogStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{
    OpenMode, StorageDriver, CONFIG_SCHEMA_VERSION, CONFIG_WORKSPACE, SCHEMA_VERSION,
};

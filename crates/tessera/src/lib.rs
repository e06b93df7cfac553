//! # Tessera
//!
//! Offline-first, peer-replicated document storage. A [`Replica`] holds one
//! workspace: signed documents at paths, one per (path, author), with the
//! newest timestamp winning at each path.
//!
//! ## Overview
//!
//! - **Ingest**: every write, local or from a peer, goes through
//!   [`Replica::ingest`], which reports an [`IngestOutcome`]
//! - **Set**: [`Replica::set`] signs new content and picks a timestamp that
//!   wins at its path
//! - **Queries**: history mode, filter, ordering, paging; the same answers
//!   from every storage driver
//! - **Events**: [`Replica::subscribe`] streams ingest and lifecycle events
//!
//! ## Key Concepts
//!
//! - **Latest**: the winner at a path is the newest timestamp, ties broken
//!   by the lowest signature
//! - **Local index**: a per-replica write counter for change feeds
//! - **Ephemeral documents**: carry `delete_after` and are swept once expired
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tessera::{Replica, ReplicaConfig};
//! use tessera::core::{DocToSet, Keypair, WorkspaceId};
//! use tessera::store::{OpenMode, SqliteStore};
//!
//! async fn example() {
//!     let keypair = Keypair::generate();
//!     let workspace = WorkspaceId::parse("+gardening.a1b2c3").unwrap();
//!
//!     // Open storage
//!     let store = SqliteStore::open("replica.db", workspace, OpenMode::CreateOrOpen).unwrap();
//!
//!     // Open the replica
//!     let replica = Replica::open(store, ReplicaConfig::default()).await.unwrap();
//!
//!     // Write a document
//!     let outcome = replica
//!         .set(&keypair, DocToSet::new("/notes/today.txt", "water the ferns"))
//!         .await
//!         .unwrap();
//!     assert!(outcome.is_success());
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `tessera::core` - Documents, queries, validation
//! - `tessera::store` - Storage drivers

pub mod error;
pub mod events;
pub mod outcome;
pub mod replica;

// Re-export component crates
pub use tessera_core as core;
pub use tessera_store as store;

// Re-export main types for convenience
pub use error::{ReplicaError, Result};
pub use events::{EventFilter, ReplicaEvent, Subscription};
pub use outcome::{FailureReason, IngestOutcome, IngestSuccess, NothingHappenedReason};
pub use replica::{Replica, ReplicaConfig};

// Re-export commonly used core types
pub use tessera_core::{
    DocToSet, Document, Ed25519PublicKey, HistoryMode, Keypair, OrderBy, Query, StartAfter,
    WorkspaceId,
};

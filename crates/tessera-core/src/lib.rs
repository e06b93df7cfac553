//! # Tessera Core
//!
//! Pure primitives for Tessera replicas: signed documents, their total
//! order, queries and format validation.
//!
//! This crate contains no I/O and no storage. Drivers and the replica build
//! on it.
//!
//! ## Key Types
//!
//! - [`Document`] - A signed, content-hashed entry at a path
//! - [`WorkspaceId`] - The workspace a replica holds
//! - [`Query`] - Declarative selection over stored documents
//! - [`FormatValidator`] - Validation and signing for one document format
//!
//! ## Ordering
//!
//! "Newest first" is timestamp descending, then signature ascending. See
//! [`compare`].

pub mod canonical;
pub mod clock;
pub mod compare;
pub mod crypto;
pub mod document;
pub mod error;
pub mod query;
pub mod types;
pub mod validator;

pub use canonical::{canonical_signing_bytes, signed_message, SIGN_DOMAIN};
pub use clock::{Clock, SystemClock};
pub use compare::{cmp_newest_first, latest, sort_newest_first};
pub use crypto::{digest, Blake3Hash, Ed25519PublicKey, Ed25519Signature, Keypair};
pub use document::{DocToSet, Document, ExtraFields};
pub use error::{CoreError, ValidationError};
pub use query::{run_query, Filter, HistoryMode, OrderBy, Query, QueryError, StartAfter};
pub use types::{LocalIndex, Timestamp, WorkspaceId, NO_LOCAL_INDEX};
pub use validator::{Ed25519Validator, FormatValidator, Stripped, FORMAT_TES1};

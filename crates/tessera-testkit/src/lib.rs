//! # Tessera Testkit
//!
//! Testing utilities for Tessera.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: signed documents from deterministic authors, and a
//!   [`ManualClock`] for tests that need time to stand still
//! - **Generators**: Proptest strategies for documents and queries
//! - **Driver contract**: `tests/driver_contract.rs` runs the same
//!   properties against every storage driver
//!
//! ## Property Testing
//!
//! Use the generators with proptest:
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use tessera_testkit::generators::{doc_from_params, DocParams};
//!
//! proptest! {
//!     #[test]
//!     fn signing_is_deterministic(params: DocParams) {
//!         prop_assert_eq!(doc_from_params(&params), doc_from_params(&params));
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust
//! use tessera_testkit::fixtures::{TestFixture, T0};
//!
//! let fixture = TestFixture::new();
//! let doc = fixture.make_doc("/notes/a.txt", "hello", T0);
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{multi_party_fixtures, test_workspace, ManualClock, TestFixture, T0};
pub use generators::{doc_from_params, DocParams};

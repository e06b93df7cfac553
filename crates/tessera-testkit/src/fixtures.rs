//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tessera_core::{
    Clock, Document, Ed25519PublicKey, Ed25519Validator, FormatValidator, Keypair, Timestamp,
    WorkspaceId, FORMAT_TES1,
};

/// Workspace used by fixtures.
pub const TEST_WORKSPACE: &str = "+test.a1b2c3";

/// A fixed "now" for tests, in microseconds (2023-11-14).
pub const T0: Timestamp = 1_700_000_000_000_000;

pub fn test_workspace() -> WorkspaceId {
    WorkspaceId::parse(TEST_WORKSPACE).expect("fixture workspace is valid")
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(now: Timestamp) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(now)),
        }
    }

    pub fn set(&self, now: Timestamp) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, micros: Timestamp) {
        self.now.fetch_add(micros, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(T0)
    }
}

impl Clock for ManualClock {
    fn now_micros(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

/// A test author writing into the test workspace.
pub struct TestFixture {
    pub keypair: Keypair,
    pub workspace: WorkspaceId,
}

impl TestFixture {
    /// Create a new test fixture with a random keypair.
    pub fn new() -> Self {
        Self {
            keypair: Keypair::generate(),
            workspace: test_workspace(),
        }
    }

    /// Create with a deterministic keypair from seed.
    pub fn with_seed(seed: [u8; 32]) -> Self {
        Self {
            keypair: Keypair::from_seed(&seed),
            workspace: test_workspace(),
        }
    }

    /// Get the keypair's public key.
    pub fn public_key(&self) -> Ed25519PublicKey {
        self.keypair.public_key()
    }

    /// A signed, valid `tes.1` document.
    pub fn make_doc(&self, path: &str, content: &str, timestamp: Timestamp) -> Document {
        self.sign(Document::unsigned(
            FORMAT_TES1,
            self.workspace.clone(),
            self.public_key(),
            path,
            content,
            timestamp,
            None,
        ))
    }

    /// A signed ephemeral document. `path` must contain `!` to be valid.
    pub fn make_ephemeral(
        &self,
        path: &str,
        content: &str,
        timestamp: Timestamp,
        delete_after: Timestamp,
    ) -> Document {
        self.sign(Document::unsigned(
            FORMAT_TES1,
            self.workspace.clone(),
            self.public_key(),
            path,
            content,
            timestamp,
            Some(delete_after),
        ))
    }

    /// Re-sign a document after editing it.
    pub fn sign(&self, doc: Document) -> Document {
        Ed25519Validator
            .sign(&self.keypair, doc)
            .expect("fixture documents are signable")
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Create multiple test fixtures for multi-party tests.
pub fn multi_party_fixtures(count: usize) -> Vec<TestFixture> {
    (0..count)
        .map(|i| {
            let mut seed = [0u8; 32];
            seed[0] = i as u8;
            TestFixture::with_seed(seed)
        })
        .collect()
}

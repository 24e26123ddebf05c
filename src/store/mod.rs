//! Document store abstraction.
//!
//! The chunk subsystem talks to the authoritative local store only through
//! [`DocumentStore`]: a bulk get, a bulk put with optimistic revision checks,
//! and a change feed.
//!
//! - [`DocumentStore`] - The store trait
//! - [`MemoryDocumentStore`] - Revisioned in-memory implementation

mod memory;

pub use memory::MemoryDocumentStore;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::chunk::DocumentId;
use crate::error::Result;

/// A document as returned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    /// Current revision.
    pub rev: String,
    /// Document body, including `_id`.
    pub body: Value,
}

/// Per-id result of [`DocumentStore::bulk_get`].
#[derive(Debug, Clone, PartialEq)]
pub enum GetOutcome {
    /// The document exists.
    Found(StoredDocument),
    /// No live document has this id.
    NotFound,
    /// The store failed to read this id.
    Error(String),
}

/// One document to write.
#[derive(Debug, Clone, PartialEq)]
pub struct PutRequest {
    /// Target id.
    pub id: DocumentId,
    /// New body.
    pub body: Value,
    /// Revision the write is based on; `None` for creates.
    pub base_rev: Option<String>,
}

impl PutRequest {
    /// A create request.
    pub fn create(id: DocumentId, body: Value) -> Self {
        Self {
            id,
            body,
            base_rev: None,
        }
    }

    /// An update of revision `base_rev`.
    pub fn update(id: DocumentId, body: Value, base_rev: impl Into<String>) -> Self {
        Self {
            id,
            body,
            base_rev: Some(base_rev.into()),
        }
    }
}

/// Revision check applied by [`DocumentStore::bulk_put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PutMode {
    /// Write only if `base_rev` matches the current revision (absent for creates).
    #[default]
    CreateOrMatch,
    /// Write unconditionally.
    Force,
}

/// Per-item result of [`DocumentStore::bulk_put`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    /// Written; carries the new revision.
    Ok {
        /// The new revision.
        rev: String,
    },
    /// The revision check failed (for creates: the id already exists).
    Conflict,
    /// Any other per-item failure.
    Error(String),
}

/// A change observed on the store's feed.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChange {
    /// The changed document.
    pub id: DocumentId,
    /// The body after the change (empty object for deletions).
    pub body: Value,
    /// True when the change is a tombstone.
    pub deleted: bool,
}

/// The authoritative key/value document store.
///
/// Whole-call failures are returned as `Err`; per-item failures are reported
/// through the outcome vectors, which always match the input order and length.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Looks up every id in one call.
    async fn bulk_get(&self, ids: &[DocumentId]) -> Result<Vec<GetOutcome>>;

    /// Writes every request in one call.
    async fn bulk_put(&self, docs: Vec<PutRequest>, mode: PutMode) -> Result<Vec<PutOutcome>>;

    /// Subscribes to the change feed.
    fn subscribe(&self) -> broadcast::Receiver<DocumentChange>;
}

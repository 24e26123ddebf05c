//! The Chunk type - an immutable, content-addressed leaf document.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::DocumentId;

/// Type tag carried by every chunk document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LeafKind {
    /// The only chunk kind.
    #[default]
    #[serde(rename = "leaf")]
    Leaf,
}

/// A content-addressed chunk.
///
/// The payload is already encoded (base64 for binary pieces, and encrypted by
/// an external transform when applicable). Chunks are never mutated: the id is
/// fully determined by the payload, so a chunk is only ever created or
/// referenced.
///
/// # Example
///
/// ```
/// use leafstore::{Chunk, DocumentId};
///
/// let chunk = Chunk::new(DocumentId::new("h:1xyz"), "hello world");
///
/// assert_eq!(chunk.len(), 11);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// The content address.
    #[serde(rename = "_id")]
    pub id: DocumentId,

    /// The encoded payload, shared between the cache and readers.
    pub data: Arc<str>,

    /// Always [`LeafKind::Leaf`].
    #[serde(rename = "type")]
    pub kind: LeafKind,
}

impl Chunk {
    /// Creates a chunk with the given id and payload.
    pub fn new(id: DocumentId, data: impl Into<Arc<str>>) -> Self {
        Self {
            id,
            data: data.into(),
            kind: LeafKind::Leaf,
        }
    }

    /// Returns the payload length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the payload.
    pub fn data(&self) -> &str {
        &self.data
    }

    /// Returns the content address.
    pub fn id(&self) -> &DocumentId {
        &self.id
    }
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Chunk({} bytes @ {})", self.len(), self.id)
    }
}

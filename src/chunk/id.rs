//! Document identifiers.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Reserved prefix carried by every chunk id.
pub const CHUNK_ID_PREFIX: &str = "h:";

/// Marker following [`CHUNK_ID_PREFIX`] when the id was derived from salted content.
pub const ENCRYPTED_MARKER: char = '+';

/// Opaque key of a document in the store.
///
/// Chunks and file entries share one keyspace; chunk ids always start with
/// [`CHUNK_ID_PREFIX`], and [`DocumentId::for_path`] escapes paths that would
/// otherwise be mistaken for one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Wraps a raw key.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Builds a chunk id from an already-encoded digest.
    pub(crate) fn chunk(digest: &str, salted: bool) -> Self {
        let mut id = String::with_capacity(CHUNK_ID_PREFIX.len() + 1 + digest.len());
        id.push_str(CHUNK_ID_PREFIX);
        if salted {
            id.push(ENCRYPTED_MARKER);
        }
        id.push_str(digest);
        Self(id)
    }

    /// Derives the id of the metadata entry for `path`.
    ///
    /// Paths starting with `_` (reserved by document stores) or with the
    /// chunk prefix are escaped with a leading `/`.
    pub fn for_path(path: &str) -> Self {
        if path.starts_with('_') || path.starts_with(CHUNK_ID_PREFIX) {
            Self(format!("/{path}"))
        } else {
            Self(path.to_string())
        }
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if this id addresses a chunk.
    pub fn is_chunk(&self) -> bool {
        self.0.starts_with(CHUNK_ID_PREFIX)
    }

    /// Returns true if this chunk id was derived from salted content.
    pub fn is_encrypted_chunk(&self) -> bool {
        self.0
            .strip_prefix(CHUNK_ID_PREFIX)
            .is_some_and(|rest| rest.starts_with(ENCRYPTED_MARKER))
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DocumentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for DocumentId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DocumentId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for DocumentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_ids() {
        let plain = DocumentId::chunk("abc", false);
        assert_eq!(plain.as_str(), "h:abc");
        assert!(plain.is_chunk());
        assert!(!plain.is_encrypted_chunk());

        let salted = DocumentId::chunk("abc", true);
        assert_eq!(salted.as_str(), "h:+abc");
        assert!(salted.is_chunk());
        assert!(salted.is_encrypted_chunk());
    }

    #[test]
    fn test_for_path_escapes_reserved_prefixes() {
        assert_eq!(DocumentId::for_path("notes/a.md").as_str(), "notes/a.md");
        assert_eq!(DocumentId::for_path("_design").as_str(), "/_design");
        assert_eq!(DocumentId::for_path("h:trap.md").as_str(), "/h:trap.md");
        assert!(!DocumentId::for_path("h:trap.md").is_chunk());
    }

    #[test]
    fn test_serde_is_transparent() {
        let id = DocumentId::new("h:42");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"h:42\"");
    }
}

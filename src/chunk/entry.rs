//! File metadata entries and file content.

use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use super::DocumentId;
use crate::error::Result;

/// How a file's bytes are encoded into chunk payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// UTF-8 text; pieces are stored verbatim.
    Plain,
    /// Arbitrary bytes; pieces are base64 encoded.
    Binary,
}

/// A chunk embedded directly in a legacy metadata document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdenChunk {
    /// The encoded payload.
    pub data: String,
    /// Revision epoch the chunk was embedded at.
    #[serde(default)]
    pub epoch: u64,
}

/// Metadata document describing one logical file.
///
/// Concatenating the resolved payloads of `children` (falling back to `eden`
/// when an id is embedded there) reproduces the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaEntry {
    /// Path-derived id, see [`DocumentId::for_path`].
    #[serde(rename = "_id")]
    pub id: DocumentId,
    /// The file path.
    pub path: String,
    /// Creation time, milliseconds since the epoch.
    pub ctime: u64,
    /// Modification time, milliseconds since the epoch.
    pub mtime: u64,
    /// Size of the decoded content in bytes.
    pub size: u64,
    /// Payload encoding.
    #[serde(rename = "type")]
    pub kind: EntryKind,
    /// Ordered chunk ids.
    pub children: Vec<DocumentId>,
    /// Legacy inline chunks; always empty for new writes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub eden: BTreeMap<DocumentId, EdenChunk>,
    /// Tombstone flag.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
}

/// A file's content as handed to the splitter and the save path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBlob {
    path: String,
    kind: EntryKind,
    data: Bytes,
    ctime: u64,
    mtime: u64,
}

impl FileBlob {
    /// Creates a plain-text blob.
    pub fn text(path: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Plain,
            data: Bytes::from(text.into()),
            ctime: 0,
            mtime: 0,
        }
    }

    /// Creates a binary blob.
    pub fn binary(path: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            path: path.into(),
            kind: EntryKind::Binary,
            data: data.into(),
            ctime: 0,
            mtime: 0,
        }
    }

    /// Sets creation and modification times (milliseconds since the epoch).
    pub fn with_times(mut self, ctime: u64, mtime: u64) -> Self {
        self.ctime = ctime;
        self.mtime = mtime;
        self
    }

    /// Returns the file path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the payload encoding.
    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    /// Returns true for plain-text blobs.
    pub fn is_plain(&self) -> bool {
        self.kind == EntryKind::Plain
    }

    /// Returns the raw bytes.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Returns the content length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the blob has no content.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the creation time.
    pub fn ctime(&self) -> u64 {
        self.ctime
    }

    /// Returns the modification time.
    pub fn mtime(&self) -> u64 {
        self.mtime
    }
}

/// Reassembles file bytes from ordered piece payloads.
///
/// Plain pieces are concatenated as-is; binary pieces are base64-decoded
/// one by one and concatenated.
pub fn assemble_pieces<S: AsRef<str>>(kind: EntryKind, pieces: &[S]) -> Result<Bytes> {
    let total: usize = pieces.iter().map(|p| p.as_ref().len()).sum();
    let mut out = BytesMut::with_capacity(total);
    for piece in pieces {
        match kind {
            EntryKind::Plain => out.extend_from_slice(piece.as_ref().as_bytes()),
            EntryKind::Binary => out.extend_from_slice(&STANDARD.decode(piece.as_ref())?),
        }
    }
    Ok(out.freeze())
}

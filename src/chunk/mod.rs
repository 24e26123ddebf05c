//! Chunk and entry types.
//!
//! - [`Chunk`] - Immutable content-addressed leaf document
//! - [`DocumentId`] - Key shared by chunks and file entries
//! - [`MetaEntry`] - File metadata document listing its children
//! - [`FileBlob`] - A file's content as handed to the splitter

mod data;
mod entry;
mod id;

pub use data::{Chunk, LeafKind};
pub use entry::{EdenChunk, EntryKind, FileBlob, MetaEntry, assemble_pieces};
pub use id::{CHUNK_ID_PREFIX, DocumentId, ENCRYPTED_MARKER};

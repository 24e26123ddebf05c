//! leafstore
//!
//! Content-addressed chunk storage for multi-device file sync.
//!
//! `leafstore` turns files into small immutable chunks whose ids are derived
//! from their content, stores them in a document store next to the file
//! metadata, and reads them back through a layered pipeline:
//!
//! - splitting: line-aware, sentence-aware or rolling-hash strategies
//! - addressing: xxhash64 / xxhash32 / sha1 / blake3 ids, optionally salted
//! - reading: cache → document store → wait for replication
//! - writing: document store → cache, with duplicate detection
//!
//! The crate intentionally:
//! - does NOT replicate documents between devices
//! - does NOT encrypt payloads
//! - does NOT garbage-collect unreferenced chunks
//!
//! Replication plugs in through [`ChunkManager::missing_chunks`] and
//! [`ChunkManager::on_chunk_arrived`].
//!
//! # Splitting
//!
//! ```
//! use leafstore::{ContentSplitter, FileBlob, StoreConfig};
//!
//! let splitter = ContentSplitter::new(&StoreConfig::default())?;
//! let blob = FileBlob::text("a.md", "# Heading\n\nSome text.\n");
//!
//! let pieces: Vec<String> = splitter.pieces(&blob)?.collect();
//! assert_eq!(pieces.concat(), "# Heading\n\nSome text.\n");
//! # Ok::<(), leafstore::StoreError>(())
//! ```
//!
//! # Saving and loading
//!
//! ```
//! use std::sync::Arc;
//! use leafstore::{ChunkManager, FileBlob, FileStore, MemoryDocumentStore, ReadOptions, StoreConfig};
//!
//! # tokio_test::block_on(async {
//! let store = Arc::new(MemoryDocumentStore::new());
//! let manager = ChunkManager::builder(StoreConfig::default(), store).build()?;
//! let files = FileStore::new(manager.clone())?;
//!
//! files.save(&FileBlob::binary("img.png", vec![7u8; 4096])).await?;
//! let bytes = files.load("img.png", ReadOptions::default()).await?;
//! assert_eq!(bytes.map(|b| b.len()), Some(4096));
//!
//! manager.destroy();
//! # Ok::<(), leafstore::StoreError>(())
//! # }).unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod chunk;
mod config;
mod error;
mod layer;
mod manager;
mod splitter;
mod store;
mod writer;

mod cdc; // internal rolling hash
mod hash; // hashing and addressing
mod util; // base36, char boundaries

//
// Public surface
//

pub use chunk::{
    CHUNK_ID_PREFIX, Chunk, DocumentId, ENCRYPTED_MARKER, EdenChunk, EntryKind, FileBlob,
    LeafKind, MetaEntry, assemble_pieces,
};
pub use config::{
    DEFAULT_FETCH_BATCH_SIZE, DEFAULT_FETCH_CONCURRENCY, DEFAULT_MAX_CACHE_SIZE,
    DEFAULT_MINIMUM_CHUNK_SIZE, DEFAULT_READ_TIMEOUT_MS, DEFAULT_WORKER_THRESHOLD, StoreConfig,
};
pub use error::{Result, StoreError};
pub use hash::{AddressedPiece, ContentAddresser, HashAlgorithm};
pub use layer::{
    ArrivalWaitLayer, CacheLayer, CacheStats, ChunkCache, ChunkReadLayer, ChunkWriteLayer,
    ReadNext, ReadOptions, StoreReadLayer, StoreWriteLayer, WriteNext, WriteOptions, WriteResult,
};
pub use manager::{ChunkManager, ChunkManagerBuilder, StabilizeHook};
pub use splitter::{ChunkAlgorithm, ContentSplitter, MAX_DOC_SIZE_BIN, PieceIter, Pieces};
pub use store::{
    DocumentChange, DocumentStore, GetOutcome, MemoryDocumentStore, PutMode, PutOutcome,
    PutRequest, StoredDocument,
};
pub use writer::{ChunkStats, FLUSH_THRESHOLD, FileStore, SaveOutcome};

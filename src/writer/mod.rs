//! File store - the save and load path on top of the chunk manager.
//!
//! Saving splits a file into pieces, addresses each piece, writes the chunks
//! in bounded flushes and finally records a [`MetaEntry`] listing the
//! children. The entry is only written once every chunk is durable, so an
//! entry never points at unwritten children.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use leafstore::{ChunkManager, FileBlob, FileStore, MemoryDocumentStore, ReadOptions, StoreConfig};
//!
//! # tokio_test::block_on(async {
//! let store = Arc::new(MemoryDocumentStore::new());
//! let manager = ChunkManager::builder(StoreConfig::default(), store).build()?;
//! let files = FileStore::new(manager)?;
//!
//! let outcome = files.save(&FileBlob::text("notes/a.md", "# Title\n\nBody text.\n")).await?;
//! assert!(!outcome.entry.children.is_empty());
//!
//! let bytes = files.load("notes/a.md", ReadOptions::default()).await?;
//! assert_eq!(bytes.as_deref(), Some(&b"# Title\n\nBody text.\n"[..]));
//! # Ok::<(), leafstore::StoreError>(())
//! # }).unwrap();
//! ```

mod keyed_queue;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use tracing::{debug, error, info, warn};

use crate::chunk::{Chunk, DocumentId, FileBlob, MetaEntry, assemble_pieces};
use crate::error::{Result, StoreError};
use crate::hash::ContentAddresser;
use crate::layer::{ReadOptions, WriteOptions};
use crate::manager::ChunkManager;
use crate::splitter::ContentSplitter;
use crate::store::{GetOutcome, PutMode, PutOutcome, PutRequest};
use keyed_queue::KeyedQueue;

/// Buffered payload size that triggers a flush during a save.
pub const FLUSH_THRESHOLD: usize = 2 * 1024 * 1024;

/// Chunk counters for one save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkStats {
    /// Distinct pieces whose id had to be computed.
    pub new: usize,
    /// Distinct pieces whose id came from the cache.
    pub cached: usize,
    /// Chunks newly persisted.
    pub written: usize,
    /// Chunks the store already had.
    pub duplicated: usize,
    /// Write calls issued, including the final one.
    pub flushes: usize,
}

/// Result of a successful save.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveOutcome {
    /// The entry as written.
    pub entry: MetaEntry,
    /// Chunk counters.
    pub stats: ChunkStats,
}

/// Saves and loads whole files through a [`ChunkManager`].
pub struct FileStore {
    manager: Arc<ChunkManager>,
    splitter: ContentSplitter,
    addresser: ContentAddresser,
    entry_queue: KeyedQueue,
}

impl FileStore {
    /// Creates a file store using the manager's configuration.
    pub fn new(manager: Arc<ChunkManager>) -> Result<Self> {
        let splitter = manager.splitter()?;
        let addresser = manager.addresser();
        Ok(Self {
            manager,
            splitter,
            addresser,
            entry_queue: KeyedQueue::new(),
        })
    }

    /// Returns the underlying manager.
    pub fn manager(&self) -> &Arc<ChunkManager> {
        &self.manager
    }

    /// Saves `blob` and records its entry.
    ///
    /// Any failed flush aborts the save before the entry is written.
    pub async fn save(&self, blob: &FileBlob) -> Result<SaveOutcome> {
        let id = DocumentId::for_path(blob.path());
        self.manager
            .transaction(async {
                let (children, stats) = self.write_chunks(blob, &id).await?;
                let entry = self.commit_entry(blob, id.clone(), children).await?;
                info!(
                    path = blob.path(),
                    size = blob.len(),
                    children = entry.children.len(),
                    new = stats.new,
                    written = stats.written,
                    duplicated = stats.duplicated,
                    "file saved"
                );
                Ok(SaveOutcome { entry, stats })
            })
            .await
    }

    /// Loads `path`, waiting for missing chunks up to the configured read timeout.
    pub async fn load_default(&self, path: &str) -> Result<Option<Bytes>> {
        self.load(path, self.manager.read_options()).await
    }

    /// Loads and reassembles the file at `path`.
    ///
    /// Returns `None` if there is no live entry. Children that cannot be
    /// resolved within `options` fail with [`StoreError::MissingChunks`].
    pub async fn load(&self, path: &str, options: ReadOptions) -> Result<Option<Bytes>> {
        let Some(entry) = self.entry(path).await? else {
            return Ok(None);
        };
        let preloaded: Vec<Chunk> = entry
            .eden
            .iter()
            .map(|(id, eden)| Chunk::new(id.clone(), eden.data.as_str()))
            .collect();
        let chunks = self
            .manager
            .read_batched(entry.children.clone(), options, preloaded)
            .await?;

        let mut pieces = Vec::with_capacity(chunks.len());
        let mut missing = Vec::new();
        for (id, chunk) in entry.children.iter().zip(chunks) {
            match chunk {
                Some(chunk) => pieces.push(chunk.data),
                None => missing.push(id.clone()),
            }
        }
        if !missing.is_empty() {
            warn!(path, missing = missing.len(), "file has unresolved chunks");
            return Err(StoreError::MissingChunks {
                path: path.to_string(),
                ids: missing,
            });
        }
        assemble_pieces(entry.kind, &pieces).map(Some)
    }

    /// Returns the live entry for `path`.
    pub async fn entry(&self, path: &str) -> Result<Option<MetaEntry>> {
        let id = DocumentId::for_path(path);
        Ok(self
            .current_entry(&id)
            .await?
            .map(|(_, entry)| entry)
            .filter(|entry| !entry.deleted))
    }

    /// Tombstones the entry for `path`. Chunks are left for garbage collection.
    ///
    /// Returns false if there was no live entry.
    pub async fn delete(&self, path: &str) -> Result<bool> {
        let _slot = self.entry_queue.lock(path).await;
        let id = DocumentId::for_path(path);
        let Some((_, mut entry)) = self.current_entry(&id).await? else {
            return Ok(false);
        };
        if entry.deleted {
            return Ok(false);
        }
        entry.deleted = true;
        entry.children.clear();
        entry.eden.clear();
        let request = PutRequest::create(id.clone(), serde_json::to_value(&entry)?);
        self.put_entry(path, request, PutMode::Force).await?;
        debug!(path, "entry deleted");
        Ok(true)
    }

    /// Splits, addresses and flushes every piece of `blob`.
    async fn write_chunks(
        &self,
        blob: &FileBlob,
        origin: &DocumentId,
    ) -> Result<(Vec<DocumentId>, ChunkStats)> {
        let mut pieces = self.splitter.split(blob)?;
        let mut stats = ChunkStats::default();
        let mut children = Vec::new();
        let mut seen = HashSet::new();
        let mut buffer = Vec::new();
        let mut buffered = 0;

        while let Some(piece) = pieces.next().await {
            let piece = piece?;
            if piece.is_empty() {
                continue;
            }
            let addressed = self.addresser.address(piece)?;
            children.push(addressed.id.clone());
            if !seen.insert(addressed.id.clone()) {
                continue;
            }
            if addressed.is_new {
                stats.new += 1;
            } else {
                stats.cached += 1;
            }
            buffered += addressed.piece.len();
            buffer.push(addressed.into_chunk());
            if buffered > FLUSH_THRESHOLD {
                self.flush(&mut buffer, origin, &mut stats).await?;
                buffered = 0;
            }
        }
        self.flush(&mut buffer, origin, &mut stats).await?;

        if !blob.is_empty() && children.is_empty() {
            error!(path = blob.path(), size = blob.len(), "non-empty file produced no chunks");
            return Err(StoreError::NoChunksProduced {
                path: blob.path().to_string(),
            });
        }
        Ok((children, stats))
    }

    async fn flush(
        &self,
        buffer: &mut Vec<Chunk>,
        origin: &DocumentId,
        stats: &mut ChunkStats,
    ) -> Result<()> {
        let chunks = std::mem::take(buffer);
        let count = chunks.len();
        let result = self
            .manager
            .write(chunks, WriteOptions::default(), origin)
            .await
            .inspect_err(|e| error!(origin = %origin, chunks = count, error = %e, "flush failed"))?;
        stats.flushes += 1;
        stats.written += result.written;
        stats.duplicated += result.duplicated;
        Ok(())
    }

    /// Writes the entry for `blob`, serialised with other writers of the same path.
    async fn commit_entry(
        &self,
        blob: &FileBlob,
        id: DocumentId,
        children: Vec<DocumentId>,
    ) -> Result<MetaEntry> {
        let _slot = self.entry_queue.lock(blob.path()).await;
        let current = self.current_entry(&id).await?;
        let ctime = current
            .as_ref()
            .filter(|(_, entry)| !entry.deleted)
            .map_or(blob.ctime(), |(_, entry)| entry.ctime);

        let entry = MetaEntry {
            id: id.clone(),
            path: blob.path().to_string(),
            ctime,
            mtime: blob.mtime(),
            size: blob.len() as u64,
            kind: blob.kind(),
            children,
            eden: BTreeMap::new(),
            deleted: false,
        };
        let body = serde_json::to_value(&entry)?;
        let request = match current {
            Some((rev, _)) => PutRequest::update(id, body, rev),
            None => PutRequest::create(id, body),
        };
        self.put_entry(blob.path(), request, PutMode::CreateOrMatch)
            .await?;
        Ok(entry)
    }

    async fn put_entry(&self, path: &str, request: PutRequest, mode: PutMode) -> Result<String> {
        let id = request.id.clone();
        let outcome = self
            .manager
            .store()
            .bulk_put(vec![request], mode)
            .await?
            .into_iter()
            .next();
        match outcome {
            Some(PutOutcome::Ok { rev }) => Ok(rev),
            Some(PutOutcome::Conflict) => {
                warn!(path, "entry revision changed underneath the save");
                Err(StoreError::EntryConflict {
                    path: path.to_string(),
                })
            }
            Some(PutOutcome::Error(reason)) => {
                error!(path, reason = %reason, "entry write failed");
                Err(StoreError::WriteFailure {
                    failures: vec![(id, reason)],
                })
            }
            None => Err(StoreError::Store("bulk_put returned no outcome".to_string())),
        }
    }

    /// Fetches the stored entry and its revision, including tombstoned ones.
    async fn current_entry(&self, id: &DocumentId) -> Result<Option<(String, MetaEntry)>> {
        let outcome = self
            .manager
            .store()
            .bulk_get(std::slice::from_ref(id))
            .await?
            .into_iter()
            .next();
        match outcome {
            Some(GetOutcome::Found(doc)) => {
                let entry: MetaEntry =
                    serde_json::from_value(doc.body).map_err(|e| StoreError::Corrupted {
                        id: id.clone(),
                        reason: e.to_string(),
                    })?;
                Ok(Some((doc.rev, entry)))
            }
            Some(GetOutcome::NotFound) | None => Ok(None),
            Some(GetOutcome::Error(reason)) => Err(StoreError::Store(format!("{id}: {reason}"))),
        }
    }
}

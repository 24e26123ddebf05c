//! Bounded chunk cache.
//!
//! [`ChunkCache`] is a strict LRU over chunks plus a reverse index from
//! payload to id, which the addresser uses to skip hashing content it has
//! already seen. [`CacheLayer`] puts the cache in front of the read pipeline
//! and behind the store in the write pipeline.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::{
    ChunkReadLayer, ChunkWriteLayer, ReadNext, ReadOptions, WriteNext, WriteOptions, WriteResult,
    fill_missing,
};
use crate::chunk::{Chunk, DocumentId};
use crate::error::Result;

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Reads served from the cache.
    pub hits: u64,
    /// Reads the cache could not serve.
    pub misses: u64,
    /// Entries pushed out by the size bound.
    pub evictions: u64,
    /// Entries currently resident.
    pub resident: usize,
}

struct CacheInner {
    chunks: LruCache<DocumentId, Chunk>,
    ids: LruCache<Arc<str>, DocumentId>,
}

/// Fixed-capacity LRU of chunks with a payload-to-id reverse index.
///
/// "Touching" an entry (a read hit, or a write of a resident chunk) moves it
/// to the most-recent position. Inserting beyond the capacity evicts the
/// least recently touched entry together with its reverse-index slot.
pub struct ChunkCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ChunkCache {
    /// Creates a cache bounded at `capacity` chunks (at least one).
    pub fn new(capacity: usize) -> Self {
        let bound = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(CacheInner {
                chunks: LruCache::new(bound),
                ids: LruCache::new(bound),
            }),
            capacity: bound.get(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Returns a resident chunk and touches it, counting a hit or a miss.
    pub fn get(&self, id: &DocumentId) -> Option<Chunk> {
        let found = self.inner.lock().chunks.get(id).cloned();
        let counter = if found.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Returns a resident chunk without touching it or counting.
    pub fn peek(&self, id: &DocumentId) -> Option<Chunk> {
        self.inner.lock().chunks.peek(id).cloned()
    }

    /// Returns the id of resident content equal to `data`, touching it.
    pub fn id_for(&self, data: &str) -> Option<DocumentId> {
        let mut inner = self.inner.lock();
        let id = inner.ids.get(data).cloned()?;
        inner.chunks.promote(&id);
        Some(id)
    }

    /// Returns true if the chunk is resident.
    pub fn contains(&self, id: &DocumentId) -> bool {
        self.inner.lock().chunks.contains(id)
    }

    /// Inserts or touches a chunk, evicting the least recently used entry
    /// when the cache is full.
    pub fn insert(&self, chunk: Chunk) {
        let id = chunk.id.clone();
        let data = chunk.data.clone();
        let mut inner = self.inner.lock();
        if let Some((old_id, old)) = inner.chunks.push(id.clone(), chunk) {
            if old_id != id {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                trace!(id = %old_id, "evicted chunk from cache");
                if inner.ids.peek(&*old.data) == Some(&old_id) {
                    inner.ids.pop(&*old.data);
                }
            }
        }
        inner.ids.push(data, id);
    }

    /// Drops every entry. Counters are kept.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.chunks.clear();
        inner.ids.clear();
    }

    /// Returns the number of resident chunks.
    pub fn len(&self) -> usize {
        self.inner.lock().chunks.len()
    }

    /// Returns true if no chunk is resident.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the size bound.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            resident: self.len(),
        }
    }
}

impl fmt::Debug for ChunkCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkCache")
            .field("capacity", &self.capacity)
            .field("stats", &self.stats())
            .finish()
    }
}

/// The cache as a pipeline layer.
#[derive(Debug, Clone)]
pub struct CacheLayer {
    cache: Arc<ChunkCache>,
}

impl CacheLayer {
    /// Wraps a shared cache.
    pub fn new(cache: Arc<ChunkCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl ChunkReadLayer for CacheLayer {
    fn name(&self) -> &'static str {
        "cache"
    }

    async fn read(
        &self,
        ids: Vec<DocumentId>,
        options: ReadOptions,
        next: ReadNext<'_>,
    ) -> Result<Vec<Option<Chunk>>> {
        if options.skip_cache {
            return next.read(ids, options).await;
        }

        let mut results = vec![None; ids.len()];
        let mut missing = Vec::new();
        let mut rest = Vec::new();
        for (slot, id) in ids.into_iter().enumerate() {
            match self.cache.get(&id) {
                Some(chunk) => results[slot] = Some(chunk),
                None => {
                    missing.push(slot);
                    rest.push(id);
                }
            }
        }
        debug!(
            hits = results.len() - missing.len(),
            misses = missing.len(),
            "cache read"
        );
        if missing.is_empty() {
            return Ok(results);
        }

        let fetched = next.read(rest, options).await?;
        for chunk in fetched.iter().flatten() {
            self.cache.insert(chunk.clone());
        }
        fill_missing(&mut results, &missing, fetched);
        Ok(results)
    }

    fn tear_down(&self) {
        self.cache.clear();
    }
}

#[async_trait]
impl ChunkWriteLayer for CacheLayer {
    fn name(&self) -> &'static str {
        "cache"
    }

    async fn write(
        &self,
        chunks: Vec<Chunk>,
        options: WriteOptions,
        next: WriteNext<'_>,
    ) -> Result<WriteResult> {
        let (resident, fresh): (Vec<Chunk>, Vec<Chunk>) =
            chunks.into_iter().partition(|c| self.cache.contains(&c.id));

        let mut result = next.write(fresh.clone(), options).await?;
        if result.success {
            // Re-inserting resident chunks touches them, or restores any
            // evicted while the store write was in flight.
            for chunk in resident.iter().cloned().chain(fresh) {
                self.cache.insert(chunk);
            }
        }
        result.cached += resident.len();
        Ok(result)
    }

    fn tear_down(&self) {
        self.cache.clear();
    }
}

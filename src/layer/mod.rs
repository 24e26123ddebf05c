//! Read and write pipeline layers.
//!
//! A pipeline is an ordered slice of layers. Each layer receives the ids (or
//! chunks) the previous layers left over and a continuation that runs the
//! rest of the pipeline; a layer that resolves nothing simply delegates.
//!
//! - [`ChunkReadLayer`] / [`ChunkWriteLayer`] - The layer traits
//! - [`ReadNext`] / [`WriteNext`] - Continuations over the remaining layers
//! - [`CacheLayer`] - Bounded LRU cache, both read and write
//! - [`StoreReadLayer`] / [`StoreWriteLayer`] - The authoritative document store
//! - [`ArrivalWaitLayer`] - Waits for chunks to arrive from a remote peer

mod arrival;
mod cache;
mod database;

pub use arrival::ArrivalWaitLayer;
pub use cache::{CacheLayer, CacheStats, ChunkCache};
pub use database::{StoreReadLayer, StoreWriteLayer};

use std::future::ready;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::chunk::{Chunk, DocumentId};
use crate::config::StoreConfig;
use crate::error::Result;

/// Options for a read through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadOptions {
    /// Bypass the cache entirely.
    pub skip_cache: bool,
    /// How long to wait for chunks that are not local. Zero never waits.
    pub timeout: Duration,
    /// Do not ask the replication collaborator to fetch missing chunks.
    pub prevent_remote_request: bool,
}

impl ReadOptions {
    /// Options that wait up to the configured read timeout.
    pub fn from_config(config: &StoreConfig) -> Self {
        Self::default().with_timeout(config.read_timeout())
    }

    /// Sets the arrival timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Bypasses the cache.
    pub fn with_skip_cache(mut self, skip: bool) -> Self {
        self.skip_cache = skip;
        self
    }

    /// Suppresses the missing-chunk signal.
    pub fn with_prevent_remote_request(mut self, prevent: bool) -> Self {
        self.prevent_remote_request = prevent;
        self
    }
}

/// Options for a write through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteOptions {
    /// Bypass the store's revision check.
    pub force: bool,
}

/// Tally of one write through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteResult {
    /// Chunks newly persisted.
    pub written: usize,
    /// Chunks that were already resident in the cache.
    pub cached: usize,
    /// Chunks the store already had.
    pub duplicated: usize,
    /// Whether the whole pipeline succeeded.
    pub success: bool,
}

/// A layer of the read pipeline.
#[async_trait]
pub trait ChunkReadLayer: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Resolves `ids`, asking `next` for anything this layer cannot.
    ///
    /// The result has one slot per id, in the same order.
    async fn read(
        &self,
        ids: Vec<DocumentId>,
        options: ReadOptions,
        next: ReadNext<'_>,
    ) -> Result<Vec<Option<Chunk>>>;

    /// Releases resources when the owning manager is destroyed.
    fn tear_down(&self) {}
}

/// A layer of the write pipeline.
#[async_trait]
pub trait ChunkWriteLayer: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Writes `chunks`, handing them on to `next` as appropriate.
    async fn write(
        &self,
        chunks: Vec<Chunk>,
        options: WriteOptions,
        next: WriteNext<'_>,
    ) -> Result<WriteResult>;

    /// Releases resources when the owning manager is destroyed.
    fn tear_down(&self) {}
}

/// Continuation running the remaining read layers.
#[derive(Clone, Copy)]
pub struct ReadNext<'a> {
    layers: &'a [Arc<dyn ChunkReadLayer>],
}

impl<'a> ReadNext<'a> {
    /// Creates a continuation over `layers`.
    pub fn new(layers: &'a [Arc<dyn ChunkReadLayer>]) -> Self {
        Self { layers }
    }

    /// Runs the remaining layers. With none left, every id resolves to `None`.
    pub fn read(
        self,
        ids: Vec<DocumentId>,
        options: ReadOptions,
    ) -> BoxFuture<'a, Result<Vec<Option<Chunk>>>> {
        if ids.is_empty() {
            return Box::pin(ready(Ok(Vec::new())));
        }
        match self.layers.split_first() {
            Some((layer, rest)) => layer.read(ids, options, ReadNext { layers: rest }),
            None => Box::pin(ready(Ok(vec![None; ids.len()]))),
        }
    }
}

/// Continuation running the remaining write layers.
#[derive(Clone, Copy)]
pub struct WriteNext<'a> {
    layers: &'a [Arc<dyn ChunkWriteLayer>],
}

impl<'a> WriteNext<'a> {
    /// Creates a continuation over `layers`.
    pub fn new(layers: &'a [Arc<dyn ChunkWriteLayer>]) -> Self {
        Self { layers }
    }

    /// Runs the remaining layers. With none left, the write succeeds.
    pub fn write(
        self,
        chunks: Vec<Chunk>,
        options: WriteOptions,
    ) -> BoxFuture<'a, Result<WriteResult>> {
        match self.layers.split_first() {
            Some((layer, rest)) => layer.write(chunks, options, WriteNext { layers: rest }),
            None => Box::pin(ready(Ok(WriteResult {
                success: true,
                ..WriteResult::default()
            }))),
        }
    }
}

/// Places `fetched` into the `missing` slots of `results`.
pub(crate) fn fill_missing(
    results: &mut [Option<Chunk>],
    missing: &[usize],
    fetched: Vec<Option<Chunk>>,
) {
    for (&slot, chunk) in missing.iter().zip(fetched) {
        results[slot] = chunk;
    }
}

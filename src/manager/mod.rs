//! Chunk manager - the orchestrator over the read and write pipelines.
//!
//! The manager owns one shared [`ChunkCache`] and wires it into two
//! pipelines:
//!
//! - read: cache → document store → arrival wait
//! - write: document store → cache
//!
//! The write order makes a chunk resident only after the store has accepted
//! it (or confirmed it already had it). The manager also listens to the
//! store's change feed so that chunks delivered by replication wake any read
//! waiting for them.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use leafstore::{ChunkManager, MemoryDocumentStore, ReadOptions, StoreConfig};
//!
//! # tokio_test::block_on(async {
//! let store = Arc::new(MemoryDocumentStore::new());
//! let manager = ChunkManager::builder(StoreConfig::default(), store).build()?;
//!
//! let id = manager.addresser().compute_id("hello");
//! let out = manager.read(vec![id], ReadOptions::default()).await?;
//! assert!(out[0].is_none());
//!
//! manager.destroy();
//! # Ok::<(), leafstore::StoreError>(())
//! # }).unwrap();
//! ```

mod transaction;

pub use transaction::StabilizeHook;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::future::FutureExt;
use futures_util::stream::{self, StreamExt, TryStreamExt};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::chunk::{Chunk, DocumentId};
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::hash::ContentAddresser;
use crate::layer::{
    ArrivalWaitLayer, CacheLayer, CacheStats, ChunkCache, ChunkReadLayer, ChunkWriteLayer,
    ReadNext, ReadOptions, StoreReadLayer, StoreWriteLayer, WriteNext, WriteOptions, WriteResult,
    fill_missing,
};
use crate::splitter::ContentSplitter;
use crate::store::{DocumentChange, DocumentStore};
use transaction::TransactionGate;

/// Builder for [`ChunkManager`].
pub struct ChunkManagerBuilder {
    config: StoreConfig,
    store: Arc<dyn DocumentStore>,
    stabilizer: Option<StabilizeHook>,
}

impl ChunkManagerBuilder {
    /// Sets the hook run each time the last active transaction finishes.
    pub fn stabilizer<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.stabilizer = Some(Arc::new(move || hook().boxed()));
        self
    }

    /// Validates the configuration and builds the manager.
    ///
    /// When called inside a tokio runtime the manager also attaches to the
    /// store's change feed.
    pub fn build(self) -> Result<Arc<ChunkManager>> {
        self.config.validate()?;

        let cache = Arc::new(ChunkCache::new(self.config.max_cache_size()));
        let arrival = Arc::new(ArrivalWaitLayer::new());
        let cache_layer = Arc::new(CacheLayer::new(cache.clone()));

        let read_layers: Vec<Arc<dyn ChunkReadLayer>> = vec![
            cache_layer.clone(),
            Arc::new(StoreReadLayer::new(self.store.clone())),
            arrival.clone(),
        ];
        let write_layers: Vec<Arc<dyn ChunkWriteLayer>> = vec![
            Arc::new(StoreWriteLayer::new(self.store.clone())),
            cache_layer,
        ];

        let manager = Arc::new(ChunkManager {
            config: self.config,
            store: self.store,
            cache,
            arrival,
            read_layers,
            write_layers,
            gate: Arc::new(TransactionGate::new(self.stabilizer)),
            feed: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        });
        manager.attach_change_feed();
        debug!(
            cache_size = manager.cache.capacity(),
            hash = manager.config.hash_algorithm().as_str(),
            "chunk manager ready"
        );
        Ok(manager)
    }
}

/// Orchestrates chunk reads, writes and transactions.
pub struct ChunkManager {
    config: StoreConfig,
    store: Arc<dyn DocumentStore>,
    cache: Arc<ChunkCache>,
    arrival: Arc<ArrivalWaitLayer>,
    read_layers: Vec<Arc<dyn ChunkReadLayer>>,
    write_layers: Vec<Arc<dyn ChunkWriteLayer>>,
    gate: Arc<TransactionGate>,
    feed: Mutex<Option<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

impl ChunkManager {
    /// Starts building a manager over `store`.
    pub fn builder(config: StoreConfig, store: Arc<dyn DocumentStore>) -> ChunkManagerBuilder {
        ChunkManagerBuilder {
            config,
            store,
            stabilizer: None,
        }
    }

    /// Reads chunks in the order of `ids`.
    ///
    /// Unresolved slots are `None`: not local and either not waited for
    /// (`timeout` zero) or not delivered in time.
    pub async fn read(
        &self,
        ids: Vec<DocumentId>,
        options: ReadOptions,
    ) -> Result<Vec<Option<Chunk>>> {
        self.read_with_preloaded(ids, options, Vec::new()).await
    }

    /// Reads chunks, answering from `preloaded` first.
    ///
    /// Preloaded chunks (legacy inline `eden` entries) bypass the pipeline and
    /// are inserted into the cache.
    pub async fn read_with_preloaded(
        &self,
        ids: Vec<DocumentId>,
        options: ReadOptions,
        preloaded: Vec<Chunk>,
    ) -> Result<Vec<Option<Chunk>>> {
        self.ensure_alive()?;
        let (mut results, missing, rest) = self.merge_preloaded(ids, preloaded);
        let fetched = ReadNext::new(&self.read_layers).read(rest, options).await?;
        fill_missing(&mut results, &missing, fetched);
        Ok(results)
    }

    /// Reads a long id list in bounded batches.
    ///
    /// Batches hold at most `fetch_batch_size` ids and at most
    /// `fetch_concurrency` of them run at once. Order is preserved.
    pub async fn read_batched(
        &self,
        ids: Vec<DocumentId>,
        options: ReadOptions,
        preloaded: Vec<Chunk>,
    ) -> Result<Vec<Option<Chunk>>> {
        self.ensure_alive()?;
        let (mut results, missing, rest) = self.merge_preloaded(ids, preloaded);

        let batch_size = self.config.fetch_batch_size();
        let batches: Vec<Vec<DocumentId>> = rest.chunks(batch_size).map(<[_]>::to_vec).collect();
        debug!(
            ids = rest.len(),
            batches = batches.len(),
            concurrency = self.config.fetch_concurrency(),
            "batched read"
        );
        let fetched: Vec<Vec<Option<Chunk>>> = stream::iter(batches)
            .map(|batch| ReadNext::new(&self.read_layers).read(batch, options))
            .buffered(self.config.fetch_concurrency())
            .try_collect()
            .await?;

        fill_missing(&mut results, &missing, fetched.into_iter().flatten().collect());
        Ok(results)
    }

    /// Writes chunks through the store and then the cache.
    ///
    /// `origin` names the document the chunks belong to and is only used for
    /// logging.
    pub async fn write(
        &self,
        chunks: Vec<Chunk>,
        options: WriteOptions,
        origin: &DocumentId,
    ) -> Result<WriteResult> {
        self.ensure_alive()?;
        let submitted = chunks.len();
        let result = WriteNext::new(&self.write_layers)
            .write(chunks, options)
            .await?;
        debug!(
            origin = %origin,
            submitted,
            written = result.written,
            cached = result.cached,
            duplicated = result.duplicated,
            "chunk write"
        );
        Ok(result)
    }

    /// Runs `work` as a transaction.
    ///
    /// Transactions may overlap. When the last active one finishes, the
    /// stabilisation hook runs once before any new transaction starts.
    pub async fn transaction<Fut, T>(&self, work: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        self.ensure_alive()?;
        self.gate.run(work).await
    }

    /// Waits until no transaction is active and stabilisation has finished.
    pub async fn stabilised(&self) {
        self.gate.stabilised().await;
    }

    /// Returns how many times stabilisation has completed.
    pub fn stabilization_count(&self) -> u64 {
        self.gate.stabilizations()
    }

    /// Returns the number of transactions currently running.
    pub fn active_transactions(&self) -> usize {
        self.gate.active()
    }

    /// Subscribes to batches of ids that reads are waiting for.
    pub fn missing_chunks(&self) -> broadcast::Receiver<Vec<DocumentId>> {
        self.arrival.subscribe_missing()
    }

    /// Delivers a chunk fetched by the replication collaborator.
    pub fn on_chunk_arrived(&self, chunk: Chunk, deleted: bool) -> bool {
        self.arrival.on_chunk_arrived(chunk, deleted)
    }

    /// Reports that a remote lookup confirmed `id` does not exist.
    pub fn on_missing_chunk(&self, id: &DocumentId) -> bool {
        self.arrival.on_missing_chunk(id)
    }

    /// Returns a snapshot of the cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Returns true if `id` is resident in the cache.
    pub fn is_cached(&self, id: &DocumentId) -> bool {
        self.cache.contains(id)
    }

    /// Returns the number of ids reads are currently waiting for.
    pub fn waiting_count(&self) -> usize {
        self.arrival.waiting_count()
    }

    /// Returns the shared cache.
    pub fn cache(&self) -> &Arc<ChunkCache> {
        &self.cache
    }

    /// Returns the underlying document store.
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Returns read options waiting up to the configured read timeout.
    pub fn read_options(&self) -> ReadOptions {
        ReadOptions::from_config(&self.config)
    }

    /// Returns the configuration the manager was built with.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Creates an addresser sharing this manager's cache.
    pub fn addresser(&self) -> ContentAddresser {
        ContentAddresser::new(&self.config, self.cache.clone())
    }

    /// Creates the splitter selected by the configuration.
    pub fn splitter(&self) -> Result<ContentSplitter> {
        ContentSplitter::new(&self.config)
    }

    /// Returns true once [`destroy`](Self::destroy) has run.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Tears down every layer and detaches from the change feed.
    ///
    /// Pending arrival waits resolve to `None` and the cache is emptied.
    /// Calling this more than once has no further effect; every other
    /// operation fails with [`StoreError::Destroyed`] afterwards.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        for layer in &self.read_layers {
            layer.tear_down();
        }
        for layer in &self.write_layers {
            layer.tear_down();
        }
        if let Some(feed) = self.feed.lock().take() {
            feed.abort();
        }
        info!("chunk manager destroyed");
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.is_destroyed() {
            Err(StoreError::Destroyed)
        } else {
            Ok(())
        }
    }

    /// Splits `ids` into preloaded answers and the ids left for the pipeline.
    fn merge_preloaded(
        &self,
        ids: Vec<DocumentId>,
        preloaded: Vec<Chunk>,
    ) -> (Vec<Option<Chunk>>, Vec<usize>, Vec<DocumentId>) {
        let mut results = vec![None; ids.len()];
        if preloaded.is_empty() {
            return (results, (0..ids.len()).collect(), ids);
        }

        let preloaded: HashMap<DocumentId, Chunk> =
            preloaded.into_iter().map(|c| (c.id.clone(), c)).collect();
        for chunk in preloaded.values() {
            self.cache.insert(chunk.clone());
        }
        let mut missing = Vec::new();
        let mut rest = Vec::new();
        for (slot, id) in ids.into_iter().enumerate() {
            match preloaded.get(&id) {
                Some(chunk) => results[slot] = Some(chunk.clone()),
                None => {
                    missing.push(slot);
                    rest.push(id);
                }
            }
        }
        (results, missing, rest)
    }

    fn attach_change_feed(&self) {
        let Ok(runtime) = Handle::try_current() else {
            warn!("no tokio runtime; change feed not attached");
            return;
        };
        let mut changes = self.store.subscribe();
        let arrival = self.arrival.clone();
        let task = runtime.spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => route_change(&arrival, change),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "change feed lagged; some arrivals may time out");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        *self.feed.lock() = Some(task);
    }
}

impl Drop for ChunkManager {
    fn drop(&mut self) {
        if let Some(feed) = self.feed.get_mut().take() {
            feed.abort();
        }
    }
}

/// Wakes arrival waits from a change on the store's feed.
fn route_change(arrival: &ArrivalWaitLayer, change: DocumentChange) {
    if !change.id.is_chunk() {
        return;
    }
    if change.deleted {
        arrival.on_missing_chunk(&change.id);
        return;
    }
    match serde_json::from_value::<Chunk>(change.body) {
        Ok(chunk) if chunk.id == change.id => {
            arrival.on_chunk_arrived(chunk, false);
        }
        Ok(chunk) => {
            warn!(id = %change.id, carried = %chunk.id, "change carries a different chunk id");
            arrival.on_missing_chunk(&change.id);
        }
        Err(e) => {
            warn!(id = %change.id, error = %e, "ignoring malformed chunk on change feed");
            arrival.on_missing_chunk(&change.id);
        }
    }
}

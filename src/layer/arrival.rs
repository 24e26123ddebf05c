//! Waiting for chunks that are not local yet.
//!
//! The last read layer. Ids that reach it are registered as pending
//! arrivals; concurrent reads of the same id share one wait. New
//! registrations are announced once per read on the missing-chunk signal so
//! the replication collaborator can fetch them, and each wait resolves when
//! the chunk arrives, when it is confirmed missing, or when its timer fires.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt, Shared, join_all};
use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::{ChunkReadLayer, ReadNext, ReadOptions};
use crate::chunk::{Chunk, DocumentId};
use crate::error::Result;

const MISSING_SIGNAL_CAPACITY: usize = 256;

type Arrival = Shared<BoxFuture<'static, Option<Chunk>>>;

struct PendingArrival {
    seq: u64,
    resolve: oneshot::Sender<Option<Chunk>>,
    arrival: Arrival,
    timer: JoinHandle<()>,
}

impl PendingArrival {
    fn settle(self, chunk: Option<Chunk>) {
        self.timer.abort();
        let _ = self.resolve.send(chunk);
    }
}

#[derive(Default)]
struct Waiting {
    pending: HashMap<DocumentId, PendingArrival>,
    closed: bool,
}

/// Terminal read layer holding reads until their chunks arrive.
///
/// Every registration owns a timer task, so a wait expires on schedule even
/// when the reads sharing it have been cancelled.
pub struct ArrivalWaitLayer {
    waiting: Arc<Mutex<Waiting>>,
    missing: broadcast::Sender<Vec<DocumentId>>,
    sequence: AtomicU64,
}

impl ArrivalWaitLayer {
    /// Creates a layer with no pending arrivals.
    pub fn new() -> Self {
        let (missing, _) = broadcast::channel(MISSING_SIGNAL_CAPACITY);
        Self {
            waiting: Arc::new(Mutex::new(Waiting::default())),
            missing,
            sequence: AtomicU64::new(0),
        }
    }

    /// Subscribes to the "please fetch these ids" signal.
    pub fn subscribe_missing(&self) -> broadcast::Receiver<Vec<DocumentId>> {
        self.missing.subscribe()
    }

    /// Resolves the wait for `chunk.id`: to the chunk, or to `None` if it
    /// arrived already deleted. Returns false if nobody was waiting.
    pub fn on_chunk_arrived(&self, chunk: Chunk, deleted: bool) -> bool {
        let Some(pending) = self.waiting.lock().pending.remove(&chunk.id) else {
            return false;
        };
        trace!(id = %chunk.id, deleted, "chunk arrived");
        pending.settle((!deleted).then_some(chunk));
        true
    }

    /// Resolves the wait for `id` to `None`. Returns false if nobody was waiting.
    pub fn on_missing_chunk(&self, id: &DocumentId) -> bool {
        let Some(pending) = self.waiting.lock().pending.remove(id) else {
            return false;
        };
        trace!(id = %id, "chunk confirmed missing");
        pending.settle(None);
        true
    }

    /// Resolves every pending wait to `None`.
    pub fn clear_waiting(&self) {
        let drained: Vec<PendingArrival> = self
            .waiting
            .lock()
            .pending
            .drain()
            .map(|(_, p)| p)
            .collect();
        if !drained.is_empty() {
            debug!(count = drained.len(), "releasing pending arrivals");
        }
        for pending in drained {
            pending.settle(None);
        }
    }

    /// Returns the number of ids currently waited for.
    pub fn waiting_count(&self) -> usize {
        self.waiting.lock().pending.len()
    }

    /// Returns true once the layer has been torn down.
    pub fn is_closed(&self) -> bool {
        self.waiting.lock().closed
    }

    /// Registers a wait for `id` and starts its timer. Must run on a tokio runtime.
    fn register(&self, waiting: &mut Waiting, id: &DocumentId, timeout: Duration) -> Arrival {
        let (resolve, rx) = oneshot::channel();
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let arrival = async move { rx.await.ok().flatten() }.boxed().shared();
        let timer = tokio::spawn(expire(
            Arc::downgrade(&self.waiting),
            id.clone(),
            seq,
            timeout,
        ));
        waiting.pending.insert(
            id.clone(),
            PendingArrival {
                seq,
                resolve,
                arrival: arrival.clone(),
                timer,
            },
        );
        arrival
    }
}

async fn expire(waiting: Weak<Mutex<Waiting>>, id: DocumentId, seq: u64, timeout: Duration) {
    tokio::time::sleep(timeout).await;
    let Some(waiting) = waiting.upgrade() else {
        return;
    };
    let expired = {
        let mut waiting = waiting.lock();
        match waiting.pending.get(&id) {
            Some(pending) if pending.seq == seq => waiting.pending.remove(&id),
            _ => None,
        }
    };
    if let Some(pending) = expired {
        trace!(id = %id, "arrival wait timed out");
        // This task is the timer; resolve without aborting it.
        let _ = pending.resolve.send(None);
    }
}

impl Default for ArrivalWaitLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ArrivalWaitLayer {
    fn drop(&mut self) {
        self.clear_waiting();
    }
}

#[async_trait]
impl ChunkReadLayer for ArrivalWaitLayer {
    fn name(&self) -> &'static str {
        "arrival-wait"
    }

    async fn read(
        &self,
        ids: Vec<DocumentId>,
        options: ReadOptions,
        _next: ReadNext<'_>,
    ) -> Result<Vec<Option<Chunk>>> {
        if options.timeout.is_zero() || ids.is_empty() {
            return Ok(vec![None; ids.len()]);
        }

        let mut arrivals = Vec::with_capacity(ids.len());
        let mut fresh = Vec::new();
        {
            let mut waiting = self.waiting.lock();
            if waiting.closed {
                return Ok(vec![None; ids.len()]);
            }
            for id in &ids {
                if let Some(pending) = waiting.pending.get(id) {
                    arrivals.push(pending.arrival.clone());
                    continue;
                }
                arrivals.push(self.register(&mut waiting, id, options.timeout));
                fresh.push(id.clone());
            }
        }

        if !fresh.is_empty() && !options.prevent_remote_request {
            debug!(count = fresh.len(), "requesting missing chunks");
            // Nobody listening means nobody can fetch; the waits still time out.
            let _ = self.missing.send(fresh);
        }

        Ok(join_all(arrivals).await)
    }

    fn tear_down(&self) {
        self.waiting.lock().closed = true;
        self.clear_waiting();
    }
}

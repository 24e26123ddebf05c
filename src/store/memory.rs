//! In-memory document store for local development and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::trace;

use super::{DocumentChange, DocumentStore, GetOutcome, PutMode, PutOutcome, PutRequest, StoredDocument};
use crate::chunk::DocumentId;
use crate::error::Result;

const CHANGE_FEED_CAPACITY: usize = 1024;

struct Record {
    generation: u64,
    rev: String,
    body: Value,
    deleted: bool,
}

#[derive(Default)]
struct Inner {
    docs: HashMap<DocumentId, Record>,
    sequence: u64,
    failure: Option<FailurePlan>,
}

struct FailurePlan {
    healthy_calls: usize,
    reason: String,
}

impl Inner {
    /// Stores `body` under `id` and returns the new revision.
    fn commit(&mut self, id: &DocumentId, mut body: Value, deleted: bool) -> (String, Value) {
        self.sequence += 1;
        let generation = self.docs.get(id).map_or(0, |r| r.generation) + 1;
        let rev = format!("{generation}-{:08x}", self.sequence);
        if let Value::Object(map) = &mut body {
            map.insert("_id".to_string(), Value::String(id.to_string()));
        }
        self.docs.insert(
            id.clone(),
            Record {
                generation,
                rev: rev.clone(),
                body: body.clone(),
                deleted,
            },
        );
        (rev, body)
    }

    /// Consumes one healthy call from the failure plan, returning the
    /// failure reason once the plan is exhausted.
    fn injected_failure(&mut self) -> Option<String> {
        let plan = self.failure.as_mut()?;
        if plan.healthy_calls > 0 {
            plan.healthy_calls -= 1;
            None
        } else {
            Some(plan.reason.clone())
        }
    }
}

/// Revisioned in-memory [`DocumentStore`].
///
/// Every accepted write and deletion is broadcast on the change feed.
pub struct MemoryDocumentStore {
    inner: Mutex<Inner>,
    changes: broadcast::Sender<DocumentChange>,
}

impl MemoryDocumentStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            inner: Mutex::new(Inner::default()),
            changes,
        }
    }

    /// Returns the number of live documents.
    pub fn len(&self) -> usize {
        self.inner.lock().docs.values().filter(|r| !r.deleted).count()
    }

    /// Returns true if the store holds no live documents.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the body of a live document.
    pub fn document(&self, id: &DocumentId) -> Option<Value> {
        let inner = self.inner.lock();
        inner
            .docs
            .get(id)
            .filter(|r| !r.deleted)
            .map(|r| r.body.clone())
    }

    /// Writes `body` under `id` without any revision check or shape
    /// validation, and announces it on the change feed.
    pub fn insert_raw(&self, id: DocumentId, body: Value) -> String {
        let (rev, body) = self.inner.lock().commit(&id, body, false);
        self.announce(id, body, false);
        rev
    }

    /// Tombstones `id`. Returns false if no live document had that id.
    pub fn delete(&self, id: &DocumentId) -> bool {
        let mut inner = self.inner.lock();
        if !inner.docs.get(id).is_some_and(|r| !r.deleted) {
            return false;
        }
        inner.commit(id, Value::Object(Map::new()), true);
        drop(inner);
        self.announce(id.clone(), Value::Object(Map::new()), true);
        true
    }

    /// Makes every `bulk_put` after the next `healthy_calls` ones fail each
    /// item with `reason`.
    pub fn fail_puts_after(&self, healthy_calls: usize, reason: impl Into<String>) {
        self.inner.lock().failure = Some(FailurePlan {
            healthy_calls,
            reason: reason.into(),
        });
    }

    /// Cancels a failure plan installed by [`fail_puts_after`](Self::fail_puts_after).
    pub fn clear_failures(&self) {
        self.inner.lock().failure = None;
    }

    fn announce(&self, id: DocumentId, body: Value, deleted: bool) {
        trace!(id = %id, deleted, "change feed event");
        // No subscribers is fine.
        let _ = self.changes.send(DocumentChange { id, body, deleted });
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn bulk_get(&self, ids: &[DocumentId]) -> Result<Vec<GetOutcome>> {
        let inner = self.inner.lock();
        Ok(ids
            .iter()
            .map(|id| match inner.docs.get(id) {
                Some(record) if !record.deleted => GetOutcome::Found(StoredDocument {
                    rev: record.rev.clone(),
                    body: record.body.clone(),
                }),
                _ => GetOutcome::NotFound,
            })
            .collect())
    }

    async fn bulk_put(&self, docs: Vec<PutRequest>, mode: PutMode) -> Result<Vec<PutOutcome>> {
        let mut inner = self.inner.lock();
        if let Some(reason) = inner.injected_failure() {
            return Ok(docs.iter().map(|_| PutOutcome::Error(reason.clone())).collect());
        }

        let mut outcomes = Vec::with_capacity(docs.len());
        let mut accepted = Vec::new();
        for doc in docs {
            let current = inner
                .docs
                .get(&doc.id)
                .map(|r| (r.rev.clone(), r.deleted));
            let allowed = match (mode, current) {
                (PutMode::Force, _) => true,
                (PutMode::CreateOrMatch, None) => doc.base_rev.is_none(),
                (PutMode::CreateOrMatch, Some((_, true))) => doc.base_rev.is_none(),
                (PutMode::CreateOrMatch, Some((rev, false))) => doc.base_rev.as_ref() == Some(&rev),
            };
            if !allowed {
                outcomes.push(PutOutcome::Conflict);
                continue;
            }
            let (rev, body) = inner.commit(&doc.id, doc.body, false);
            outcomes.push(PutOutcome::Ok { rev });
            accepted.push((doc.id, body));
        }
        drop(inner);

        for (id, body) in accepted {
            self.announce(id, body, false);
        }
        Ok(outcomes)
    }

    fn subscribe(&self) -> broadcast::Receiver<DocumentChange> {
        self.changes.subscribe()
    }
}

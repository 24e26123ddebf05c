//! Document-store read and write layers.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error};

use super::{
    ChunkReadLayer, ChunkWriteLayer, ReadNext, ReadOptions, WriteNext, WriteOptions, WriteResult,
    fill_missing,
};
use crate::chunk::{Chunk, DocumentId};
use crate::error::{Result, StoreError};
use crate::store::{DocumentStore, GetOutcome, PutMode, PutOutcome, PutRequest};

/// Decodes a stored body as a chunk, treating any mismatch as corruption.
fn decode_chunk(id: &DocumentId, body: Value) -> Result<Chunk> {
    let chunk: Chunk = serde_json::from_value(body).map_err(|e| StoreError::Corrupted {
        id: id.clone(),
        reason: e.to_string(),
    })?;
    if chunk.id != *id {
        return Err(StoreError::Corrupted {
            id: id.clone(),
            reason: format!("document carries id {}", chunk.id),
        });
    }
    Ok(chunk)
}

fn check_len(what: &str, got: usize, expected: usize) -> Result<()> {
    if got == expected {
        Ok(())
    } else {
        Err(StoreError::Store(format!(
            "{what} returned {got} outcomes for {expected} documents"
        )))
    }
}

/// Reads chunks from the document store.
///
/// Absent ids go to the next layer. A document of the wrong shape, or a
/// per-item store error, fails the whole read.
#[derive(Clone)]
pub struct StoreReadLayer {
    store: Arc<dyn DocumentStore>,
}

impl StoreReadLayer {
    /// Creates a read layer over `store`.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ChunkReadLayer for StoreReadLayer {
    fn name(&self) -> &'static str {
        "database"
    }

    async fn read(
        &self,
        ids: Vec<DocumentId>,
        options: ReadOptions,
        next: ReadNext<'_>,
    ) -> Result<Vec<Option<Chunk>>> {
        let outcomes = self.store.bulk_get(&ids).await?;
        check_len("bulk_get", outcomes.len(), ids.len())?;

        let mut results = vec![None; ids.len()];
        let mut missing = Vec::new();
        let mut rest = Vec::new();
        for (slot, (id, outcome)) in ids.into_iter().zip(outcomes).enumerate() {
            match outcome {
                GetOutcome::Found(doc) => match decode_chunk(&id, doc.body) {
                    Ok(chunk) => results[slot] = Some(chunk),
                    Err(e) => {
                        error!(id = %id, error = %e, "corrupted chunk document");
                        return Err(e);
                    }
                },
                GetOutcome::NotFound => {
                    missing.push(slot);
                    rest.push(id);
                }
                GetOutcome::Error(reason) => {
                    error!(id = %id, reason = %reason, "store failed to read chunk");
                    return Err(StoreError::Store(format!("{id}: {reason}")));
                }
            }
        }
        debug!(
            found = results.len() - missing.len(),
            missing = missing.len(),
            "database read"
        );

        let fetched = next.read(rest, options).await?;
        fill_missing(&mut results, &missing, fetched);
        Ok(results)
    }
}

/// Persists chunks to the document store.
///
/// "Already exists" is the normal outcome of deduplication and is counted as
/// `duplicated` once the stored payload is confirmed equal to the new one.
#[derive(Clone)]
pub struct StoreWriteLayer {
    store: Arc<dyn DocumentStore>,
}

impl StoreWriteLayer {
    /// Creates a write layer over `store`.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Confirms every conflicting chunk is stored with identical content.
    async fn verify_duplicates(&self, conflicts: &[&Chunk]) -> Result<()> {
        let ids: Vec<DocumentId> = conflicts.iter().map(|c| c.id.clone()).collect();
        let outcomes = self.store.bulk_get(&ids).await?;
        check_len("bulk_get", outcomes.len(), ids.len())?;

        let mut failures = Vec::new();
        for (chunk, outcome) in conflicts.iter().zip(outcomes) {
            match outcome {
                GetOutcome::Found(doc) => {
                    let stored = decode_chunk(&chunk.id, doc.body)?;
                    if stored.data != chunk.data {
                        error!(
                            id = %chunk.id,
                            stored_len = stored.len(),
                            new_len = chunk.len(),
                            "hash collision: stored chunk differs from new content"
                        );
                        return Err(StoreError::HashCollision {
                            id: chunk.id.clone(),
                        });
                    }
                }
                GetOutcome::NotFound => failures.push((
                    chunk.id.clone(),
                    "conflict reported but document is missing".to_string(),
                )),
                GetOutcome::Error(reason) => failures.push((chunk.id.clone(), reason)),
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(StoreError::WriteFailure { failures })
        }
    }
}

#[async_trait]
impl ChunkWriteLayer for StoreWriteLayer {
    fn name(&self) -> &'static str {
        "database"
    }

    async fn write(
        &self,
        chunks: Vec<Chunk>,
        options: WriteOptions,
        next: WriteNext<'_>,
    ) -> Result<WriteResult> {
        if chunks.is_empty() {
            return next.write(chunks, options).await;
        }

        let requests = chunks
            .iter()
            .map(|chunk| -> Result<PutRequest> {
                Ok(PutRequest::create(chunk.id.clone(), serde_json::to_value(chunk)?))
            })
            .collect::<Result<Vec<_>>>()?;
        let mode = if options.force {
            PutMode::Force
        } else {
            PutMode::CreateOrMatch
        };
        let outcomes = self.store.bulk_put(requests, mode).await?;
        check_len("bulk_put", outcomes.len(), chunks.len())?;

        let mut written = 0;
        let mut conflicts = Vec::new();
        let mut failures = Vec::new();
        for (chunk, outcome) in chunks.iter().zip(outcomes) {
            match outcome {
                PutOutcome::Ok { .. } => written += 1,
                PutOutcome::Conflict => conflicts.push(chunk),
                PutOutcome::Error(reason) => failures.push((chunk.id.clone(), reason)),
            }
        }
        if !failures.is_empty() {
            error!(
                failed = failures.len(),
                submitted = chunks.len(),
                "chunk write failed"
            );
            return Err(StoreError::WriteFailure { failures });
        }
        if !conflicts.is_empty() {
            self.verify_duplicates(&conflicts).await?;
        }
        let duplicated = conflicts.len();
        debug!(written, duplicated, "database write");

        let mut result = next.write(chunks, options).await?;
        result.written += written;
        result.duplicated += duplicated;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryDocumentStore;
    use serde_json::json;

    fn chunk(id: &str, data: &str) -> Chunk {
        Chunk::new(DocumentId::new(id), data)
    }

    #[tokio::test]
    async fn test_write_accounting() {
        let store = Arc::new(MemoryDocumentStore::new());
        let layers: Vec<Arc<dyn ChunkWriteLayer>> = vec![Arc::new(StoreWriteLayer::new(store.clone()))];

        let first = WriteNext::new(&layers)
            .write(vec![chunk("h:a", "A"), chunk("h:b", "B")], WriteOptions::default())
            .await
            .unwrap();
        assert_eq!((first.written, first.duplicated), (2, 0));

        let second = WriteNext::new(&layers)
            .write(
                vec![chunk("h:a", "A"), chunk("h:b", "B"), chunk("h:c", "C")],
                WriteOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!((second.written, second.duplicated), (1, 2));
        assert_eq!(second.written + second.duplicated, 3);
        assert!(second.success);
    }

    #[tokio::test]
    async fn test_conflict_with_different_content_is_a_collision() {
        let store = Arc::new(MemoryDocumentStore::new());
        store.insert_raw(DocumentId::new("h:a"), json!({"_id": "h:a", "data": "old", "type": "leaf"}));
        let layers: Vec<Arc<dyn ChunkWriteLayer>> = vec![Arc::new(StoreWriteLayer::new(store))];

        let err = WriteNext::new(&layers)
            .write(vec![chunk("h:a", "new")], WriteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::HashCollision { .. }));
    }

    #[tokio::test]
    async fn test_item_failure_aborts_with_every_id() {
        let store = Arc::new(MemoryDocumentStore::new());
        store.fail_puts_after(0, "quota exceeded");
        let layers: Vec<Arc<dyn ChunkWriteLayer>> = vec![Arc::new(StoreWriteLayer::new(store))];

        let err = WriteNext::new(&layers)
            .write(vec![chunk("h:a", "A"), chunk("h:b", "B")], WriteOptions::default())
            .await
            .unwrap_err();
        match err {
            StoreError::WriteFailure { failures } => assert_eq!(failures.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_force_overwrites() {
        let store = Arc::new(MemoryDocumentStore::new());
        store.insert_raw(DocumentId::new("h:a"), json!({"_id": "h:a", "data": "old", "type": "leaf"}));
        let layers: Vec<Arc<dyn ChunkWriteLayer>> = vec![Arc::new(StoreWriteLayer::new(store.clone()))];

        let result = WriteNext::new(&layers)
            .write(vec![chunk("h:a", "fixed")], WriteOptions { force: true })
            .await
            .unwrap();
        assert_eq!(result.written, 1);
        assert_eq!(store.document(&DocumentId::new("h:a")).unwrap()["data"], "fixed");
    }

    #[tokio::test]
    async fn test_read_found_missing_and_corrupted() {
        let store = Arc::new(MemoryDocumentStore::new());
        store.insert_raw(DocumentId::new("h:a"), json!({"_id": "h:a", "data": "A", "type": "leaf"}));
        store.insert_raw(DocumentId::new("h:bad"), json!({"_id": "h:bad", "type": "plain"}));
        let layers: Vec<Arc<dyn ChunkReadLayer>> = vec![Arc::new(StoreReadLayer::new(store))];

        let out = ReadNext::new(&layers)
            .read(
                vec![DocumentId::new("h:missing"), DocumentId::new("h:a")],
                ReadOptions::default(),
            )
            .await
            .unwrap();
        assert!(out[0].is_none());
        assert_eq!(out[1].as_ref().unwrap().data(), "A");

        let err = ReadNext::new(&layers)
            .read(vec![DocumentId::new("h:bad")], ReadOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Corrupted { .. }));
    }
}

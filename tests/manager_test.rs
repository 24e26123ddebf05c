// Integration tests for the chunk manager pipelines
// Tests cover: layer ordering, LRU bounds, arrival waits, deduplication,
// stabilisation, corruption and collision handling, teardown

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use leafstore::{
    Chunk, ChunkManager, DocumentId, MemoryDocumentStore, ReadOptions, StoreConfig, StoreError,
    WriteOptions,
};
use serde_json::json;
use tokio::time::Instant;

// ============================================================================
// Helpers
// ============================================================================

fn setup(config: StoreConfig) -> (Arc<MemoryDocumentStore>, Arc<ChunkManager>) {
    let store = Arc::new(MemoryDocumentStore::new());
    let manager = ChunkManager::builder(config, store.clone()).build().unwrap();
    (store, manager)
}

fn id(s: &str) -> DocumentId {
    DocumentId::new(s)
}

fn chunk(key: &str, data: &str) -> Chunk {
    Chunk::new(id(key), data)
}

fn origin() -> DocumentId {
    DocumentId::for_path("test.md")
}

fn waiting(ms: u64) -> ReadOptions {
    ReadOptions::default().with_timeout(Duration::from_millis(ms))
}

async fn until_waiting(manager: &ChunkManager, count: usize) {
    while manager.waiting_count() < count {
        tokio::task::yield_now().await;
    }
}

// ============================================================================
// Read Pipeline
// ============================================================================

#[tokio::test]
async fn test_read_order_across_layers() {
    let (store, manager) = setup(StoreConfig::default());

    // c: cache (and store), a: store only, b: delivered by replication
    manager
        .write(vec![chunk("h:c", "C")], WriteOptions::default(), &origin())
        .await
        .unwrap();
    store.insert_raw(id("h:a"), serde_json::to_value(chunk("h:a", "A")).unwrap());

    let reader = {
        let manager = manager.clone();
        tokio::spawn(async move {
            manager
                .read(vec![id("h:c"), id("h:a"), id("h:b")], waiting(5_000))
                .await
        })
    };
    until_waiting(&manager, 1).await;
    assert!(manager.on_chunk_arrived(chunk("h:b", "B"), false));

    let out = reader.await.unwrap().unwrap();
    let data: Vec<&str> = out.iter().map(|c| c.as_ref().unwrap().data()).collect();
    assert_eq!(data, ["C", "A", "B"]);
    assert_eq!(manager.cache_stats().hits, 1, "only c should hit the cache");
    assert!(manager.is_cached(&id("h:a")), "store reads warm the cache");
    assert!(manager.is_cached(&id("h:b")), "arrivals warm the cache");
}

#[tokio::test]
async fn test_cache_is_bounded_lru() {
    let (_store, manager) = setup(StoreConfig::default().with_max_cache_size(3));
    for n in 0..3 {
        let key = format!("h:{n}");
        manager
            .write(vec![chunk(&key, &key)], WriteOptions::default(), &origin())
            .await
            .unwrap();
    }
    // Touch h:0 so h:1 becomes least recent.
    manager.read(vec![id("h:0")], ReadOptions::default()).await.unwrap();
    manager
        .write(vec![chunk("h:3", "h:3")], WriteOptions::default(), &origin())
        .await
        .unwrap();

    assert!(manager.is_cached(&id("h:0")));
    assert!(!manager.is_cached(&id("h:1")));
    let stats = manager.cache_stats();
    assert_eq!(stats.resident, 3);
    assert_eq!(stats.evictions, 1);

    // Evicted chunks are still served by the store.
    let out = manager.read(vec![id("h:1")], ReadOptions::default()).await.unwrap();
    assert_eq!(out[0].as_ref().unwrap().data(), "h:1");
}

#[tokio::test]
async fn test_skip_cache_reads_store() {
    let (store, manager) = setup(StoreConfig::default());
    store.insert_raw(id("h:a"), serde_json::to_value(chunk("h:a", "A")).unwrap());

    let options = ReadOptions::default().with_skip_cache(true);
    let out = manager.read(vec![id("h:a")], options).await.unwrap();
    assert_eq!(out[0].as_ref().unwrap().data(), "A");
    assert!(!manager.is_cached(&id("h:a")));
}

// ============================================================================
// Arrival Waits
// ============================================================================

#[tokio::test]
async fn test_zero_timeout_does_not_wait() {
    let (_store, manager) = setup(StoreConfig::default());
    let mut missing = manager.missing_chunks();

    let out = manager.read(vec![id("h:x")], ReadOptions::default()).await.unwrap();
    assert_eq!(out, vec![None]);
    assert!(missing.try_recv().is_err(), "no fetch signal without a wait");
}

#[tokio::test(start_paused = true)]
async fn test_arrival_timeout_window() {
    let (_store, manager) = setup(StoreConfig::default());
    let start = Instant::now();
    let out = manager.read(vec![id("h:x")], waiting(100)).await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(out, vec![None]);
    assert!(elapsed >= Duration::from_millis(100), "resolved early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(200), "resolved late: {elapsed:?}");
    assert_eq!(manager.waiting_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_early_arrival_resolves_before_timeout() {
    let (_store, manager) = setup(StoreConfig::default());
    let start = Instant::now();
    let reader = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.read(vec![id("h:x")], waiting(10_000)).await })
    };
    until_waiting(&manager, 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    manager.on_chunk_arrived(chunk("h:x", "X"), false);

    let out = reader.await.unwrap().unwrap();
    assert_eq!(out[0].as_ref().unwrap().data(), "X");
    assert!(start.elapsed() < Duration::from_millis(1_000));
}

#[tokio::test]
async fn test_concurrent_reads_share_one_fetch_signal() {
    let (_store, manager) = setup(StoreConfig::default());
    let mut missing = manager.missing_chunks();

    let read = |manager: Arc<ChunkManager>| {
        tokio::spawn(async move { manager.read(vec![id("h:x")], waiting(5_000)).await })
    };
    let first = read(manager.clone());
    until_waiting(&manager, 1).await;
    let second = read(manager.clone());
    // Let the second read join the existing wait.
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(manager.waiting_count(), 1);

    assert_eq!(missing.recv().await.unwrap(), vec![id("h:x")]);
    manager.on_chunk_arrived(chunk("h:x", "X"), false);

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();
    assert_eq!(first, second);
    assert!(missing.try_recv().is_err(), "second read must not signal again");
}

#[tokio::test]
async fn test_prevent_remote_request() {
    let (_store, manager) = setup(StoreConfig::default());
    let mut missing = manager.missing_chunks();
    let options = waiting(20).with_prevent_remote_request(true);

    let out = manager.read(vec![id("h:x")], options).await.unwrap();
    assert_eq!(out, vec![None]);
    assert!(missing.try_recv().is_err());
}

#[tokio::test]
async fn test_confirmed_missing_resolves_none() {
    let (_store, manager) = setup(StoreConfig::default());
    let reader = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.read(vec![id("h:x")], waiting(5_000)).await })
    };
    until_waiting(&manager, 1).await;
    assert!(manager.on_missing_chunk(&id("h:x")));
    assert_eq!(reader.await.unwrap().unwrap(), vec![None]);
}

#[tokio::test]
async fn test_change_feed_delivers_arrival() {
    let (store, manager) = setup(StoreConfig::default());
    let reader = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.read(vec![id("h:x")], waiting(5_000)).await })
    };
    until_waiting(&manager, 1).await;
    store.insert_raw(id("h:x"), json!({"type": "leaf", "data": "replicated"}));

    let out = reader.await.unwrap().unwrap();
    assert_eq!(out[0].as_ref().unwrap().data(), "replicated");
    assert_eq!(manager.waiting_count(), 0);
}

// ============================================================================
// Write Pipeline
// ============================================================================

#[tokio::test]
async fn test_duplicate_write_is_counted_not_failed() {
    let (_store, manager) = setup(StoreConfig::default());
    let first = manager
        .write(vec![chunk("h:a", "A")], WriteOptions::default(), &origin())
        .await
        .unwrap();
    assert_eq!((first.written, first.duplicated, first.cached), (1, 0, 0));

    let second = manager
        .write(vec![chunk("h:a", "A")], WriteOptions::default(), &origin())
        .await
        .unwrap();
    assert!(second.success);
    assert_eq!((second.written, second.duplicated, second.cached), (0, 1, 1));
}

#[tokio::test]
async fn test_duplicate_from_other_device_warms_cache() {
    let store = Arc::new(MemoryDocumentStore::new());
    let device = ChunkManager::builder(StoreConfig::default(), store.clone())
        .build()
        .unwrap();
    store.insert_raw(id("h:a"), serde_json::to_value(chunk("h:a", "A")).unwrap());

    let result = device
        .write(vec![chunk("h:a", "A")], WriteOptions::default(), &origin())
        .await
        .unwrap();
    assert_eq!(result.duplicated, 1);
    assert!(device.is_cached(&id("h:a")));
}

#[tokio::test]
async fn test_failed_write_caches_nothing() {
    let (store, manager) = setup(StoreConfig::default());
    store.fail_puts_after(0, "disk full");

    let err = manager
        .write(vec![chunk("h:a", "A")], WriteOptions::default(), &origin())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::WriteFailure { .. }));
    assert!(!manager.is_cached(&id("h:a")), "unpersisted chunk was cached");
}

#[tokio::test]
async fn test_hash_collision_is_fatal() {
    let (store, manager) = setup(StoreConfig::default());
    store.insert_raw(id("h:a"), json!({"type": "leaf", "data": "original"}));

    let err = manager
        .write(vec![chunk("h:a", "different")], WriteOptions::default(), &origin())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::HashCollision { .. }));
    assert!(!manager.is_cached(&id("h:a")));
}

#[tokio::test]
async fn test_corrupted_chunk_is_not_missing() {
    let (store, manager) = setup(StoreConfig::default());
    store.insert_raw(id("h:bad"), json!({"type": "plain", "path": "x.md"}));

    let err = manager
        .read(vec![id("h:bad")], waiting(5_000))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Corrupted { .. }));
    assert_eq!(manager.waiting_count(), 0);
}

// ============================================================================
// Transactions and Lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_stabilizes_once_per_idle_transition() {
    let runs = Arc::new(AtomicUsize::new(0));
    let store = Arc::new(MemoryDocumentStore::new());
    let manager = {
        let runs = runs.clone();
        ChunkManager::builder(StoreConfig::default(), store)
            .stabilizer(move || {
                let runs = runs.clone();
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                }
            })
            .build()
            .unwrap()
    };

    let work = |ms: u64| {
        let manager = manager.clone();
        let runs = runs.clone();
        async move {
            manager
                .transaction(async {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    assert_eq!(runs.load(Ordering::SeqCst), 0, "stabilized mid-burst");
                    Ok(ms)
                })
                .await
        }
    };
    let (a, b, c) = tokio::join!(work(5), work(10), work(15));
    assert_eq!((a.unwrap(), b.unwrap(), c.unwrap()), (5, 10, 15));
    manager.stabilised().await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    manager.transaction(async { Ok(()) }).await.unwrap();
    manager.stabilised().await;
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(manager.active_transactions(), 0);
}

#[tokio::test]
async fn test_transaction_error_still_stabilizes() {
    let (_store, manager) = setup(StoreConfig::default());
    let result: Result<(), StoreError> = manager
        .transaction(async { Err(StoreError::Store("boom".to_string())) })
        .await;
    assert!(result.is_err());
    manager.stabilised().await;
    assert_eq!(manager.stabilization_count(), 1);
}

#[tokio::test]
async fn test_destroy_releases_waiters_and_is_idempotent() {
    let (_store, manager) = setup(StoreConfig::default());
    manager
        .write(vec![chunk("h:a", "A")], WriteOptions::default(), &origin())
        .await
        .unwrap();
    let reader = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.read(vec![id("h:x")], waiting(60_000)).await })
    };
    until_waiting(&manager, 1).await;

    manager.destroy();
    manager.destroy();
    assert!(manager.is_destroyed());
    assert_eq!(reader.await.unwrap().unwrap(), vec![None]);
    assert_eq!(manager.cache_stats().resident, 0);

    let err = manager
        .write(vec![chunk("h:b", "B")], WriteOptions::default(), &origin())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Destroyed));
    let err = manager.transaction(async { Ok(()) }).await.unwrap_err();
    assert!(matches!(err, StoreError::Destroyed));
}

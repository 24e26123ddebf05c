//! Per-key FIFO serialisation.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Serialises async work per key; different keys never wait on each other.
///
/// Waiters on one key are served in arrival order. Slots are removed once
/// nobody holds or waits for them.
#[derive(Default)]
pub(crate) struct KeyedQueue {
    slots: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `key`.
    pub(crate) async fn lock(&self, key: &str) -> KeyedGuard<'_> {
        let slot = self.slots.lock().entry(key.to_owned()).or_default().clone();
        let guard = slot.lock_owned().await;
        KeyedGuard {
            queue: self,
            key: key.to_owned(),
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.slots.lock().len()
    }
}

pub(crate) struct KeyedGuard<'a> {
    queue: &'a KeyedQueue,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyedGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut slots = self.queue.slots.lock();
        // Only the table still references an idle slot.
        if slots.get(&self.key).is_some_and(|s| Arc::strong_count(s) == 1) {
            slots.remove(&self.key);
        }
    }
}

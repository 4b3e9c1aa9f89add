//! Coalescing writes to the key-value store
//!
//! Usage counters change on every completed request. Writing each change
//! straight through would hammer the store, so mutations only *schedule* a
//! write: the first one arms a timer, later ones replace the pending
//! snapshot, and when the timer fires the latest snapshot is written once.
//! The window is fixed at arming time and is never extended.

use byteguard_core::error::Result;
use byteguard_core::store::{KeyValueStore, StoreMap};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default coalescing window
pub const DEFAULT_WRITE_WINDOW: Duration = Duration::from_secs(2);

#[derive(Default)]
struct Pending {
    value: Option<Value>,
    armed: bool,
}

struct Shared {
    store: Arc<dyn KeyValueStore>,
    key: &'static str,
    pending: Mutex<Pending>,
    // Held from taking a snapshot until its write lands, so writes keep order
    write_lock: tokio::sync::Mutex<()>,
}

impl Shared {
    fn lock(&self) -> std::sync::MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take(&self) -> Option<Value> {
        let mut pending = self.lock();
        pending.armed = false;
        pending.value.take()
    }

    async fn write(&self, value: Value) -> Result<()> {
        let mut items = StoreMap::new();
        items.insert(self.key.to_string(), value);
        self.store.set(items).await
    }

    /// Take the pending snapshot and write it, after any write in flight
    async fn write_pending(&self) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        match self.take() {
            Some(value) => self.write(value).await.map(|()| true),
            None => Ok(false),
        }
    }
}

/// Debounced writer for a single store key
///
/// Timer tasks are spawned on the current tokio runtime and stop when the
/// writer's [`CancellationToken`] is cancelled. A pending snapshot that was
/// never flushed is lost on cancellation.
pub struct CoalescingWriter {
    shared: Arc<Shared>,
    window: Duration,
    cancel: CancellationToken,
}

impl CoalescingWriter {
    /// Create a writer for `key` with the default window
    pub fn new(store: Arc<dyn KeyValueStore>, key: &'static str) -> Self {
        Self::with_window(store, key, DEFAULT_WRITE_WINDOW)
    }

    /// Create a writer with a custom window
    pub fn with_window(store: Arc<dyn KeyValueStore>, key: &'static str, window: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                key,
                pending: Mutex::new(Pending::default()),
                write_lock: tokio::sync::Mutex::new(()),
            }),
            window,
            cancel: CancellationToken::new(),
        }
    }

    /// Store key this writer owns
    pub fn key(&self) -> &'static str {
        self.shared.key
    }

    /// Whether a snapshot is waiting to be written
    pub fn has_pending(&self) -> bool {
        self.shared.lock().value.is_some()
    }

    /// Replace the pending snapshot and arm the timer if it is not running
    pub fn schedule<T: Serialize>(&self, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;

        let mut pending = self.shared.lock();
        pending.value = Some(value);
        if pending.armed || self.cancel.is_cancelled() {
            return Ok(());
        }
        pending.armed = true;
        drop(pending);

        let shared = Arc::clone(&self.shared);
        let cancel = self.cancel.clone();
        let window = self.window;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(window) => {}
                _ = cancel.cancelled() => {
                    debug!(key = shared.key, "Write timer cancelled");
                    return;
                }
            }

            match shared.write_pending().await {
                Ok(true) => debug!(key = shared.key, "Wrote coalesced snapshot"),
                Ok(false) => {}
                Err(e) => warn!(key = shared.key, "Failed to persist snapshot: {}", e),
            }
        });
        Ok(())
    }

    /// Write the pending snapshot now, if there is one
    ///
    /// A timer write already in flight lands first, so the store never ends
    /// up with an older snapshot than the one flushed.
    pub async fn flush(&self) -> Result<()> {
        self.shared.write_pending().await.map(|_| ())
    }

    /// Stop the timer; anything still pending is dropped
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Token that stops this writer's timer tasks
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for CoalescingWriter {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use byteguard_core::store::{KeyValueStoreExt, MemoryStore};
    use serde_json::json;
    use std::collections::VecDeque;

    /// Store whose writes take a scripted amount of time
    struct SlowStore {
        inner: MemoryStore,
        delays: Mutex<VecDeque<Duration>>,
    }

    #[async_trait]
    impl KeyValueStore for SlowStore {
        async fn get(&self, keys: &[&str]) -> Result<StoreMap> {
            self.inner.get(keys).await
        }

        async fn set(&self, items: StoreMap) -> Result<()> {
            let delay = self
                .delays
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front()
                .unwrap_or_default();
            tokio::time::sleep(delay).await;
            self.inner.set(items).await
        }

        async fn clear(&self) -> Result<()> {
            self.inner.clear().await
        }
    }

    fn writer(store: &Arc<MemoryStore>) -> CoalescingWriter {
        CoalescingWriter::new(store.clone(), "usage")
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_produces_single_write() {
        let store = Arc::new(MemoryStore::new());
        let writer = writer(&store);

        for n in 1..=50u64 {
            writer.schedule(&json!({"totalToday": n})).unwrap();
        }
        assert_eq!(store.write_count(), 0);

        tokio::time::sleep(Duration::from_millis(2100)).await;

        assert_eq!(store.write_count(), 1);
        let stored: Value = store.get_value("usage").await.unwrap().unwrap();
        assert_eq!(stored["totalToday"], 50);
        assert!(!writer.has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_is_not_extended() {
        let store = Arc::new(MemoryStore::new());
        let writer = writer(&store);

        writer.schedule(&1u32).unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        writer.schedule(&2u32).unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;

        // 2.1s after the first mutation, one write with the latest value
        assert_eq!(store.write_count(), 1);
        assert_eq!(store.get_value::<u32>("usage").await.unwrap(), Some(2));

        // A later mutation arms a new window
        writer.schedule(&3u32).unwrap();
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(store.write_count(), 2);
        assert_eq!(store.get_value::<u32>("usage").await.unwrap(), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_writes_immediately() {
        let store = Arc::new(MemoryStore::new());
        let writer = writer(&store);

        writer.schedule(&7u32).unwrap();
        writer.flush().await.unwrap();
        assert_eq!(store.write_count(), 1);

        // The armed timer finds nothing left to write
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(store.write_count(), 1);

        // Flushing with nothing pending is a no-op
        writer.flush().await.unwrap();
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drops_pending_write() {
        let store = Arc::new(MemoryStore::new());
        let writer = writer(&store);

        writer.schedule(&1u32).unwrap();
        writer.shutdown();
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(store.write_count(), 0);
        assert!(writer.cancellation_token().is_cancelled());
        assert!(writer.has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_write_is_logged_not_fatal() {
        let store = Arc::new(MemoryStore::new());
        let writer = writer(&store);
        store.set_fail_writes(true);

        writer.schedule(&1u32).unwrap();
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(store.write_count(), 0);

        store.set_fail_writes(false);
        writer.schedule(&2u32).unwrap();
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(store.get_value::<u32>("usage").await.unwrap(), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_lands_after_timer_write_in_flight() {
        let store = Arc::new(SlowStore {
            inner: MemoryStore::new(),
            delays: Mutex::new(VecDeque::from([Duration::from_secs(1)])),
        });
        let writer = CoalescingWriter::new(store.clone(), "usage");

        writer.schedule(&1u32).unwrap();
        // The timer has taken the first snapshot and is still writing it
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(store.inner.write_count(), 0);

        writer.schedule(&2u32).unwrap();
        writer.flush().await.unwrap();
        writer.shutdown();

        assert_eq!(store.inner.write_count(), 2);
        assert_eq!(store.inner.get_value::<u32>("usage").await.unwrap(), Some(2));
    }
}

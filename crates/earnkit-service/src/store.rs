//! Keyed reactive stores.
//!
//! Every mutation flows through an update queue drained by a single
//! arbiter task: many concurrent producers, one writer. The arbiter
//! coalesces bursts on a soft debounce delay but always flushes within a
//! hard ceiling, so persisted state has bounded staleness. Flushed
//! batches are broadcast to subscribers and handed to the persistence
//! sink.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use earnkit_core::position_key;
use earnkit_core::types::{YieldPoolInfo, YieldPositionInfo};

/// A value storable in a [`KeyedStore`].
pub trait StoreItem: Clone + Send + Sync + 'static {
    fn store_key(&self) -> String;

    /// Whether this update may replace an existing entry. Updates from
    /// different handlers arrive in no particular order, so this must
    /// make writes commutative per key.
    fn should_replace(&self, existing: &Self) -> bool {
        let _ = existing;
        true
    }
}

impl StoreItem for YieldPoolInfo {
    fn store_key(&self) -> String {
        self.slug.clone()
    }

    /// Last-write-wins by `last_updated`, not by arrival order.
    fn should_replace(&self, existing: &Self) -> bool {
        self.last_updated > existing.last_updated
    }
}

impl StoreItem for YieldPositionInfo {
    fn store_key(&self) -> String {
        position_key(&self.slug, &self.address)
    }
}

/// Receives every flushed batch, for persistence.
pub trait StoreSink<V>: Send + Sync {
    fn flush(&self, batch: Vec<V>);
}

/// Debounce configuration for the arbiter.
#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    /// Quiet period that closes a batch.
    pub soft_delay: Duration,
    /// Maximum age of the oldest queued update before a forced flush.
    pub hard_ceiling: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            soft_delay: Duration::from_millis(300),
            hard_ceiling: Duration::from_secs(2),
        }
    }
}

pub struct KeyedStore<V: StoreItem> {
    inner: Arc<RwLock<HashMap<String, V>>>,
    update_tx: mpsc::UnboundedSender<V>,
    changed_tx: broadcast::Sender<Vec<V>>,
    token: CancellationToken,
}

impl<V: StoreItem> KeyedStore<V> {
    pub fn new(config: StoreConfig, sink: Option<Arc<dyn StoreSink<V>>>) -> Self {
        let inner: Arc<RwLock<HashMap<String, V>>> = Arc::new(RwLock::new(HashMap::new()));
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let (changed_tx, _) = broadcast::channel(64);
        let token = CancellationToken::new();

        tokio::spawn(run_arbiter(
            config,
            inner.clone(),
            update_rx,
            changed_tx.clone(),
            sink,
            token.clone(),
        ));

        Self {
            inner,
            update_tx,
            changed_tx,
            token,
        }
    }

    /// Queue one update. Returns whether the arbiter is still accepting.
    pub fn push(&self, item: V) -> bool {
        self.update_tx.send(item).is_ok()
    }

    /// A sender feeding this store's queue, for subscription fan-out.
    pub fn update_sender(&self) -> mpsc::UnboundedSender<V> {
        self.update_tx.clone()
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.inner.read().expect("store lock").get(key).cloned()
    }

    pub fn snapshot(&self) -> Vec<V> {
        self.inner.read().expect("store lock").values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("store lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribe to flushed batches.
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<V>> {
        self.changed_tx.subscribe()
    }

    /// Preload entries (from the persisted cache) without broadcasting
    /// or re-persisting them.
    pub fn hydrate(&self, items: Vec<V>) {
        let mut map = self.inner.write().expect("store lock");
        for item in items {
            map.entry(item.store_key()).or_insert(item);
        }
    }

    /// Remove entries matching a predicate. Used for account removal
    /// and chain disabling; bypasses the queue since removals must not
    /// lose a race against buffered stale updates.
    pub fn remove_where<F: Fn(&V) -> bool>(&self, predicate: F) -> usize {
        let mut map = self.inner.write().expect("store lock");
        let before = map.len();
        map.retain(|_, v| !predicate(v));
        before - map.len()
    }

    /// Drop everything (full reset).
    pub fn clear(&self) {
        self.inner.write().expect("store lock").clear();
    }

    /// Stop the arbiter. Queued updates are dropped.
    pub fn shutdown(&self) {
        self.token.cancel();
    }
}

impl<V: StoreItem> Drop for KeyedStore<V> {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn run_arbiter<V: StoreItem>(
    config: StoreConfig,
    inner: Arc<RwLock<HashMap<String, V>>>,
    mut update_rx: mpsc::UnboundedReceiver<V>,
    changed_tx: broadcast::Sender<Vec<V>>,
    sink: Option<Arc<dyn StoreSink<V>>>,
    token: CancellationToken,
) {
    loop {
        // Wait for the first update of a batch.
        let first = tokio::select! {
            _ = token.cancelled() => break,
            item = update_rx.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };

        let mut batch = vec![first];
        let hard_deadline = tokio::time::Instant::now() + config.hard_ceiling;

        // Coalesce until the burst quiets down or the ceiling hits.
        loop {
            let soft_deadline = tokio::time::Instant::now() + config.soft_delay;
            let deadline = soft_deadline.min(hard_deadline);
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep_until(deadline) => break,
                item = update_rx.recv() => match item {
                    Some(item) => batch.push(item),
                    None => break,
                },
            }
        }

        let changed = apply_batch(&inner, batch);
        if !changed.is_empty() {
            // No subscribers is fine.
            let _ = changed_tx.send(changed.clone());
            if let Some(sink) = &sink {
                sink.flush(changed);
            }
        }
    }
}

/// Apply a batch to the map. Within a batch the last accepted write per
/// key wins; each write is still gated by `should_replace` against
/// whatever the map currently holds.
fn apply_batch<V: StoreItem>(
    inner: &Arc<RwLock<HashMap<String, V>>>,
    batch: Vec<V>,
) -> Vec<V> {
    let mut map = inner.write().expect("store lock");
    let mut changed: HashMap<String, V> = HashMap::new();
    for item in batch {
        let key = item.store_key();
        let accepted = match map.get(&key) {
            Some(existing) => item.should_replace(existing),
            None => true,
        };
        if accepted {
            map.insert(key.clone(), item.clone());
            changed.insert(key, item);
        }
    }
    changed.into_values().collect()
}

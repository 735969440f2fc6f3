//! crates/gallery_core/src/slots.rs
//!
//! A map of independently locked slots. The outer map lock is only held for
//! lookups and inserts, never across an `.await` on slot contents, so work for
//! different keys never contends.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::Mutex;

pub(crate) struct KeyedSlots<K, V> {
    slots: Mutex<HashMap<K, Arc<Mutex<V>>>>,
}

impl<K, V> KeyedSlots<K, V>
where
    K: Eq + Hash + Clone,
    V: Default,
{
    pub(crate) fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the slot for `key`, creating an empty one if needed.
    pub(crate) async fn slot(&self, key: &K) -> Arc<Mutex<V>> {
        self.slots
            .lock()
            .await
            .entry(key.clone())
            .or_default()
            .clone()
    }

    /// Returns the slot for `key` only if it exists.
    pub(crate) async fn get(&self, key: &K) -> Option<Arc<Mutex<V>>> {
        self.slots.lock().await.get(key).cloned()
    }

    pub(crate) async fn insert(&self, key: K, value: V) {
        self.slots
            .lock()
            .await
            .insert(key, Arc::new(Mutex::new(value)));
    }

    /// Detaches the slot for `key`. Holders of the old slot keep their handle.
    pub(crate) async fn remove(&self, key: &K) -> Option<Arc<Mutex<V>>> {
        self.slots.lock().await.remove(key)
    }

    pub(crate) async fn keys(&self) -> Vec<K> {
        self.slots.lock().await.keys().cloned().collect()
    }
}

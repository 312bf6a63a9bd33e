//! In-memory storage backend.
//!
//! Keeps keys ordered so prefix range queries over composite keys
//! (`token_<chain>_<account>_<address>`) come back sorted.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{RwLock, broadcast};

use super::{Storage, StorageChange, StoreResult};

const CHANGEFEED_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct MemoryStorage {
    data: Arc<RwLock<BTreeMap<String, Value>>>,
    changes: broadcast::Sender<StorageChange>,
    name: String,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::named("memory")
    }

    pub fn named(name: impl Into<String>) -> Self {
        let (changes, _) = broadcast::channel(CHANGEFEED_CAPACITY);
        Self {
            data: Arc::new(RwLock::new(BTreeMap::new())),
            changes,
            name: name.into(),
        }
    }

    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }

    pub async fn clear(&self) {
        let drained: Vec<(String, Value)> = {
            let mut data = self.data.write().await;
            std::mem::take(&mut *data).into_iter().collect()
        };
        for (key, old) in drained {
            self.publish(key, Some(old), None);
        }
    }

    fn publish(&self, key: String, old_value: Option<Value>, new_value: Option<Value>) {
        // No receivers is fine: nobody is watching yet.
        let _ = self.changes.send(StorageChange {
            key,
            old_value,
            new_value,
        });
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Storage for MemoryStorage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_raw(&self, key: &str) -> StoreResult<Option<Value>> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn put_raw(&self, key: &str, value: Value) -> StoreResult<()> {
        let old = {
            let mut data = self.data.write().await;
            data.insert(key.to_string(), value.clone())
        };
        if old.as_ref() != Some(&value) {
            self.publish(key.to_string(), old, Some(value));
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> StoreResult<bool> {
        let old = self.data.write().await.remove(key);
        let removed = old.is_some();
        if removed {
            self.publish(key.to_string(), old, None);
        }
        Ok(removed)
    }

    async fn range(&self, prefix: &str) -> StoreResult<Vec<(String, Value)>> {
        let data = self.data.read().await;
        Ok(data
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.changes.subscribe()
    }
}

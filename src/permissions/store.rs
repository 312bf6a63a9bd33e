//! Permission repository collaborator.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast};

use super::Permission;
use crate::storage::StoreResult;

const CHANGEFEED_CAPACITY: usize = 256;

/// Origin-keyed permission records with a changefeed.
///
/// [`changes`](Self::changes) yields the origin of every record that was
/// written or deleted; subscribers re-read to observe the new state.
#[async_trait::async_trait]
pub trait PermissionRepository: Send + Sync {
    fn name(&self) -> &str;

    async fn get(&self, origin: &str) -> StoreResult<Option<Permission>>;

    /// Replaces any existing record for the permission's origin.
    async fn put(&self, permission: Permission) -> StoreResult<()>;

    async fn delete(&self, origin: &str) -> StoreResult<bool>;

    async fn all(&self) -> StoreResult<Vec<Permission>>;

    fn changes(&self) -> broadcast::Receiver<String>;
}

#[derive(Debug, Clone)]
pub struct MemoryPermissionRepository {
    records: Arc<RwLock<HashMap<String, Permission>>>,
    changes: broadcast::Sender<String>,
}

impl MemoryPermissionRepository {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGEFEED_CAPACITY);
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            changes,
        }
    }

    pub async fn count(&self) -> usize {
        self.records.read().await.len()
    }
}

impl Default for MemoryPermissionRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PermissionRepository for MemoryPermissionRepository {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, origin: &str) -> StoreResult<Option<Permission>> {
        Ok(self.records.read().await.get(origin).cloned())
    }

    async fn put(&self, permission: Permission) -> StoreResult<()> {
        let origin = permission.origin.clone();
        self.records
            .write()
            .await
            .insert(origin.clone(), permission);
        let _ = self.changes.send(origin);
        Ok(())
    }

    async fn delete(&self, origin: &str) -> StoreResult<bool> {
        let removed = self.records.write().await.remove(origin).is_some();
        if removed {
            let _ = self.changes.send(origin.to_string());
        }
        Ok(removed)
    }

    async fn all(&self) -> StoreResult<Vec<Permission>> {
        let mut all: Vec<Permission> = self.records.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.origin.cmp(&b.origin));
        Ok(all)
    }

    fn changes(&self) -> broadcast::Receiver<String> {
        self.changes.subscribe()
    }
}

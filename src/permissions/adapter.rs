//! Live-query style access to per-origin permissions.

use std::sync::Arc;

use tokio::sync::broadcast;

use super::{Permission, PermissionRepository};
use crate::common::Subscription;
use crate::storage::StoreResult;

#[derive(Clone)]
pub struct PermissionAdapter {
    repo: Arc<dyn PermissionRepository>,
}

impl PermissionAdapter {
    pub fn new(repo: Arc<dyn PermissionRepository>) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> &Arc<dyn PermissionRepository> {
        &self.repo
    }

    pub async fn get_permission(&self, origin: &str) -> StoreResult<Option<Permission>> {
        self.repo.get(origin).await
    }

    /// Like [`get_permission`](Self::get_permission) but treats a failed read
    /// as "no permission".
    pub async fn get_or_none(&self, origin: &str) -> Option<Permission> {
        match self.repo.get(origin).await {
            Ok(perm) => perm,
            Err(e) => {
                tracing::warn!(origin = %origin, error = %e, "Permission read failed");
                None
            }
        }
    }

    /// Reads the current record and keeps calling `on_change` with a fresh
    /// read every time the record for `origin` changes.
    ///
    /// The changefeed is attached before the initial read, so no write can
    /// fall between the returned snapshot and the first callback.
    pub async fn subscribe<F>(
        &self,
        origin: &str,
        on_change: F,
    ) -> StoreResult<(Option<Permission>, Subscription)>
    where
        F: Fn(Option<Permission>) + Send + Sync + 'static,
    {
        let mut rx = self.repo.changes();
        let initial = self.repo.get(origin).await?;

        let subscription = Subscription::new();
        let token = subscription.token();
        let repo = Arc::clone(&self.repo);
        let origin = origin.to_string();

        tokio::spawn(async move {
            loop {
                let changed = tokio::select! {
                    _ = token.cancelled() => break,
                    changed = rx.recv() => changed,
                };

                match changed {
                    Ok(changed) if changed == origin => {}
                    Ok(_) => continue,
                    // Missed some changes; re-read to catch up.
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(origin = %origin, skipped, "Permission changefeed lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }

                match repo.get(&origin).await {
                    Ok(perm) => {
                        if token.is_cancelled() {
                            break;
                        }
                        on_change(perm);
                    }
                    Err(e) => {
                        tracing::warn!(origin = %origin, error = %e, "Permission re-read failed");
                    }
                }
            }
        });

        Ok((initial, subscription))
    }

    /// Replaces the origin's permission with a fresh grant.
    pub async fn grant(
        &self,
        origin: &str,
        chain_id: u64,
        accounts: Vec<String>,
    ) -> StoreResult<Permission> {
        let permission = Permission::new(origin, chain_id, accounts);
        self.repo.put(permission.clone()).await?;
        tracing::info!(origin = %origin, chain_id, "Permission granted");
        Ok(permission)
    }

    /// Incremental grant: merges `accounts` into an existing permission, or
    /// creates one on `chain_id` if the origin has none.
    pub async fn add_accounts(
        &self,
        origin: &str,
        chain_id: u64,
        accounts: Vec<String>,
    ) -> StoreResult<Permission> {
        let permission = match self.repo.get(origin).await? {
            Some(existing) => existing.with_added_accounts(accounts),
            None => Permission::new(origin, chain_id, accounts),
        };
        self.repo.put(permission.clone()).await?;
        Ok(permission)
    }

    pub async fn set_chain(&self, origin: &str, chain_id: u64) -> StoreResult<Option<Permission>> {
        let Some(existing) = self.repo.get(origin).await? else {
            return Ok(None);
        };
        let updated = existing.with_chain_id(chain_id);
        self.repo.put(updated.clone()).await?;
        Ok(Some(updated))
    }

    pub async fn revoke(&self, origin: &str) -> StoreResult<bool> {
        let removed = self.repo.delete(origin).await?;
        if removed {
            tracing::info!(origin = %origin, "Permission revoked");
        }
        Ok(removed)
    }

    pub fn changes(&self) -> broadcast::Receiver<String> {
        self.repo.changes()
    }
}

impl std::fmt::Debug for PermissionAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionAdapter")
            .field("repository", &self.repo.name())
            .finish()
    }
}

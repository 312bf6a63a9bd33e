//! Persisted key-value storage.
//!
//! The broker treats storage as an external, eventually-consistent
//! collaborator: it re-reads on every call and learns about writes from other
//! contexts through the [`Storage::subscribe`] changefeed.

mod memory;

pub use memory::MemoryStorage;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::common::Subscription;

/// Persisted key for the internally active chain id.
pub const CHAIN_ID: &str = "chain_id";

/// Persisted key for the internally active account address.
pub const ACCOUNT_ADDRESS: &str = "account_address";

const RPC_URL_PREFIX: &str = "rpc_url_";

/// Persisted key holding the custom RPC URL override for a network.
pub fn rpc_url_key(chain_id: u64) -> String {
    format!("{}{}", RPC_URL_PREFIX, chain_id)
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage backend error: {message}")]
    Backend { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

impl StoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A single write observed on the changefeed.
#[derive(Clone, Debug, PartialEq)]
pub struct StorageChange {
    pub key: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

#[async_trait::async_trait]
pub trait Storage: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_raw(&self, key: &str) -> StoreResult<Option<Value>>;

    async fn put_raw(&self, key: &str, value: Value) -> StoreResult<()>;

    async fn remove(&self, key: &str) -> StoreResult<bool>;

    /// Entries whose key starts with `prefix`, ordered by key.
    async fn range(&self, prefix: &str) -> StoreResult<Vec<(String, Value)>>;

    async fn put_many(&self, entries: Vec<(String, Value)>) -> StoreResult<()> {
        for (key, value) in entries {
            self.put_raw(&key, value).await?;
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;
}

/// Typed access on top of [`Storage`].
pub trait StorageExt: Storage {
    fn fetch<T: DeserializeOwned + Send>(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = StoreResult<Option<T>>> + Send
    where
        Self: Sync,
    {
        async move {
            match self.fetch_raw(key).await? {
                Some(raw) => {
                    let value: T =
                        serde_json::from_value(raw).map_err(|e| StoreError::InvalidValue {
                            key: key.to_string(),
                            message: e.to_string(),
                        })?;
                    Ok(Some(value))
                }
                None => Ok(None),
            }
        }
    }

    fn put<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
    ) -> impl std::future::Future<Output = StoreResult<()>> + Send
    where
        Self: Sync,
    {
        async move {
            let raw = serde_json::to_value(value)?;
            self.put_raw(key, raw).await
        }
    }
}

impl<S: Storage + ?Sized> StorageExt for S {}

/// Invokes `on_change` with the decoded new value every time `key` is written.
///
/// Values that fail to decode are reported as `None`, same as a removal.
pub fn subscribe_key<S, T, F>(storage: &S, key: &str, on_change: F) -> Subscription
where
    S: Storage + ?Sized,
    T: DeserializeOwned + Send + 'static,
    F: Fn(Option<T>) + Send + Sync + 'static,
{
    let mut rx = storage.subscribe();
    let key = key.to_string();
    let subscription = Subscription::new();
    let token = subscription.token();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                change = rx.recv() => match change {
                    Ok(change) if change.key == key => {
                        let value = change
                            .new_value
                            .and_then(|v| serde_json::from_value::<T>(v).ok());
                        on_change(value);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(key = %key, skipped, "Storage subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    });

    subscription
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_url_key() {
        assert_eq!(rpc_url_key(56), "rpc_url_56");
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::backend("disk full");
        assert!(err.to_string().contains("disk full"));
    }
}

//! Networks the wallet knows about.

mod fixtures;

pub use fixtures::{DEFAULT_NETWORKS, INITIAL_CHAIN_ID, default_networks};

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::common::Subscription;
use crate::storage::{Storage, StorageExt, StoreResult, rpc_url_key, subscribe_key};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    Mainnet,
    Testnet,
    #[default]
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    pub chain_id: u64,
    #[serde(rename = "type")]
    pub kind: NetworkType,
    pub chain_tag: String,
    pub name: String,
    pub rpc_urls: Vec<String>,
    pub native_currency: NativeCurrency,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub explorer_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub icon_urls: Vec<String>,
}

impl Network {
    pub fn is_testnet(&self) -> bool {
        self.kind == NetworkType::Testnet
    }
}

/// Built-in networks plus any added at runtime, with per-network RPC URL
/// overrides kept in persisted storage.
pub struct NetworkRegistry {
    networks: RwLock<BTreeMap<u64, Network>>,
    storage: Arc<dyn Storage>,
}

impl NetworkRegistry {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self::with_networks(storage, default_networks())
    }

    pub fn with_networks(storage: Arc<dyn Storage>, networks: Vec<Network>) -> Self {
        let networks = networks.into_iter().map(|n| (n.chain_id, n)).collect();
        Self {
            networks: RwLock::new(networks),
            storage,
        }
    }

    pub fn get(&self, chain_id: u64) -> Option<Network> {
        self.networks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&chain_id)
            .cloned()
    }

    pub fn contains(&self, chain_id: u64) -> bool {
        self.networks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&chain_id)
    }

    pub fn all(&self) -> Vec<Network> {
        self.networks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn chain_ids(&self) -> Vec<u64> {
        self.networks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect()
    }

    /// Adds a network. Returns `false` if the chain id was already known, in
    /// which case the existing entry is kept.
    pub fn add(&self, network: Network) -> bool {
        let mut networks = self.networks.write().unwrap_or_else(|e| e.into_inner());
        if networks.contains_key(&network.chain_id) {
            return false;
        }
        tracing::info!(chain_id = network.chain_id, name = %network.name, "Network added");
        networks.insert(network.chain_id, network);
        true
    }

    /// RPC endpoint for a network: the persisted override if one is set,
    /// otherwise the first built-in URL.
    pub async fn rpc_url(&self, chain_id: u64) -> Option<String> {
        match self.storage.fetch::<String>(&rpc_url_key(chain_id)).await {
            Ok(Some(url)) => return Some(url),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(chain_id, error = %e, "RPC URL override read failed");
            }
        }
        self.get(chain_id).and_then(|n| n.rpc_urls.into_iter().next())
    }

    pub async fn set_rpc_url(&self, chain_id: u64, url: Option<&str>) -> StoreResult<()> {
        let key = rpc_url_key(chain_id);
        match url {
            Some(url) => self.storage.put(&key, &url).await,
            None => self.storage.remove(&key).await.map(|_| ()),
        }
    }

    /// Fires with the new override (or `None` when cleared).
    pub fn subscribe_rpc_url<F>(&self, chain_id: u64, on_change: F) -> Subscription
    where
        F: Fn(Option<String>) + Send + Sync + 'static,
    {
        subscribe_key(self.storage.as_ref(), &rpc_url_key(chain_id), on_change)
    }
}

impl std::fmt::Debug for NetworkRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkRegistry")
            .field("chain_ids", &self.chain_ids())
            .field("storage", &self.storage.name())
            .finish()
    }
}

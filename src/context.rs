//! Application context shared by every broker component.

use std::sync::Arc;

use crate::approvals::ApprovalQueue;
use crate::config::BrokerConfig;
use crate::dispatcher::ChainRpc;
use crate::networks::{Network, NetworkRegistry, default_networks};
use crate::observability::BrokerMetrics;
use crate::permissions::{MemoryPermissionRepository, PermissionAdapter, PermissionRepository};
use crate::ports::PortRegistry;
use crate::session::SessionState;
use crate::storage::{MemoryStorage, Storage};

/// Process-scoped state handle.
///
/// Holds the single instance of each shared container. Components take an
/// `Arc<AppContext>` instead of reaching for globals.
pub struct AppContext {
    pub config: BrokerConfig,
    pub storage: Arc<dyn Storage>,
    pub networks: Arc<NetworkRegistry>,
    pub session: Arc<SessionState>,
    pub permissions: PermissionAdapter,
    pub approvals: ApprovalQueue,
    pub ports: Arc<PortRegistry>,
    pub metrics: Arc<BrokerMetrics>,
    pub chain_rpc: Option<Arc<dyn ChainRpc>>,
}

impl AppContext {
    pub fn builder() -> AppContextBuilder {
        AppContextBuilder::default()
    }

    /// Context over in-memory storage and repository with default settings.
    pub fn in_memory() -> Arc<Self> {
        Self::builder().build()
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("config", &self.config)
            .field("storage", &self.storage.name())
            .field("networks", &self.networks)
            .field("approvals", &self.approvals)
            .field("ports", &self.ports.len())
            .field("chain_rpc", &self.chain_rpc.is_some())
            .finish()
    }
}

#[derive(Default)]
pub struct AppContextBuilder {
    config: Option<BrokerConfig>,
    storage: Option<Arc<dyn Storage>>,
    repository: Option<Arc<dyn PermissionRepository>>,
    networks: Option<Vec<Network>>,
    metrics: Option<Arc<BrokerMetrics>>,
    chain_rpc: Option<Arc<dyn ChainRpc>>,
}

impl AppContextBuilder {
    pub fn config(mut self, config: BrokerConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn permission_repository(mut self, repository: Arc<dyn PermissionRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Replaces the built-in network list.
    pub fn networks(mut self, networks: Vec<Network>) -> Self {
        self.networks = Some(networks);
        self
    }

    pub fn metrics(mut self, metrics: Arc<BrokerMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn chain_rpc(mut self, chain_rpc: Arc<dyn ChainRpc>) -> Self {
        self.chain_rpc = Some(chain_rpc);
        self
    }

    pub fn build(self) -> Arc<AppContext> {
        let config = self.config.unwrap_or_default();
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let repository = self
            .repository
            .unwrap_or_else(|| Arc::new(MemoryPermissionRepository::new()));
        let metrics = self.metrics.unwrap_or_default();

        let networks = Arc::new(NetworkRegistry::with_networks(
            Arc::clone(&storage),
            self.networks.unwrap_or_else(default_networks),
        ));
        let session = Arc::new(SessionState::new(
            Arc::clone(&storage),
            Arc::clone(&networks),
            config.default_chain_id,
        ));

        tracing::debug!(
            storage = storage.name(),
            repository = repository.name(),
            networks = networks.chain_ids().len(),
            "Application context built"
        );

        Arc::new(AppContext {
            config,
            storage,
            networks,
            session,
            permissions: PermissionAdapter::new(repository),
            approvals: ApprovalQueue::new(Arc::clone(&metrics)),
            ports: Arc::new(PortRegistry::new(Arc::clone(&metrics))),
            metrics,
            chain_rpc: self.chain_rpc,
        })
    }
}

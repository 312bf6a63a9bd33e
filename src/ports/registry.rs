//! Port to origin bindings.

use std::sync::Arc;

use dashmap::DashMap;

use super::{Port, PortId};
use crate::common::Subscription;
use crate::observability::BrokerMetrics;
use crate::permissions::origin_of;

/// Registry record for one live port. Dropping it releases every
/// subscription attached to the port.
#[derive(Debug)]
pub struct PortEntry {
    pub port: Port,
    pub origin: String,
    pub favicon: Option<String>,
    subscriptions: Vec<Subscription>,
}

impl PortEntry {
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }
}

pub struct PortRegistry {
    ports: DashMap<PortId, PortEntry>,
    metrics: Arc<BrokerMetrics>,
}

impl PortRegistry {
    pub fn new(metrics: Arc<BrokerMetrics>) -> Self {
        Self {
            ports: DashMap::new(),
            metrics,
        }
    }

    /// Binds the port to the origin of its sender URL.
    ///
    /// Returns `None` and registers nothing when the URL is missing,
    /// unparsable or opaque.
    pub fn on_connect(&self, port: Port) -> Option<String> {
        let Some(origin) = port.sender().url.as_deref().and_then(origin_of) else {
            tracing::debug!(port_id = %port.id(), url = ?port.sender().url, "Ignoring connection without origin");
            return None;
        };

        let id = port.id();
        let favicon = port.sender().fav_icon_url.clone();
        let previous = self.ports.insert(
            id,
            PortEntry {
                port,
                origin: origin.clone(),
                favicon,
                subscriptions: Vec::new(),
            },
        );
        if previous.is_none() {
            self.metrics.active_ports.inc();
        }
        tracing::debug!(port_id = %id, origin = %origin, "Port connected");
        Some(origin)
    }

    /// Removes the port and releases its subscriptions. Safe to call for a
    /// port that never connected or was already removed.
    pub fn on_disconnect(&self, id: PortId) -> Option<PortEntry> {
        let (_, entry) = self.ports.remove(&id)?;
        self.metrics.active_ports.dec();
        tracing::debug!(
            port_id = %id,
            origin = %entry.origin,
            subscriptions = entry.subscriptions.len(),
            "Port disconnected"
        );
        Some(entry)
    }

    /// Ties a subscription to the port's lifetime. If the port is already
    /// gone the subscription is released immediately and `false` returned.
    pub fn attach(&self, id: PortId, subscription: Subscription) -> bool {
        match self.ports.get_mut(&id) {
            Some(mut entry) => {
                entry.subscriptions.push(subscription);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: PortId) -> Option<Port> {
        self.ports.get(&id).map(|e| e.port.clone())
    }

    pub fn origin(&self, id: PortId) -> Option<String> {
        self.ports.get(&id).map(|e| e.origin.clone())
    }

    pub fn contains(&self, id: PortId) -> bool {
        self.ports.contains_key(&id)
    }

    pub fn ports_for_origin(&self, origin: &str) -> Vec<Port> {
        self.ports
            .iter()
            .filter(|e| e.origin == origin)
            .map(|e| e.port.clone())
            .collect()
    }

    pub fn origins(&self) -> Vec<String> {
        let mut origins: Vec<String> = self.ports.iter().map(|e| e.origin.clone()).collect();
        origins.sort();
        origins.dedup();
        origins
    }

    /// Caches the favicon reported by the page. Returns `false` for unknown ports.
    pub fn set_favicon(&self, id: PortId, url: impl Into<String>) -> bool {
        match self.ports.get_mut(&id) {
            Some(mut entry) => {
                entry.favicon = Some(url.into());
                true
            }
            None => false,
        }
    }

    pub fn favicon(&self, id: PortId) -> Option<String> {
        self.ports.get(&id).and_then(|e| e.favicon.clone())
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }
}

impl Default for PortRegistry {
    fn default() -> Self {
        Self::new(Arc::new(BrokerMetrics::new()))
    }
}

impl std::fmt::Debug for PortRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortRegistry")
            .field("ports", &self.ports.len())
            .finish()
    }
}

//! Live page connections.
//!
//! A [`Port`] is the broker's handle on one page context. Outbound messages
//! go through an unbounded channel that the transport drains; a port whose
//! transport side is gone silently drops what it is sent.

mod registry;

pub use registry::{PortEntry, PortRegistry};

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::rpc::OutboundMessage;

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortId(Uuid);

impl PortId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for PortId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sender descriptor reported by the browser for a connection.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortSender {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub tab_id: Option<i64>,
    #[serde(default)]
    pub fav_icon_url: Option<String>,
}

impl PortSender {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn with_tab_id(mut self, tab_id: i64) -> Self {
        self.tab_id = Some(tab_id);
        self
    }
}

#[derive(Clone)]
pub struct Port {
    id: PortId,
    sender: PortSender,
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl Port {
    pub fn new(sender: PortSender, tx: mpsc::UnboundedSender<OutboundMessage>) -> Self {
        Self {
            id: PortId::new(),
            sender,
            tx,
        }
    }

    /// Creates a port together with the receiver the transport drains.
    pub fn channel(sender: PortSender) -> (Self, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(sender, tx), rx)
    }

    pub fn id(&self) -> PortId {
        self.id
    }

    pub fn sender(&self) -> &PortSender {
        &self.sender
    }

    /// Queues a message for the page. Returns `false` if the port is closed.
    pub fn send(&self, message: OutboundMessage) -> bool {
        match self.tx.send(message) {
            Ok(()) => true,
            Err(_) => {
                tracing::debug!(port_id = %self.id, "Message to closed port dropped");
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("id", &self.id)
            .field("url", &self.sender.url)
            .finish()
    }
}

//! # wallet-broker
//!
//! Background RPC approval broker for browser-extension wallets.
//!
//! Untrusted pages talk to the wallet over a multiplexed channel of
//! JSON-RPC 2.0 messages. The broker binds every connection to its page
//! origin, answers what it can from the origin's permission and the wallet
//! session, and parks everything that needs user consent in a pending
//! approval queue until the UI decides. Pages are kept in sync with lock
//! status, active chain and active account through per-port state pushes.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wallet_broker::{AppContext, PageServer, ChannelEvent};
//! use wallet_broker::ports::{Port, PortSender};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), wallet_broker::Error> {
//!     let server = PageServer::new(AppContext::in_memory())?;
//!     server.start().await;
//!
//!     let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
//!     let (port, mut replies) = Port::channel(PortSender::new("https://dapp.example/"));
//!     tx.send(ChannelEvent::Connect(port.clone())).ok();
//!     tx.send(ChannelEvent::Message {
//!         port,
//!         message: json!({"id": 1, "jsonrpc": "2.0", "method": "eth_chainId"}),
//!     })
//!     .ok();
//!     drop(tx);
//!
//!     server.serve(rx).await;
//!     // State push first, then the reply.
//!     for _ in 0..2 {
//!         if let Some(message) = replies.recv().await {
//!             println!("{}", serde_json::to_string(&message)?);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Approving from the UI
//!
//! ```rust,no_run
//! # async fn example(server: wallet_broker::PageServer) -> wallet_broker::Result<()> {
//! let mut pending = server.controller().subscribe();
//! pending.changed().await.ok();
//! let first = pending.borrow().first().cloned();
//! if let Some(approval) = first {
//!     let accounts = vec!["0x00000000000000000000000000000000000000aa".to_string()];
//!     server.controller().grant_connection(&approval.id, accounts, 1).await?;
//! }
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod approvals;
pub mod common;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod hardware;
pub mod networks;
pub mod notify;
pub mod observability;
pub mod permissions;
pub mod ports;
pub mod prelude;
pub mod resilience;
pub mod rpc;
pub mod server;
pub mod session;
pub mod storage;

// Re-exports for convenience
pub use approvals::{
    ActivitySource, ApprovalController, ApprovalError, ApprovalId, ApprovalKind, ApprovalOutcome,
    ApprovalPayload, ApprovalQueue, PendingApproval, Ticket,
};
pub use common::Subscription;
pub use config::{BrokerConfig, ConfigBuilder, ConfigError, DisconnectPolicy};
pub use context::{AppContext, AppContextBuilder};
pub use dispatcher::{ChainRpc, DispatchError, Dispatcher, RequestContext};
pub use hardware::{HardwareError, HardwareTransport, connect_with_retry};
pub use networks::{Network, NetworkRegistry};
pub use observability::{BrokerMetrics, MetricsSummary};
pub use permissions::{
    MemoryPermissionRepository, Permission, PermissionAdapter, PermissionRepository,
};
pub use ports::{Port, PortId, PortRegistry, PortSender};
pub use resilience::{ExponentialBackoff, RetryConfig};
pub use rpc::{
    JsonRpcRequest, JsonRpcResponse, OutboundMessage, RpcError, RpcMethod, RpcReply, StateParams,
};
pub use server::{ChannelEvent, PageServer};
pub use session::{SessionError, SessionEvent, SessionState, WalletStatus};
pub use storage::{MemoryStorage, Storage, StorageExt, StoreError};

/// Error type for wallet-broker operations.
///
/// Never sent to pages. The server boundary replaces it with
/// [`RpcError::internal`] before anything crosses to page code.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Persisted storage or permission repository failed.
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Session setter refused the change.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// UI decision could not be applied.
    #[error("Approval error: {0}")]
    Approval(#[from] ApprovalError),

    #[error("Hardware wallet error: {0}")]
    Hardware(#[from] HardwareError),

    /// JSON serialization or deserialization failed.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Request arrived without a usable sender context.
    #[error("Missing sender context: {0}")]
    Context(String),

    /// Unexpected internal state.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error category for unified error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Missing or malformed sender context
    Context,
    /// Refused by the user or by the current wallet state
    Rejected,
    /// Storage collaborator failures
    Storage,
    /// Configuration and setup errors
    Configuration,
    /// Internal errors (JSON, unexpected states, transport faults)
    Internal,
}

impl Error {
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal(message.into())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Context(_) => ErrorCategory::Context,

            Error::Store(_)
            | Error::Session(SessionError::Store(_))
            | Error::Approval(ApprovalError::Store(_))
            | Error::Approval(ApprovalError::Session(SessionError::Store(_))) => {
                ErrorCategory::Storage
            }

            Error::Config(_) => ErrorCategory::Configuration,

            Error::Session(_) | Error::Approval(_) => ErrorCategory::Rejected,
            Error::Hardware(HardwareError::Rejected | HardwareError::Cancelled) => {
                ErrorCategory::Rejected
            }

            Error::Hardware(_) | Error::Json(_) | Error::Internal(_) => ErrorCategory::Internal,
        }
    }

    pub fn is_storage_error(&self) -> bool {
        self.category() == ErrorCategory::Storage
    }

    pub fn is_rejection(&self) -> bool {
        self.category() == ErrorCategory::Rejected
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Hardware(e) if e.is_transient())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

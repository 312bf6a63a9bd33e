//! Prelude module for convenient imports.
//!
//! # Usage
//!
//! ```rust
//! use wallet_broker::prelude::*;
//! ```

// Core types
pub use crate::Error;
pub use crate::Result;
pub use crate::{AppContext, AppContextBuilder};

// Server
pub use crate::{ChannelEvent, PageServer};
pub use crate::ports::{Port, PortId, PortSender};

// Approvals
pub use crate::approvals::{
    ApprovalController, ApprovalId, ApprovalKind, ApprovalOutcome, ApprovalPayload,
    PendingApproval,
};

// Wire types
pub use crate::rpc::{JsonRpcRequest, JsonRpcResponse, OutboundMessage, RpcError, StateParams};

// State
pub use crate::permissions::Permission;
pub use crate::session::{SessionEvent, WalletStatus};
pub use crate::storage::{Storage, StorageExt};

// Config
pub use crate::config::{BrokerConfig, ConfigProvider, ConfigProviderExt};

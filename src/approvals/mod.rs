//! Pending user-consent requests.
//!
//! The dispatcher builds a [`PendingApproval`], pushes it onto the
//! [`ApprovalQueue`] and awaits the returned [`Ticket`]. The UI observes the
//! queue and settles entries through the [`ApprovalController`].

mod controller;
mod queue;

pub use controller::ApprovalController;
pub use queue::{ApprovalQueue, Ticket};

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::networks::Network;
use crate::permissions::origin_of;
use crate::ports::PortId;
use crate::rpc::{RpcError, SigningStandard};
use crate::session::SessionError;
use crate::storage::StoreError;

#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApprovalId(String);

impl ApprovalId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ApprovalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ApprovalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ApprovalId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ApprovalKind {
    Connection,
    Transaction,
    Signing,
    PermissionChange,
    Other,
}

impl ApprovalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Transaction => "transaction",
            Self::Signing => "signing",
            Self::PermissionChange => "permissionChange",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ApprovalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a request came from, as shown to the user.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySource {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fav_icon_url: Option<String>,
    #[serde(skip)]
    pub port_id: Option<PortId>,
}

impl ActivitySource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn origin(&self) -> Option<String> {
        origin_of(&self.url)
    }
}

/// Type-specific data the UI needs to render a request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ApprovalPayload {
    #[serde(rename_all = "camelCase")]
    Connection {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        requested_permissions: Option<Value>,
    },
    #[serde(rename_all = "camelCase")]
    Transaction { chain_id: u64, tx: Value },
    #[serde(rename_all = "camelCase")]
    Signing {
        standard: SigningStandard,
        address: String,
        message: Value,
    },
    #[serde(rename_all = "camelCase")]
    SwitchChain { chain_id: u64 },
    #[serde(rename_all = "camelCase")]
    AddNetwork { network: Network },
    #[serde(rename_all = "camelCase")]
    Other { method: String, params: Value },
}

impl ApprovalPayload {
    pub fn kind(&self) -> ApprovalKind {
        match self {
            Self::Connection { .. } => ApprovalKind::Connection,
            Self::Transaction { .. } => ApprovalKind::Transaction,
            Self::Signing { .. } => ApprovalKind::Signing,
            Self::SwitchChain { .. } | Self::AddNetwork { .. } => ApprovalKind::PermissionChange,
            Self::Other { .. } => ApprovalKind::Other,
        }
    }
}

/// One outstanding request awaiting a user decision.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingApproval {
    pub id: ApprovalId,
    #[serde(rename = "type")]
    pub kind: ApprovalKind,
    pub origin: String,
    pub source: ActivitySource,
    pub payload: ApprovalPayload,
    /// Connection approvals only: reply with the account list instead of the
    /// wrapped permission.
    pub return_selected_account: bool,
    pub created_at: DateTime<Utc>,
}

impl PendingApproval {
    pub fn new(origin: impl Into<String>, source: ActivitySource, payload: ApprovalPayload) -> Self {
        Self {
            id: ApprovalId::new(),
            kind: payload.kind(),
            origin: origin.into(),
            source,
            payload,
            return_selected_account: false,
            created_at: Utc::now(),
        }
    }

    pub fn with_return_selected_account(mut self, value: bool) -> Self {
        self.return_selected_account = value;
        self
    }
}

/// How a pending approval was settled.
#[derive(Clone, Debug, PartialEq)]
pub enum ApprovalOutcome {
    Approved(Value),
    Declined,
    Failed(RpcError),
}

impl ApprovalOutcome {
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved(_))
    }

    /// Reply body for the page.
    pub fn into_reply(self) -> Result<Value, RpcError> {
        match self {
            Self::Approved(value) => Ok(value),
            Self::Declined => Err(RpcError::user_rejected()),
            Self::Failed(error) => Err(error),
        }
    }
}

#[derive(Error, Debug)]
pub enum ApprovalError {
    #[error("Approval not pending: {0}")]
    NotPending(ApprovalId),

    #[error("Approval {id} is {found}, expected {expected}")]
    WrongKind {
        id: ApprovalId,
        expected: ApprovalKind,
        found: ApprovalKind,
    },

    #[error("Wallet is locked")]
    Locked,

    #[error("Account is not unlocked: {0}")]
    UnknownAccount(String),

    #[error("Not an account address: {0}")]
    InvalidAddress(String),

    #[error("Unknown chain: {0}")]
    UnknownChain(u64),

    #[error("No permission for origin: {0}")]
    NoPermission(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

pub type ApprovalResult<T> = std::result::Result<T, ApprovalError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_kind() {
        assert_eq!(
            ApprovalPayload::SwitchChain { chain_id: 56 }.kind(),
            ApprovalKind::PermissionChange
        );
        assert_eq!(
            ApprovalPayload::Connection {
                requested_permissions: None
            }
            .kind(),
            ApprovalKind::Connection
        );
    }

    #[test]
    fn test_pending_approval_serializes_for_ui() {
        let approval = PendingApproval::new(
            "https://dapp.example",
            ActivitySource::new("https://dapp.example/app"),
            ApprovalPayload::Transaction {
                chain_id: 1,
                tx: json!({"to": "0x0"}),
            },
        );
        let value = serde_json::to_value(&approval).unwrap();
        assert_eq!(value["type"], "transaction");
        assert_eq!(value["payload"]["type"], "transaction");
        assert_eq!(value["payload"]["chainId"], 1);
        assert_eq!(value["returnSelectedAccount"], false);
        assert!(value["source"].get("portId").is_none());
    }

    #[test]
    fn test_outcome_into_reply() {
        assert_eq!(
            ApprovalOutcome::Approved(json!("0xsig")).into_reply(),
            Ok(json!("0xsig"))
        );
        assert_eq!(
            ApprovalOutcome::Declined.into_reply().unwrap_err().code,
            crate::rpc::codes::USER_REJECTED
        );
    }

    #[test]
    fn test_ids_unique() {
        assert_ne!(ApprovalId::new(), ApprovalId::new());
    }
}

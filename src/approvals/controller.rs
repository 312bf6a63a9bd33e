//! Decision operations invoked by the UI.

use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use tokio::sync::watch;

use super::{
    ApprovalError, ApprovalId, ApprovalKind, ApprovalPayload, ApprovalResult, PendingApproval,
};
use crate::context::AppContext;
use crate::notify::exposed_accounts;
use crate::permissions::{Permission, is_address};
use crate::rpc::RpcError;

/// Settles pending approvals on the user's behalf and applies the state
/// changes an approval implies (new permission, chain switch, added
/// network) before the page gets its reply.
#[derive(Clone)]
pub struct ApprovalController {
    ctx: Arc<AppContext>,
}

impl ApprovalController {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    pub fn pending(&self) -> Vec<PendingApproval> {
        self.ctx.approvals.pending()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<PendingApproval>> {
        self.ctx.approvals.subscribe()
    }

    /// Approves with a result computed elsewhere (a signature, a tx hash).
    pub fn approve(&self, id: &ApprovalId, result: Value) -> ApprovalResult<()> {
        self.settled(id, self.ctx.approvals.approve(id, result))
    }

    pub fn decline(&self, id: &ApprovalId) -> ApprovalResult<()> {
        self.settled(id, self.ctx.approvals.decline(id))
    }

    /// Settles with a specific page-facing error, e.g. a signing failure.
    pub fn fail(&self, id: &ApprovalId, error: RpcError) -> ApprovalResult<()> {
        self.settled(id, self.ctx.approvals.reject(id, error))
    }

    /// Stores a permission for the approval's origin, then resolves every
    /// pending connection approval of that origin from it, including `id`.
    pub async fn grant_connection(
        &self,
        id: &ApprovalId,
        accounts: Vec<String>,
        chain_id: u64,
    ) -> ApprovalResult<Permission> {
        let approval = self.expect_kind(id, ApprovalKind::Connection)?;
        let session = &self.ctx.session;
        if !session.is_unlocked() {
            return Err(ApprovalError::Locked);
        }
        if !self.ctx.networks.contains(chain_id) {
            return Err(ApprovalError::UnknownChain(chain_id));
        }
        let unlocked = session.accounts();
        if accounts.is_empty() {
            return Err(ApprovalError::UnknownAccount(String::new()));
        }
        if let Some(invalid) = accounts.iter().find(|a| !is_address(a)) {
            return Err(ApprovalError::InvalidAddress(invalid.clone()));
        }
        if let Some(unknown) = accounts
            .iter()
            .find(|a| !unlocked.iter().any(|u| u.eq_ignore_ascii_case(a)))
        {
            return Err(ApprovalError::UnknownAccount(unknown.clone()));
        }

        let permission = self
            .ctx
            .permissions
            .grant(&approval.origin, chain_id, accounts)
            .await?;

        let resolved = self.resolve_from(&permission);
        tracing::info!(
            approval_id = %id,
            origin = %approval.origin,
            resolved,
            "Connection granted"
        );
        Ok(permission)
    }

    /// Applies a chain switch or network addition to the origin's permission
    /// and answers the page with `null`.
    pub async fn approve_permission_change(&self, id: &ApprovalId) -> ApprovalResult<()> {
        let approval = self.expect_kind(id, ApprovalKind::PermissionChange)?;
        let chain_id = match &approval.payload {
            ApprovalPayload::SwitchChain { chain_id } => {
                if !self.ctx.networks.contains(*chain_id) {
                    return Err(ApprovalError::UnknownChain(*chain_id));
                }
                *chain_id
            }
            ApprovalPayload::AddNetwork { network } => network.chain_id,
            _ => {
                return Err(ApprovalError::WrongKind {
                    id: id.clone(),
                    expected: ApprovalKind::PermissionChange,
                    found: approval.payload.kind(),
                });
            }
        };

        let updated = self
            .ctx
            .permissions
            .set_chain(&approval.origin, chain_id)
            .await?;
        if updated.is_none() {
            self.ctx.approvals.reject(id, RpcError::unauthorized());
            return Err(ApprovalError::NoPermission(approval.origin));
        }
        if let ApprovalPayload::AddNetwork { network } = &approval.payload {
            self.ctx.networks.add(network.clone());
        }

        tracing::info!(approval_id = %id, origin = %approval.origin, chain_id, "Permission chain changed");
        self.settled(id, self.ctx.approvals.approve(id, Value::Null))
    }

    /// Resolves the origin's pending connection approvals from a fresh
    /// permission read. Does nothing while locked or without a permission.
    pub async fn settle_origin(&self, origin: &str) -> usize {
        let session = &self.ctx.session;
        if !session.is_unlocked() {
            return 0;
        }
        let Some(permission) = self.ctx.permissions.get_or_none(origin).await else {
            return 0;
        };
        self.resolve_from(&permission)
    }

    /// [`settle_origin`](Self::settle_origin) for every origin with a pending
    /// connection approval.
    pub async fn settle_all(&self) -> usize {
        let origins = self.ctx.approvals.connection_origins();
        let settled: usize = join_all(origins.iter().map(|origin| self.settle_origin(origin)))
            .await
            .into_iter()
            .sum();
        if settled > 0 {
            tracing::debug!(settled, "Pending connections settled");
        }
        settled
    }

    /// Deletes the origin's permission and rejects its pending approvals
    /// that depended on it. Connection requests stay pending.
    pub async fn revoke(&self, origin: &str) -> ApprovalResult<bool> {
        let removed = self.ctx.permissions.revoke(origin).await?;
        let cancelled = self
            .ctx
            .approvals
            .cancel_authorized_for_origin(origin, RpcError::unauthorized());
        if cancelled > 0 {
            tracing::info!(origin = %origin, cancelled, "Approvals cancelled by revoke");
        }
        Ok(removed)
    }

    fn resolve_from(&self, permission: &Permission) -> usize {
        let session = &self.ctx.session;
        let active = session.account_address();
        let exposed = exposed_accounts(permission, active.as_deref(), &session.accounts());
        self.ctx.approvals.resolve_connections(permission, &exposed)
    }

    fn expect_kind(&self, id: &ApprovalId, expected: ApprovalKind) -> ApprovalResult<PendingApproval> {
        let approval = self
            .ctx
            .approvals
            .get(id)
            .ok_or_else(|| ApprovalError::NotPending(id.clone()))?;
        if approval.kind != expected {
            return Err(ApprovalError::WrongKind {
                id: id.clone(),
                expected,
                found: approval.kind,
            });
        }
        Ok(approval)
    }

    fn settled(&self, id: &ApprovalId, resolved: bool) -> ApprovalResult<()> {
        if resolved {
            Ok(())
        } else {
            Err(ApprovalError::NotPending(id.clone()))
        }
    }
}

impl std::fmt::Debug for ApprovalController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalController")
            .field("pending", &self.ctx.approvals.len())
            .finish()
    }
}

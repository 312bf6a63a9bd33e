//! Routes page requests to method handlers.
//!
//! For every request the dispatcher assembles a [`RequestContext`] (internal
//! chain, the origin's permission, lock status), resolves the method name to
//! a [`RpcMethod`] and runs its handler. Approval-class handlers enqueue a
//! [`PendingApproval`](crate::approvals::PendingApproval) and suspend until
//! the queue settles it.

mod chain;
mod handlers;

pub use chain::ChainRpc;

use std::sync::Arc;

use thiserror::Error;

use crate::approvals::ActivitySource;
use crate::context::AppContext;
use crate::notify::exposed_accounts;
use crate::permissions::Permission;
use crate::rpc::{JsonRpcRequest, MethodClass, RpcError, RpcMethod};
use crate::session::WalletStatus;
use handlers::Handler;

/// Failure while handling a request.
///
/// `Rpc` errors go to the page as-is. `Internal` errors are logged and the
/// page gets a generic internal error instead.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Internal(#[from] crate::Error),
}

impl From<crate::storage::StoreError> for DispatchError {
    fn from(e: crate::storage::StoreError) -> Self {
        Self::Internal(e.into())
    }
}

impl From<crate::approvals::ApprovalError> for DispatchError {
    fn from(e: crate::approvals::ApprovalError) -> Self {
        Self::Internal(e.into())
    }
}

pub type DispatchResult<T = serde_json::Value> = std::result::Result<T, DispatchError>;

/// Everything a handler may read about the request's origin.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub origin: String,
    pub source: ActivitySource,
    pub internal_chain_id: u64,
    pub permission: Option<Permission>,
    pub status: WalletStatus,
    pub active_account: Option<String>,
    pub accounts: Vec<String>,
}

impl RequestContext {
    /// The chain the origin sees: its permission's, else the internal one.
    pub fn chain_id(&self) -> u64 {
        self.permission
            .as_ref()
            .map(|p| p.chain_id)
            .unwrap_or(self.internal_chain_id)
    }

    pub fn is_unlocked(&self) -> bool {
        self.status.is_unlocked()
    }

    /// Accounts exposed to the origin, effective account first. Empty when
    /// locked or without a permission.
    pub fn exposed_accounts(&self) -> Vec<String> {
        match self.permission.as_ref().filter(|_| self.is_unlocked()) {
            Some(permission) => {
                exposed_accounts(permission, self.active_account.as_deref(), &self.accounts)
            }
            None => Vec::new(),
        }
    }

    pub fn require_permission(&self) -> Result<&Permission, RpcError> {
        self.permission.as_ref().ok_or_else(RpcError::unauthorized)
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    ctx: Arc<AppContext>,
}

impl Dispatcher {
    /// Checks that every supported method routes to a handler of the
    /// method's class.
    pub fn new(ctx: Arc<AppContext>) -> crate::Result<Self> {
        for method in RpcMethod::ALL {
            let handler = Handler::for_method(*method);
            if handler.class() != method.class() {
                return Err(crate::Error::Internal(format!(
                    "{} routes to a {:?} handler but is classified {:?}",
                    method,
                    handler.class(),
                    method.class()
                )));
            }
        }
        tracing::debug!(methods = RpcMethod::ALL.len(), "Dispatcher routes validated");
        Ok(Self { ctx })
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.ctx
    }

    /// Gathers the state a handler needs for `origin`.
    pub async fn assemble(
        &self,
        origin: &str,
        source: ActivitySource,
    ) -> DispatchResult<RequestContext> {
        let session = &self.ctx.session;
        let permission = self.ctx.permissions.get_permission(origin).await?;
        Ok(RequestContext {
            origin: origin.to_string(),
            source,
            internal_chain_id: session.chain_id(),
            permission,
            status: session.wallet_status(),
            active_account: session.account_address(),
            accounts: session.accounts(),
        })
    }

    pub async fn dispatch(
        &self,
        request: &JsonRpcRequest,
        origin: &str,
        source: ActivitySource,
    ) -> DispatchResult {
        let method = RpcMethod::from_name(&request.method)
            .ok_or_else(RpcError::method_not_found)?;
        let req = self.assemble(origin, source).await?;

        let handler = Handler::for_method(method);
        if let MethodClass::Approval(kind) = method.class() {
            tracing::debug!(method = %method, kind = %kind, "Request may need approval");
        }
        handler.run(&self.ctx, &req, method, request).await
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

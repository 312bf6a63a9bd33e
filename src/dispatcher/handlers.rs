//! Method handlers.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::Instrument;

use super::{DispatchResult, RequestContext};
use crate::approvals::{
    ApprovalController, ApprovalKind, ApprovalPayload, PendingApproval,
};
use crate::context::AppContext;
use crate::networks::{NativeCurrency, Network, NetworkType};
use crate::observability::approval_span;
use crate::permissions::{is_address, normalize_address, wrap_permission};
use crate::rpc::{
    JsonRpcRequest, MethodClass, RpcError, RpcMethod, SigningStandard, parse_chain_id,
    to_hex_chain_id,
};

/// One handler per behaviour. Several methods may share a handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum Handler {
    ChainId,
    NetVersion,
    Accounts,
    GetPermissions,
    RevokePermissions,
    Connect { return_selected_account: bool },
    SwitchChain,
    AddChain,
    SendTransaction,
    Sign(SigningStandard),
    WatchAsset,
    Forward,
}

impl Handler {
    pub(super) fn for_method(method: RpcMethod) -> Self {
        use RpcMethod::*;
        match method {
            ChainId => Self::ChainId,
            NetVersion => Self::NetVersion,
            Accounts => Self::Accounts,
            GetPermissions => Self::GetPermissions,
            RevokePermissions => Self::RevokePermissions,
            RequestAccounts => Self::Connect {
                return_selected_account: true,
            },
            RequestPermissions => Self::Connect {
                return_selected_account: false,
            },
            SwitchChain => Self::SwitchChain,
            AddChain => Self::AddChain,
            SendTransaction => Self::SendTransaction,
            PersonalSign => Self::Sign(SigningStandard::PersonalSign),
            EthSign => Self::Sign(SigningStandard::EthSign),
            SignTypedData => Self::Sign(SigningStandard::TypedDataV1),
            SignTypedDataV3 => Self::Sign(SigningStandard::TypedDataV3),
            SignTypedDataV4 => Self::Sign(SigningStandard::TypedDataV4),
            WatchAsset => Self::WatchAsset,
            BlockNumber | GetBalance | Call | EstimateGas | GasPrice | GetTransactionCount
            | GetTransactionByHash | GetTransactionReceipt | GetCode | GetBlockByNumber
            | GetLogs => Self::Forward,
        }
    }

    pub(super) fn class(&self) -> MethodClass {
        match self {
            Self::ChainId | Self::NetVersion | Self::Accounts | Self::GetPermissions => {
                MethodClass::Context
            }
            Self::RevokePermissions => MethodClass::Local,
            Self::Connect { .. } => MethodClass::Approval(ApprovalKind::Connection),
            Self::SwitchChain | Self::AddChain => {
                MethodClass::Approval(ApprovalKind::PermissionChange)
            }
            Self::SendTransaction => MethodClass::Approval(ApprovalKind::Transaction),
            Self::Sign(_) => MethodClass::Approval(ApprovalKind::Signing),
            Self::WatchAsset => MethodClass::Approval(ApprovalKind::Other),
            Self::Forward => MethodClass::Forward,
        }
    }

    pub(super) async fn run(
        self,
        ctx: &Arc<AppContext>,
        req: &RequestContext,
        method: RpcMethod,
        request: &JsonRpcRequest,
    ) -> DispatchResult {
        let params = request.params_array();
        match self {
            Self::ChainId => Ok(json!(to_hex_chain_id(req.chain_id()))),
            Self::NetVersion => Ok(json!(req.chain_id().to_string())),
            Self::Accounts => Ok(json!(req.exposed_accounts())),
            Self::GetPermissions => Ok(match &req.permission {
                Some(permission) if req.is_unlocked() => json!([wrap_permission(permission)]),
                _ => json!([]),
            }),
            Self::RevokePermissions => {
                ApprovalController::new(Arc::clone(ctx))
                    .revoke(&req.origin)
                    .await?;
                Ok(Value::Null)
            }
            Self::Connect {
                return_selected_account,
            } => connect(ctx, req, &params, return_selected_account).await,
            Self::SwitchChain => switch_chain(ctx, req, &params).await,
            Self::AddChain => add_chain(ctx, req, &params).await,
            Self::SendTransaction => send_transaction(ctx, req, &params).await,
            Self::Sign(standard) => sign(ctx, req, standard, &params).await,
            Self::WatchAsset => {
                req.require_permission()?;
                let payload = ApprovalPayload::Other {
                    method: method.name().to_string(),
                    params: request.params.clone(),
                };
                await_approval(ctx, req, PendingApproval::new(&req.origin, req.source.clone(), payload))
                    .await
            }
            Self::Forward => forward(ctx, req, method, request).await,
        }
    }
}

async fn connect(
    ctx: &Arc<AppContext>,
    req: &RequestContext,
    params: &[Value],
    return_selected_account: bool,
) -> DispatchResult {
    if let Some(permission) = req.permission.as_ref().filter(|_| req.is_unlocked()) {
        if !return_selected_account {
            return Ok(json!([wrap_permission(permission)]));
        }
        let accounts = req.exposed_accounts();
        if !accounts.is_empty() {
            return Ok(json!(accounts));
        }
    }

    let approval = PendingApproval::new(
        &req.origin,
        req.source.clone(),
        ApprovalPayload::Connection {
            requested_permissions: params.first().cloned(),
        },
    )
    .with_return_selected_account(return_selected_account);

    let span = approval_span(ApprovalKind::Connection.as_str(), &req.origin);
    span.record("approval_id", approval.id.as_str());
    let ticket = ctx.approvals.enqueue(approval);

    // A grant may have landed between the context read and the enqueue.
    ApprovalController::new(Arc::clone(ctx))
        .settle_origin(&req.origin)
        .await;

    let outcome = ticket.wait().instrument(span).await;
    Ok(outcome.into_reply()?)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwitchChainParams {
    chain_id: Value,
}

async fn switch_chain(
    ctx: &Arc<AppContext>,
    req: &RequestContext,
    params: &[Value],
) -> DispatchResult {
    let permission = req.require_permission()?;
    let parsed: SwitchChainParams = first_param(params)?;
    let chain_id = parse_chain_id(&parsed.chain_id)
        .ok_or_else(|| RpcError::invalid_params("Invalid chainId"))?;

    if !ctx.networks.contains(chain_id) {
        return Err(RpcError::unrecognized_chain(chain_id).into());
    }
    if chain_id == permission.chain_id {
        return Ok(Value::Null);
    }

    let approval = PendingApproval::new(
        &req.origin,
        req.source.clone(),
        ApprovalPayload::SwitchChain { chain_id },
    );
    await_approval(ctx, req, approval).await
}

/// EIP-3085 `wallet_addEthereumChain` parameter.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddChainParams {
    chain_id: Value,
    chain_name: String,
    rpc_urls: Vec<String>,
    native_currency: NativeCurrency,
    #[serde(default)]
    block_explorer_urls: Option<Vec<String>>,
    #[serde(default)]
    icon_urls: Option<Vec<String>>,
}

impl AddChainParams {
    fn into_network(self, chain_id: u64) -> Result<Network, RpcError> {
        let rpc_urls: Vec<String> = self
            .rpc_urls
            .into_iter()
            .filter(|u| url::Url::parse(u).is_ok())
            .collect();
        if rpc_urls.is_empty() {
            return Err(RpcError::invalid_params("Expected at least one valid rpcUrl"));
        }
        let chain_name = self.chain_name.trim().to_string();
        if chain_name.is_empty() {
            return Err(RpcError::invalid_params("Expected a chainName"));
        }
        Ok(Network {
            chain_id,
            kind: NetworkType::Unknown,
            chain_tag: self.native_currency.symbol.to_ascii_lowercase(),
            name: chain_name,
            rpc_urls,
            native_currency: self.native_currency,
            explorer_urls: self.block_explorer_urls.unwrap_or_default(),
            icon_urls: self.icon_urls.unwrap_or_default(),
        })
    }
}

async fn add_chain(ctx: &Arc<AppContext>, req: &RequestContext, params: &[Value]) -> DispatchResult {
    let permission = req.require_permission()?;
    let parsed: AddChainParams = first_param(params)?;
    let chain_id = parse_chain_id(&parsed.chain_id)
        .filter(|id| *id != 0)
        .ok_or_else(|| RpcError::invalid_params("Invalid chainId"))?;

    let payload = if ctx.networks.contains(chain_id) {
        if chain_id == permission.chain_id {
            return Ok(Value::Null);
        }
        ApprovalPayload::SwitchChain { chain_id }
    } else {
        ApprovalPayload::AddNetwork {
            network: parsed.into_network(chain_id)?,
        }
    };

    let approval = PendingApproval::new(&req.origin, req.source.clone(), payload);
    await_approval(ctx, req, approval).await
}

async fn send_transaction(
    ctx: &Arc<AppContext>,
    req: &RequestContext,
    params: &[Value],
) -> DispatchResult {
    let permission = req.require_permission()?;
    let tx = params
        .first()
        .filter(|tx| tx.is_object())
        .cloned()
        .ok_or_else(|| RpcError::invalid_params("Expected a transaction object"))?;
    let from = tx
        .get("from")
        .and_then(Value::as_str)
        .filter(|from| is_address(from))
        .ok_or_else(|| RpcError::invalid_params("Expected a from address"))?;
    if !permission.includes(from) {
        return Err(RpcError::unauthorized().into());
    }

    let approval = PendingApproval::new(
        &req.origin,
        req.source.clone(),
        ApprovalPayload::Transaction {
            chain_id: permission.chain_id,
            tx,
        },
    );
    await_approval(ctx, req, approval).await
}

/// `(address, message)` positions within the params of each signing method.
fn signing_positions(standard: SigningStandard) -> (usize, usize) {
    match standard {
        SigningStandard::PersonalSign | SigningStandard::TypedDataV1 => (1, 0),
        SigningStandard::EthSign | SigningStandard::TypedDataV3 | SigningStandard::TypedDataV4 => {
            (0, 1)
        }
    }
}

fn signing_params(standard: SigningStandard, params: &[Value]) -> Result<(String, Value), RpcError> {
    let (address_at, message_at) = signing_positions(standard);
    let address = params
        .get(address_at)
        .and_then(Value::as_str)
        .filter(|a| is_address(a))
        .ok_or_else(|| RpcError::invalid_params("Expected a signer address"))?;
    let message = params
        .get(message_at)
        .filter(|m| !m.is_null())
        .cloned()
        .ok_or_else(|| RpcError::invalid_params("Expected data to sign"))?;
    Ok((address.to_string(), message))
}

async fn sign(
    ctx: &Arc<AppContext>,
    req: &RequestContext,
    standard: SigningStandard,
    params: &[Value],
) -> DispatchResult {
    let permission = req.require_permission()?;
    let (address, message) = signing_params(standard, params)?;
    if !permission.includes(&address) {
        return Err(RpcError::unauthorized().into());
    }

    let approval = PendingApproval::new(
        &req.origin,
        req.source.clone(),
        ApprovalPayload::Signing {
            standard,
            address: normalize_address(&address),
            message,
        },
    );
    await_approval(ctx, req, approval).await
}

async fn forward(
    ctx: &Arc<AppContext>,
    req: &RequestContext,
    method: RpcMethod,
    request: &JsonRpcRequest,
) -> DispatchResult {
    let Some(chain_rpc) = ctx.chain_rpc.as_ref() else {
        return Err(RpcError::unsupported_method().into());
    };
    let chain_id = req.chain_id();
    let rpc_url = ctx.networks.rpc_url(chain_id).await;
    tracing::debug!(method = %method, chain_id, rpc_url = ?rpc_url, "Forwarding to chain");
    let result = chain_rpc
        .request(chain_id, rpc_url.as_deref(), method.name(), request.params.clone())
        .await?;
    Ok(result)
}

async fn await_approval(
    ctx: &AppContext,
    req: &RequestContext,
    approval: PendingApproval,
) -> DispatchResult {
    let span = approval_span(approval.kind.as_str(), &req.origin);
    span.record("approval_id", approval.id.as_str());
    let ticket = ctx.approvals.enqueue(approval);
    let outcome = ticket.wait().instrument(span).await;
    Ok(outcome.into_reply()?)
}

fn first_param<T: serde::de::DeserializeOwned>(params: &[Value]) -> Result<T, RpcError> {
    let first = params
        .first()
        .cloned()
        .ok_or_else(|| RpcError::invalid_params("Missing params"))?;
    serde_json::from_value(first).map_err(|e| RpcError::invalid_params(e.to_string()))
}

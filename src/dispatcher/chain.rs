//! Pass-through to a chain node for read-only methods.

use serde_json::Value;

use crate::rpc::RpcError;

/// Node RPC collaborator. The broker does not implement chain reads itself;
/// without one configured, forwarded methods fail with `4200`.
#[async_trait::async_trait]
pub trait ChainRpc: Send + Sync {
    /// `rpc_url` is the network's override if one is set, else its first
    /// built-in endpoint.
    async fn request(
        &self,
        chain_id: u64,
        rpc_url: Option<&str>,
        method: &str,
        params: Value,
    ) -> Result<Value, RpcError>;
}

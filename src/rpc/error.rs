//! Page-facing error shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Numeric codes from JSON-RPC 2.0 and EIP-1193.
pub mod codes {
    pub const INVALID_INPUT: i64 = -32000;
    pub const RESOURCE_NOT_FOUND: i64 = -32001;
    pub const RESOURCE_UNAVAILABLE: i64 = -32002;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL: i64 = -32603;
    pub const USER_REJECTED: i64 = 4001;
    pub const UNAUTHORIZED: i64 = 4100;
    pub const UNSUPPORTED_METHOD: i64 = 4200;
    pub const DISCONNECTED: i64 = 4900;
    pub const CHAIN_DISCONNECTED: i64 = 4901;
    pub const UNRECOGNIZED_CHAIN: i64 = 4902;
}

/// Plain serializable error delivered to pages.
///
/// Only constructible from a message, a code and optional data, so nothing
/// internal (source chains, backtraces, store messages) can leak through it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message} (code {code})")]
pub struct RpcError {
    pub message: String,
    pub code: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code,
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn resource_not_found() -> Self {
        Self::new(codes::RESOURCE_NOT_FOUND, "Requested resource not found.")
    }

    pub fn resource_unavailable() -> Self {
        Self::new(codes::RESOURCE_UNAVAILABLE, "Requested resource not available.")
    }

    pub fn internal() -> Self {
        Self::new(codes::INTERNAL, "Internal JSON-RPC error.")
    }

    pub fn method_not_found() -> Self {
        Self::new(
            codes::METHOD_NOT_FOUND,
            "The method does not exist / is not available.",
        )
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(codes::INVALID_PARAMS, message)
    }

    pub fn user_rejected() -> Self {
        Self::new(codes::USER_REJECTED, "User rejected the request.")
    }

    pub fn unauthorized() -> Self {
        Self::new(
            codes::UNAUTHORIZED,
            "The requested account and/or method has not been authorized by the user.",
        )
    }

    pub fn unsupported_method() -> Self {
        Self::new(
            codes::UNSUPPORTED_METHOD,
            "The requested method is not supported by this Ethereum provider.",
        )
    }

    pub fn disconnected() -> Self {
        Self::new(
            codes::DISCONNECTED,
            "The provider is disconnected from all chains.",
        )
    }

    pub fn unrecognized_chain(chain_id: u64) -> Self {
        Self::new(
            codes::UNRECOGNIZED_CHAIN,
            format!(
                "Unrecognized chain ID \"{}\". Try adding the chain using wallet_addEthereumChain first.",
                super::to_hex_chain_id(chain_id)
            ),
        )
    }

    pub fn is_user_rejection(&self) -> bool {
        self.code == codes::USER_REJECTED
    }
}

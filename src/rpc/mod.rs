//! JSON-RPC 2.0 wire types exchanged with page contexts.
//!
//! Every value crossing the page boundary is plain data. Errors are carried
//! as [`RpcError`] (`message`, `code`, optional `data`) and never as a crate
//! [`Error`](crate::Error).

mod error;
mod method;

pub use error::{RpcError, codes};
pub use method::{MethodClass, RpcMethod, SigningStandard, UnknownMethod};

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC: &str = "2.0";

/// Out-of-band method a page uses to report its favicon URL. Never replied to.
pub const FAVICON_METHOD: &str = "wallet_favicon";

/// Notification method used for outbound state snapshots.
pub const STATE_METHOD: &str = "wallet_state";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub id: Value,
    #[serde(default = "default_jsonrpc")]
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

fn default_jsonrpc() -> String {
    JSONRPC.to_string()
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Value) -> Self {
        Self {
            id: id.into(),
            jsonrpc: JSONRPC.to_string(),
            method: method.into(),
            params,
        }
    }

    /// Positional parameters; a missing or non-array `params` is treated as empty.
    pub fn params_array(&self) -> Vec<Value> {
        match &self.params {
            Value::Array(items) => items.clone(),
            _ => Vec::new(),
        }
    }
}

/// Outcome of a request before it is framed with `id` and `jsonrpc`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RpcReply {
    #[serde(rename = "result")]
    Result(Value),
    #[serde(rename = "error")]
    Error(RpcError),
}

impl RpcReply {
    pub fn ok(value: impl Into<Value>) -> Self {
        Self::Result(value.into())
    }

    pub fn err(error: RpcError) -> Self {
        Self::Error(error)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn result(&self) -> Option<&Value> {
        match self {
            Self::Result(v) => Some(v),
            Self::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&RpcError> {
        match self {
            Self::Error(e) => Some(e),
            Self::Result(_) => None,
        }
    }
}

impl From<RpcError> for RpcReply {
    fn from(error: RpcError) -> Self {
        Self::Error(error)
    }
}

impl From<Result<Value, RpcError>> for RpcReply {
    fn from(result: Result<Value, RpcError>) -> Self {
        match result {
            Ok(v) => Self::Result(v),
            Err(e) => Self::Error(e),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub id: Value,
    pub jsonrpc: String,
    #[serde(flatten)]
    pub reply: RpcReply,
}

impl JsonRpcResponse {
    pub fn new(id: Value, jsonrpc: impl Into<String>, reply: RpcReply) -> Self {
        Self {
            id,
            jsonrpc: jsonrpc.into(),
            reply,
        }
    }

    /// Frames a reply for `request`, echoing its `id` and `jsonrpc` version.
    pub fn reply_to(request: &JsonRpcRequest, reply: RpcReply) -> Self {
        Self::new(request.id.clone(), request.jsonrpc.clone(), reply)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification<P = Value> {
    pub jsonrpc: String,
    pub method: String,
    pub params: P,
}

impl<P> JsonRpcNotification<P> {
    pub fn new(method: impl Into<String>, params: P) -> Self {
        Self {
            jsonrpc: JSONRPC.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// Parameters of the [`STATE_METHOD`] notification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateParams {
    pub chain_id: u64,
    pub account_address: Option<String>,
}

/// A message delivered to a page port.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    Response(JsonRpcResponse),
    State(JsonRpcNotification<StateParams>),
}

impl OutboundMessage {
    pub fn state(params: StateParams) -> Self {
        Self::State(JsonRpcNotification::new(STATE_METHOD, params))
    }

    pub fn as_response(&self) -> Option<&JsonRpcResponse> {
        match self {
            Self::Response(r) => Some(r),
            Self::State(_) => None,
        }
    }

    pub fn as_state(&self) -> Option<&StateParams> {
        match self {
            Self::State(n) => Some(&n.params),
            Self::Response(_) => None,
        }
    }
}

/// Encodes a chain id the way EIP-1193 providers report it (`0x`-prefixed hex).
pub fn to_hex_chain_id(chain_id: u64) -> String {
    format!("0x{:x}", chain_id)
}

/// Accepts `0x`-prefixed hex strings, decimal strings and JSON numbers.
pub fn parse_chain_id(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => {
            let s = s.trim();
            match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some(hex) => u64::from_str_radix(hex, 16).ok(),
                None => s.parse().ok(),
            }
        }
        _ => None,
    }
}

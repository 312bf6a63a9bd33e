//! Closed set of methods the broker answers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::approvals::ApprovalKind;

/// Signature flavours a signing approval can carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SigningStandard {
    PersonalSign,
    EthSign,
    TypedDataV1,
    TypedDataV3,
    TypedDataV4,
}

/// How the dispatcher handles a method.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MethodClass {
    /// Answered from the assembled request context alone.
    Context,
    /// Mutates permission state without asking the user.
    Local,
    /// Suspends until the user decides.
    Approval(ApprovalKind),
    /// Passed through to the chain RPC collaborator.
    Forward,
}

macro_rules! rpc_methods {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum RpcMethod {
            $($variant),+
        }

        impl RpcMethod {
            pub const ALL: &'static [RpcMethod] = &[$(RpcMethod::$variant),+];

            pub fn name(&self) -> &'static str {
                match self {
                    $(RpcMethod::$variant => $name),+
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(RpcMethod::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

rpc_methods! {
    ChainId => "eth_chainId",
    NetVersion => "net_version",
    Accounts => "eth_accounts",
    RequestAccounts => "eth_requestAccounts",
    GetPermissions => "wallet_getPermissions",
    RequestPermissions => "wallet_requestPermissions",
    RevokePermissions => "wallet_revokePermissions",
    SwitchChain => "wallet_switchEthereumChain",
    AddChain => "wallet_addEthereumChain",
    SendTransaction => "eth_sendTransaction",
    PersonalSign => "personal_sign",
    EthSign => "eth_sign",
    SignTypedData => "eth_signTypedData",
    SignTypedDataV3 => "eth_signTypedData_v3",
    SignTypedDataV4 => "eth_signTypedData_v4",
    WatchAsset => "wallet_watchAsset",
    BlockNumber => "eth_blockNumber",
    GetBalance => "eth_getBalance",
    Call => "eth_call",
    EstimateGas => "eth_estimateGas",
    GasPrice => "eth_gasPrice",
    GetTransactionCount => "eth_getTransactionCount",
    GetTransactionByHash => "eth_getTransactionByHash",
    GetTransactionReceipt => "eth_getTransactionReceipt",
    GetCode => "eth_getCode",
    GetBlockByNumber => "eth_getBlockByNumber",
    GetLogs => "eth_getLogs",
}

impl RpcMethod {
    pub fn class(&self) -> MethodClass {
        use RpcMethod::*;
        match self {
            ChainId | NetVersion | Accounts | GetPermissions => MethodClass::Context,
            RevokePermissions => MethodClass::Local,
            RequestAccounts | RequestPermissions => MethodClass::Approval(ApprovalKind::Connection),
            SwitchChain | AddChain => MethodClass::Approval(ApprovalKind::PermissionChange),
            SendTransaction => MethodClass::Approval(ApprovalKind::Transaction),
            PersonalSign | EthSign | SignTypedData | SignTypedDataV3 | SignTypedDataV4 => {
                MethodClass::Approval(ApprovalKind::Signing)
            }
            WatchAsset => MethodClass::Approval(ApprovalKind::Other),
            BlockNumber | GetBalance | Call | EstimateGas | GasPrice | GetTransactionCount
            | GetTransactionByHash | GetTransactionReceipt | GetCode | GetBlockByNumber
            | GetLogs => MethodClass::Forward,
        }
    }

    pub fn signing_standard(&self) -> Option<SigningStandard> {
        match self {
            RpcMethod::PersonalSign => Some(SigningStandard::PersonalSign),
            RpcMethod::EthSign => Some(SigningStandard::EthSign),
            RpcMethod::SignTypedData => Some(SigningStandard::TypedDataV1),
            RpcMethod::SignTypedDataV3 => Some(SigningStandard::TypedDataV3),
            RpcMethod::SignTypedDataV4 => Some(SigningStandard::TypedDataV4),
            _ => None,
        }
    }

    pub fn requires_approval(&self) -> bool {
        matches!(self.class(), MethodClass::Approval(_))
    }
}

impl fmt::Display for RpcMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown method: {0}")]
pub struct UnknownMethod(pub String);

impl FromStr for RpcMethod {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| UnknownMethod(s.to_string()))
    }
}

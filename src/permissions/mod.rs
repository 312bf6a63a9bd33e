//! Per-origin permissions granted to pages.

mod adapter;
mod store;

pub use adapter::PermissionAdapter;
pub use store::{MemoryPermissionRepository, PermissionRepository};

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

static ADDRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^0x[0-9a-fA-F]{40}$").unwrap());

/// A stored grant of one chain and a set of accounts to one origin.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    pub origin: String,
    pub chain_id: u64,
    pub account_addresses: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl Permission {
    pub fn new(origin: impl Into<String>, chain_id: u64, account_addresses: Vec<String>) -> Self {
        Self {
            origin: origin.into(),
            chain_id,
            account_addresses: dedup_addresses(account_addresses),
            timestamp: Utc::now(),
        }
    }

    pub fn includes(&self, address: &str) -> bool {
        self.account_addresses
            .iter()
            .any(|a| a.eq_ignore_ascii_case(address))
    }

    /// Incremental grant: keeps existing accounts and appends new ones.
    pub fn with_added_accounts(mut self, accounts: Vec<String>) -> Self {
        let mut merged = std::mem::take(&mut self.account_addresses);
        merged.extend(accounts);
        self.account_addresses = dedup_addresses(merged);
        self.timestamp = Utc::now();
        self
    }

    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = chain_id;
        self.timestamp = Utc::now();
        self
    }

    /// Granted accounts, lowercased.
    pub fn normalized_accounts(&self) -> Vec<String> {
        self.account_addresses
            .iter()
            .map(|a| normalize_address(a))
            .collect()
    }
}

fn dedup_addresses(addresses: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(addresses.len());
    for address in addresses {
        if !out.iter().any(|a| a.eq_ignore_ascii_case(&address)) {
            out.push(address);
        }
    }
    out
}

/// Derives `scheme://host[:port]` from a page URL.
///
/// Returns `None` for unparsable URLs and for opaque origins (`data:`,
/// `about:blank`, ...), which cannot hold a permission.
pub fn origin_of(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let origin = parsed.origin();
    if !origin.is_tuple() {
        return None;
    }
    Some(origin.ascii_serialization())
}

pub fn is_address(value: &str) -> bool {
    ADDRESS_RE.is_match(value)
}

pub fn normalize_address(value: &str) -> String {
    value.to_ascii_lowercase()
}

/// Renders a permission in the EIP-2255 `wallet_getPermissions` shape.
pub fn wrap_permission(permission: &Permission) -> Value {
    json!({
        "invoker": permission.origin,
        "parentCapability": "eth_accounts",
        "caveats": [{
            "type": "restrictReturnedAccounts",
            "value": permission.normalized_accounts(),
        }],
        "date": permission.timestamp.timestamp_millis(),
    })
}

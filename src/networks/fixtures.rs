//! Built-in network list.

use super::{NativeCurrency, Network, NetworkType};

/// Chain the wallet falls back to when nothing is persisted.
pub const INITIAL_CHAIN_ID: u64 = 1;

struct Fixture {
    chain_id: u64,
    kind: NetworkType,
    chain_tag: &'static str,
    name: &'static str,
    rpc_urls: &'static [&'static str],
    currency: (&'static str, &'static str),
    explorer_urls: &'static [&'static str],
}

pub const DEFAULT_NETWORKS: usize = FIXTURES.len();

const FIXTURES: &[Fixture] = &[
    Fixture {
        chain_id: 1,
        kind: NetworkType::Mainnet,
        chain_tag: "eth",
        name: "Ethereum",
        rpc_urls: &["https://eth.llamarpc.com", "https://rpc.ankr.com/eth"],
        currency: ("Ether", "ETH"),
        explorer_urls: &["https://etherscan.io"],
    },
    Fixture {
        chain_id: 11155111,
        kind: NetworkType::Testnet,
        chain_tag: "eth",
        name: "Sepolia",
        rpc_urls: &["https://rpc.sepolia.org"],
        currency: ("Sepolia Ether", "ETH"),
        explorer_urls: &["https://sepolia.etherscan.io"],
    },
    Fixture {
        chain_id: 56,
        kind: NetworkType::Mainnet,
        chain_tag: "bsc",
        name: "BNB Smart Chain",
        rpc_urls: &[
            "https://bsc-dataseed1.binance.org",
            "https://rpc.ankr.com/bsc",
            "https://bsc.publicnode.com",
        ],
        currency: ("Binance Native Token", "BNB"),
        explorer_urls: &["https://bscscan.com"],
    },
    Fixture {
        chain_id: 97,
        kind: NetworkType::Testnet,
        chain_tag: "bsc",
        name: "BNB Smart Chain Testnet",
        rpc_urls: &["https://data-seed-prebsc-1-s1.binance.org:8545"],
        currency: ("Binance Native Token", "tBNB"),
        explorer_urls: &["https://testnet.bscscan.com"],
    },
    Fixture {
        chain_id: 250,
        kind: NetworkType::Mainnet,
        chain_tag: "fantom",
        name: "Fantom Opera",
        rpc_urls: &["https://rpc.ftm.tools", "https://rpc.ankr.com/fantom"],
        currency: ("Fantom", "FTM"),
        explorer_urls: &["https://ftmscan.com"],
    },
    Fixture {
        chain_id: 4002,
        kind: NetworkType::Testnet,
        chain_tag: "fantom",
        name: "Fantom Testnet",
        rpc_urls: &["https://rpc.testnet.fantom.network"],
        currency: ("Fantom", "FTM"),
        explorer_urls: &["https://testnet.ftmscan.com"],
    },
    Fixture {
        chain_id: 1666600000,
        kind: NetworkType::Mainnet,
        chain_tag: "harmony",
        name: "Harmony Mainnet Shard 0",
        rpc_urls: &["https://api.harmony.one", "https://rpc.ankr.com/harmony"],
        currency: ("Harmony One", "ONE"),
        explorer_urls: &["https://explorer.harmony.one"],
    },
    Fixture {
        chain_id: 1666700000,
        kind: NetworkType::Testnet,
        chain_tag: "harmony",
        name: "Harmony Testnet Shard 0",
        rpc_urls: &["https://api.s0.b.hmny.io"],
        currency: ("Harmony One", "ONE"),
        explorer_urls: &["https://explorer.pops.one"],
    },
    Fixture {
        chain_id: 137,
        kind: NetworkType::Mainnet,
        chain_tag: "polygon",
        name: "Polygon",
        rpc_urls: &["https://polygon-rpc.com", "https://rpc.ankr.com/polygon"],
        currency: ("Polygon", "POL"),
        explorer_urls: &["https://polygonscan.com"],
    },
];

pub fn default_networks() -> Vec<Network> {
    FIXTURES
        .iter()
        .map(|f| Network {
            chain_id: f.chain_id,
            kind: f.kind,
            chain_tag: f.chain_tag.to_string(),
            name: f.name.to_string(),
            rpc_urls: f.rpc_urls.iter().map(|u| u.to_string()).collect(),
            native_currency: NativeCurrency {
                name: f.currency.0.to_string(),
                symbol: f.currency.1.to_string(),
                decimals: 18,
            },
            explorer_urls: f.explorer_urls.iter().map(|u| u.to_string()).collect(),
            icon_urls: Vec::new(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_fixture_chain_ids_unique() {
        let ids: HashSet<u64> = FIXTURES.iter().map(|f| f.chain_id).collect();
        assert_eq!(ids.len(), DEFAULT_NETWORKS);
        assert!(ids.contains(&INITIAL_CHAIN_ID));
    }

    #[test]
    fn test_every_fixture_has_rpc_url() {
        assert!(default_networks().iter().all(|n| !n.rpc_urls.is_empty()));
    }
}

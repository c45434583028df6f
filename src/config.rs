// Configuration management module
// Static chain registry (ids, EIP-3770 short names, default endpoints) and
// environment-driven overrides for the RPC and relay collaborators.

use std::collections::HashMap;

use anyhow::Result;
use serde::Deserialize;
use url::Url;

pub type ChainId = u64;

/// One entry of the fixed chain registry. The short name is the textual
/// prefix used by chain-qualified addresses; it maps to exactly one chain id.
#[derive(Debug, Clone, Copy)]
pub struct ChainInfo {
    pub chain_id: ChainId,
    pub short_name: &'static str,
    /// Default public JSON-RPC endpoint; callers override per chain.
    pub rpc_url: &'static str,
    /// Default Safe transaction service for this chain.
    pub transaction_service: &'static str,
}

pub static CHAINS: &[ChainInfo] = &[
    ChainInfo {
        chain_id: 1,
        short_name: "eth",
        rpc_url: "https://rpc.ankr.com/eth",
        transaction_service: "https://safe-transaction-mainnet.safe.global",
    },
    ChainInfo {
        chain_id: 10,
        short_name: "oeth",
        rpc_url: "https://rpc.ankr.com/optimism",
        transaction_service: "https://safe-transaction-optimism.safe.global",
    },
    ChainInfo {
        chain_id: 100,
        short_name: "gno",
        rpc_url: "https://rpc.ankr.com/gnosis",
        transaction_service: "https://safe-transaction-gnosis-chain.safe.global",
    },
    ChainInfo {
        chain_id: 137,
        short_name: "matic",
        rpc_url: "https://rpc.ankr.com/polygon",
        transaction_service: "https://safe-transaction-polygon.safe.global",
    },
    ChainInfo {
        chain_id: 8453,
        short_name: "base",
        rpc_url: "https://rpc.ankr.com/base",
        transaction_service: "https://safe-transaction-base.safe.global",
    },
    ChainInfo {
        chain_id: 42161,
        short_name: "arb1",
        rpc_url: "https://rpc.ankr.com/arbitrum",
        transaction_service: "https://safe-transaction-arbitrum.safe.global",
    },
    ChainInfo {
        chain_id: 43114,
        short_name: "avax",
        rpc_url: "https://rpc.ankr.com/avalanche",
        transaction_service: "https://safe-transaction-avalanche.safe.global",
    },
    ChainInfo {
        chain_id: 11155111,
        short_name: "sep",
        rpc_url: "https://rpc.ankr.com/eth_sepolia",
        transaction_service: "https://safe-transaction-sepolia.safe.global",
    },
];

pub fn chain_by_id(chain_id: ChainId) -> Option<&'static ChainInfo> {
    CHAINS.iter().find(|c| c.chain_id == chain_id)
}

pub fn chain_by_prefix(prefix: &str) -> Option<&'static ChainInfo> {
    CHAINS.iter().find(|c| c.short_name == prefix)
}

/// Runtime configuration, loaded from the environment. All fields are
/// optional; the static registry supplies defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Per-chain JSON-RPC endpoint overrides, keyed by decimal chain id.
    pub rpc_endpoints: Option<HashMap<String, Url>>,
    /// Per-chain Safe transaction service overrides, keyed by decimal chain id.
    pub transaction_services: Option<HashMap<String, Url>>,
    /// HTTP timeout applied to both collaborators, in milliseconds.
    pub http_timeout_ms: Option<u64>,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::default().separator("__"))
            .build()?;
        Ok(cfg.try_deserialize()?)
    }

    /// Overrides with parseable decimal chain-id keys; bad keys are skipped.
    pub(crate) fn parsed_overrides(
        source: &Option<HashMap<String, Url>>,
    ) -> HashMap<ChainId, Url> {
        source
            .iter()
            .flatten()
            .filter_map(|(k, v)| k.parse::<ChainId>().ok().map(|id| (id, v.clone())))
            .collect()
    }
}

use alloy_primitives::B256;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use url::Url;
use x402_types::chain::ChainId;
use x402_types::config::{LiteralOrEnv, RpcConfig};

use crate::chain::Eip155ChainReference;

/// Configuration of one EVM chain, keyed by its chain reference.
#[derive(Debug, Clone)]
pub struct Eip155ChainConfig {
    pub chain_reference: Eip155ChainReference,
    pub inner: Eip155ChainConfigInner,
}

impl Eip155ChainConfig {
    pub fn chain_id(&self) -> ChainId {
        self.chain_reference.into()
    }
    pub fn eip1559(&self) -> bool {
        self.inner.eip1559
    }
    pub fn flashblocks(&self) -> bool {
        self.inner.flashblocks
    }
    pub fn receipt_timeout_secs(&self) -> u64 {
        self.inner.receipt_timeout_secs
    }
    /// Signers of this chain, if set on the chain itself.
    pub fn signers(&self) -> Option<&Eip155SignersConfig> {
        self.inner.signers.as_ref()
    }
    pub fn rpc(&self) -> &[RpcConfig] {
        &self.inner.rpc
    }
    pub fn chain_reference(&self) -> Eip155ChainReference {
        self.chain_reference
    }

    /// RPC endpoints that resolved to a usable `http(s)` URL, with their rate limits.
    pub fn rpc_endpoints(&self) -> Vec<(Url, Option<u32>)> {
        self.inner
            .rpc
            .iter()
            .filter_map(|rpc| {
                let url = rpc.url()?;
                matches!(url.scheme(), "http" | "https").then(|| (url.clone(), rpc.rate_limit))
            })
            .collect()
    }

    /// A chain is served only if at least one RPC endpoint resolved.
    pub fn is_enabled(&self) -> bool {
        !self.rpc_endpoints().is_empty()
    }

    /// Uses `signers` unless the chain lists its own.
    pub fn with_default_signers(mut self, signers: &Eip155SignersConfig) -> Self {
        if self.inner.signers.is_none() {
            self.inner.signers = Some(signers.clone());
        }
        self
    }
}

/// Settings of an EVM chain as written in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Eip155ChainConfigInner {
    /// Whether the chain supports EIP-1559 gas pricing.
    #[serde(default = "eip155_chain_config::default_eip1559")]
    pub eip1559: bool,
    /// Whether the chain supports flashblocks.
    #[serde(default)]
    pub flashblocks: bool,
    /// Private keys for this chain. Falls back to the facilitator-wide signers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signers: Option<Eip155SignersConfig>,
    /// RPC endpoints, tried in order with fallback.
    #[serde(default)]
    pub rpc: Vec<RpcConfig>,
    /// How long to wait for a transaction receipt.
    #[serde(default = "eip155_chain_config::default_receipt_timeout_secs")]
    pub receipt_timeout_secs: u64,
}

mod eip155_chain_config {
    pub fn default_eip1559() -> bool {
        true
    }
    pub fn default_receipt_timeout_secs() -> u64 {
        30
    }
}

/// Private keys, each a literal `0x`-prefixed hex string or a `$VAR` reference.
///
/// ```json
/// { "signers": ["$HOT_WALLET_KEY", "0xcafe000000000000000000000000000000000000000000000000000000000001"] }
/// ```
pub type Eip155SignersConfig = Vec<LiteralOrEnv<EvmPrivateKey>>;

/// A 32-byte EVM private key.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvmPrivateKey(B256);

impl EvmPrivateKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_ref()
    }
}

impl std::fmt::Debug for EvmPrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EvmPrivateKey(..)")
    }
}

impl FromStr for EvmPrivateKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        B256::from_str(s)
            .map(Self)
            .map_err(|e| format!("Invalid evm private key: {}", e))
    }
}

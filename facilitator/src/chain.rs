//! Chain bootstrapping.
//!
//! Turns the `chains` configuration into a [`ChainRegistry`] of chain clients. Only EVM
//! (`eip155`) chains are supported; each becomes an
//! [`Eip155ChainClient`](x402_chain_eip155::chain::Eip155ChainClient) behind
//! `Arc<dyn ChainClient>`.

use std::sync::Arc;
use x402_chain_eip155::chain::Eip155ChainClient;
use x402_types::chain::{ChainRegistry, FromConfig};
use x402_types::signer::ChainClient;

use crate::config::ChainsConfig;

/// Creates a chain registry from configuration.
///
/// Chains whose RPC endpoints all reference unset variables are skipped with a warning.
///
/// # Errors
///
/// Returns an error if a chain client fails to initialize or a network is listed twice.
#[async_trait::async_trait]
impl FromConfig<ChainsConfig> for ChainRegistry<Arc<dyn ChainClient>> {
    async fn from_config(chains: &ChainsConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let mut registry = ChainRegistry::new();
        for chain in chains.iter() {
            let chain_id = chain.chain_id();
            if !chain.is_enabled() {
                tracing::warn!(%chain_id, "No RPC endpoint available, chain disabled");
                continue;
            }
            let client = Eip155ChainClient::from_config(chain).await?;
            tracing::info!(
                %chain_id,
                signers = ?client.signer_addresses(),
                "Chain client ready"
            );
            registry.register(chain_id, Arc::new(client) as Arc<dyn ChainClient>)?;
        }
        Ok(registry)
    }
}

//! Chain identifiers and the registry of per-network clients.
//!
//! - [`ChainId`] - A CAIP-2 chain identifier (e.g., `eip155:84532` for Base Sepolia)
//! - [`ChainIdPattern`] - Pattern matching for chain IDs (exact, wildcard, or set)
//! - [`ChainRegistry`] - Network-keyed lookup of chain clients, populated once at startup

mod chain_id;

pub use chain_id::*;

use std::collections::HashMap;

/// Asynchronously constructs an instance of `Self` from a configuration type.
///
/// Used to build chain clients and other startup components from their config
/// sections. Any error returned here is a startup error.
#[async_trait::async_trait]
pub trait FromConfig<TConfig>
where
    Self: Sized,
{
    async fn from_config(config: &TConfig) -> Result<Self, Box<dyn std::error::Error>>;
}

/// Errors raised by [`ChainRegistry`] operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChainRegistryError {
    /// A client is already registered for this network.
    #[error("Network {0} is already registered")]
    DuplicateNetwork(ChainId),
    /// No client is registered for this network.
    #[error("Unknown network {0}")]
    UnknownNetwork(ChainId),
}

/// Registry of chain clients indexed by chain ID.
///
/// The registry is filled during startup via [`ChainRegistry::register`] and then shared
/// behind an `Arc`. It is never mutated afterwards, so concurrent lookups need no locking.
///
/// # Example
///
/// ```
/// use x402_types::chain::{ChainId, ChainRegistry, ChainRegistryError};
///
/// let mut registry = ChainRegistry::default();
/// let base_sepolia = ChainId::new("eip155", "84532");
/// registry.register(base_sepolia.clone(), "client").unwrap();
///
/// assert_eq!(registry.resolve(&base_sepolia), Ok(&"client"));
/// assert_eq!(
///     registry.register(base_sepolia.clone(), "other"),
///     Err(ChainRegistryError::DuplicateNetwork(base_sepolia)),
/// );
/// ```
#[derive(Debug)]
pub struct ChainRegistry<P>(HashMap<ChainId, P>);

impl<P> Default for ChainRegistry<P> {
    fn default() -> Self {
        Self(HashMap::new())
    }
}

impl<P> ChainRegistry<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a client for `network`.
    ///
    /// Fails with [`ChainRegistryError::DuplicateNetwork`] if the network is already present;
    /// the existing client is kept.
    pub fn register(&mut self, network: ChainId, client: P) -> Result<(), ChainRegistryError> {
        if self.0.contains_key(&network) {
            return Err(ChainRegistryError::DuplicateNetwork(network));
        }
        self.0.insert(network, client);
        Ok(())
    }

    /// Looks up the client registered for `network`.
    pub fn resolve(&self, network: &ChainId) -> Result<&P, ChainRegistryError> {
        self.0
            .get(network)
            .ok_or_else(|| ChainRegistryError::UnknownNetwork(network.clone()))
    }

    /// Returns `true` if a client is registered for `network`.
    pub fn contains(&self, network: &ChainId) -> bool {
        self.0.contains_key(network)
    }

    /// Iterates over all registered networks, in no particular order.
    pub fn networks(&self) -> impl Iterator<Item = &ChainId> {
        self.0.keys()
    }

    /// Returns all networks matching the given pattern.
    ///
    /// Used by configuration to bind one scheme to many networks, e.g. `eip155:*`.
    pub fn networks_matching(&self, pattern: &ChainIdPattern) -> Vec<ChainId> {
        let mut networks = self
            .0
            .keys()
            .filter(|chain_id| pattern.matches(chain_id))
            .cloned()
            .collect::<Vec<_>>();
        networks.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
        networks
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_resolve() {
        let mut registry = ChainRegistry::new();
        registry.register(ChainId::new("eip155", "84532"), 1u8).unwrap();
        registry.register(ChainId::new("eip155", "8453"), 2u8).unwrap();

        assert_eq!(registry.resolve(&ChainId::new("eip155", "84532")), Ok(&1));
        assert_eq!(registry.resolve(&ChainId::new("eip155", "8453")), Ok(&2));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_register_duplicate_keeps_first() {
        let mut registry = ChainRegistry::new();
        let network = ChainId::new("eip155", "84532");
        registry.register(network.clone(), 1u8).unwrap();

        let result = registry.register(network.clone(), 2u8);
        assert_eq!(
            result,
            Err(ChainRegistryError::DuplicateNetwork(network.clone()))
        );
        assert_eq!(registry.resolve(&network), Ok(&1));
    }

    #[test]
    fn test_resolve_unknown_network() {
        let registry: ChainRegistry<u8> = ChainRegistry::new();
        let network = ChainId::new("eip155", "1");
        let err = registry.resolve(&network).unwrap_err();
        assert_eq!(err, ChainRegistryError::UnknownNetwork(network));
        assert_eq!(err.to_string(), "Unknown network eip155:1");
    }

    #[test]
    fn test_networks_matching_pattern() {
        let mut registry = ChainRegistry::new();
        registry.register(ChainId::new("eip155", "8453"), ()).unwrap();
        registry.register(ChainId::new("eip155", "84532"), ()).unwrap();
        registry.register(ChainId::new("solana", "devnet"), ()).unwrap();

        let evm = registry.networks_matching(&ChainIdPattern::wildcard("eip155"));
        assert_eq!(
            evm,
            vec![ChainId::new("eip155", "8453"), ChainId::new("eip155", "84532")]
        );

        let exact = registry.networks_matching(&ChainIdPattern::exact("eip155", "84532"));
        assert_eq!(exact, vec![ChainId::new("eip155", "84532")]);
    }
}

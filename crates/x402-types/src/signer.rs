//! The chain-client surface handed to payment schemes.
//!
//! A [`ChainClient`] is one network's connection: an RPC provider plus the facilitator's
//! signing keys for that network. Chain crates implement it; the engine only ever sees
//! `Arc<dyn ChainClient>`.
//!
//! [`SignerAdapter`] is what a [`PaymentScheme`](crate::scheme::PaymentScheme) actually
//! receives. It routes every call to the right client by network and reports failures
//! as [`SignerError::ChainCallFailed`], tagged with the network they happened on.
//!
//! # Routing
//!
//! Each operation takes `network: Option<&ChainId>`:
//!
//! - `Some(network)` resolves the client through the [`ChainRegistry`]. An unregistered
//!   network fails with [`SignerError::UnknownNetwork`].
//! - `None` goes to the configured default network. Only chain-agnostic lookups should
//!   rely on this; a scheme settling a payment always names the payment's network.

use alloy_primitives::{Address, B256, Bytes, TxHash};
use alloy_sol_types::{Eip712Domain, SolCall};
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "telemetry")]
use tracing::instrument;

use crate::chain::{ChainId, ChainRegistry, ChainRegistryError};

/// ABI-encoded call against a contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    pub address: Address,
    pub calldata: Bytes,
}

impl ContractCall {
    pub fn new<C: SolCall>(address: Address, call: &C) -> Self {
        Self {
            address,
            calldata: call.abi_encode().into(),
        }
    }
}

/// A typed-data (EIP-712) signature to check against an expected signer.
///
/// `signing_hash` is the EIP-712 digest of the message under `domain`. The signature may
/// be a plain EOA signature, an EIP-1271 contract signature or an EIP-6492 wrapped one;
/// telling them apart is the client's job.
#[derive(Debug, Clone)]
pub struct TypedDataSignature {
    pub signer: Address,
    pub domain: Eip712Domain,
    pub primary_type: String,
    pub signing_hash: B256,
    pub signature: Bytes,
}

/// Mined transaction, as reported by [`ChainClient::wait_for_receipt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionOutcome {
    pub transaction: TxHash,
    /// `false` if the transaction reverted.
    pub success: bool,
    pub block_number: Option<u64>,
}

/// Opaque failure of a single chain call.
#[derive(Debug)]
pub struct ChainClientError(Box<dyn std::error::Error + Send + Sync>);

impl ChainClientError {
    pub fn new<E: Into<Box<dyn std::error::Error + Send + Sync>>>(error: E) -> Self {
        Self(error.into())
    }
}

impl fmt::Display for ChainClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for ChainClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

/// One network's chain connection.
#[async_trait::async_trait]
pub trait ChainClient: Send + Sync {
    fn chain_id(&self) -> &ChainId;

    /// Addresses the facilitator signs with on this network.
    fn signer_addresses(&self) -> Vec<String>;

    /// Deployed bytecode at `address`; empty for EOAs and undeployed wallets.
    async fn get_code(&self, address: Address) -> Result<Bytes, ChainClientError>;

    /// Executes a read-only call and returns the ABI-encoded result.
    async fn read_contract(&self, call: ContractCall) -> Result<Bytes, ChainClientError>;

    async fn verify_typed_data(
        &self,
        signature: TypedDataSignature,
    ) -> Result<bool, ChainClientError>;

    /// Simulates the call, then submits it as a transaction.
    async fn write_contract(&self, call: ContractCall) -> Result<TxHash, ChainClientError>;

    /// Submits the transaction without simulating it first.
    async fn send_transaction(&self, call: ContractCall) -> Result<TxHash, ChainClientError>;

    async fn wait_for_receipt(&self, tx: TxHash) -> Result<TransactionOutcome, ChainClientError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    #[error("Unknown network {0}")]
    UnknownNetwork(ChainId),
    #[error("No network given and no default network configured")]
    NoDefaultNetwork,
    #[error("Chain call failed on {network}: {cause}")]
    ChainCallFailed {
        network: ChainId,
        #[source]
        cause: ChainClientError,
    },
}

impl From<ChainRegistryError> for SignerError {
    fn from(value: ChainRegistryError) -> Self {
        match value {
            ChainRegistryError::UnknownNetwork(network)
            | ChainRegistryError::DuplicateNetwork(network) => SignerError::UnknownNetwork(network),
        }
    }
}

/// Network-routed access to chain clients.
#[derive(Clone)]
pub struct SignerAdapter {
    chains: Arc<ChainRegistry<Arc<dyn ChainClient>>>,
    default_network: Option<ChainId>,
}

impl fmt::Debug for SignerAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignerAdapter")
            .field("networks", &self.chains.networks().collect::<Vec<_>>())
            .field("default_network", &self.default_network)
            .finish()
    }
}

impl SignerAdapter {
    /// Fails if `default_network` is given but not registered.
    pub fn new(
        chains: Arc<ChainRegistry<Arc<dyn ChainClient>>>,
        default_network: Option<ChainId>,
    ) -> Result<Self, SignerError> {
        if let Some(network) = &default_network {
            chains.resolve(network)?;
        }
        Ok(Self {
            chains,
            default_network,
        })
    }

    pub fn chains(&self) -> &ChainRegistry<Arc<dyn ChainClient>> {
        &self.chains
    }

    pub fn default_network(&self) -> Option<&ChainId> {
        self.default_network.as_ref()
    }

    pub fn contains(&self, network: &ChainId) -> bool {
        self.chains.contains(network)
    }

    pub fn networks(&self) -> impl Iterator<Item = &ChainId> {
        self.chains.networks()
    }

    fn client<'a>(
        &'a self,
        network: Option<&'a ChainId>,
    ) -> Result<(&'a ChainId, &'a Arc<dyn ChainClient>), SignerError> {
        let network = match network.or(self.default_network.as_ref()) {
            Some(network) => network,
            None => return Err(SignerError::NoDefaultNetwork),
        };
        let client = self.chains.resolve(network)?;
        Ok((network, client))
    }

    fn failed(network: &ChainId, cause: ChainClientError) -> SignerError {
        tracing::debug!(%network, error = %cause, "chain call failed");
        SignerError::ChainCallFailed {
            network: network.clone(),
            cause,
        }
    }

    pub fn signer_addresses(&self, network: Option<&ChainId>) -> Result<Vec<String>, SignerError> {
        let (_, client) = self.client(network)?;
        Ok(client.signer_addresses())
    }

    #[cfg_attr(feature = "telemetry", instrument(skip_all, err, fields(%address)))]
    pub async fn get_code(
        &self,
        network: Option<&ChainId>,
        address: Address,
    ) -> Result<Bytes, SignerError> {
        let (network, client) = self.client(network)?;
        client
            .get_code(address)
            .await
            .map_err(|e| Self::failed(network, e))
    }

    #[cfg_attr(feature = "telemetry", instrument(skip_all, err, fields(address = %call.address)))]
    pub async fn read_contract(
        &self,
        network: Option<&ChainId>,
        call: ContractCall,
    ) -> Result<Bytes, SignerError> {
        let (network, client) = self.client(network)?;
        client
            .read_contract(call)
            .await
            .map_err(|e| Self::failed(network, e))
    }

    /// Calls a view function and decodes its return value.
    pub async fn read<C: SolCall + Send + Sync>(
        &self,
        network: Option<&ChainId>,
        address: Address,
        call: &C,
    ) -> Result<C::Return, SignerError> {
        let (network, client) = self.client(network)?;
        let output = client
            .read_contract(ContractCall::new(address, call))
            .await
            .map_err(|e| Self::failed(network, e))?;
        C::abi_decode_returns(&output).map_err(|e| Self::failed(network, ChainClientError::new(e)))
    }

    #[cfg_attr(feature = "telemetry", instrument(skip_all, err, fields(signer = %signature.signer)))]
    pub async fn verify_typed_data(
        &self,
        network: Option<&ChainId>,
        signature: TypedDataSignature,
    ) -> Result<bool, SignerError> {
        let (network, client) = self.client(network)?;
        client
            .verify_typed_data(signature)
            .await
            .map_err(|e| Self::failed(network, e))
    }

    #[cfg_attr(feature = "telemetry", instrument(skip_all, err, fields(address = %call.address)))]
    pub async fn write_contract(
        &self,
        network: Option<&ChainId>,
        call: ContractCall,
    ) -> Result<TxHash, SignerError> {
        let (network, client) = self.client(network)?;
        client
            .write_contract(call)
            .await
            .map_err(|e| Self::failed(network, e))
    }

    #[cfg_attr(feature = "telemetry", instrument(skip_all, err, fields(to = %call.address)))]
    pub async fn send_transaction(
        &self,
        network: Option<&ChainId>,
        call: ContractCall,
    ) -> Result<TxHash, SignerError> {
        let (network, client) = self.client(network)?;
        client
            .send_transaction(call)
            .await
            .map_err(|e| Self::failed(network, e))
    }

    #[cfg_attr(feature = "telemetry", instrument(skip_all, err, fields(%tx)))]
    pub async fn wait_for_receipt(
        &self,
        network: Option<&ChainId>,
        tx: TxHash,
    ) -> Result<TransactionOutcome, SignerError> {
        let (network, client) = self.client(network)?;
        client
            .wait_for_receipt(tx)
            .await
            .map_err(|e| Self::failed(network, e))
    }
}

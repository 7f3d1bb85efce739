use alloy_network::{Ethereum as AlloyEthereum, EthereumWallet, NetworkWallet, TransactionBuilder};
use alloy_primitives::{Address, B256, Bytes, TxHash};
use alloy_provider::fillers::{
    BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller, WalletFiller,
};
use alloy_provider::{
    Identity, PendingTransactionBuilder, PendingTransactionError, Provider, ProviderBuilder,
    RootProvider,
};
use alloy_rpc_client::RpcClient;
use alloy_rpc_types_eth::{BlockId, TransactionRequest};
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::SolCall;
use alloy_transport::TransportError;
use alloy_transport::layers::{FallbackLayer, ThrottleLayer};
use alloy_transport_http::Http;
use dashmap::DashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tower::ServiceBuilder;
use url::Url;
use x402_types::chain::{ChainId, FromConfig};
use x402_types::signer::{
    ChainClient, ChainClientError, ContractCall, TransactionOutcome, TypedDataSignature,
};

#[cfg(feature = "telemetry")]
use tracing::instrument;

use crate::chain::config::Eip155ChainConfig;
use crate::chain::pending_nonce_manager::PendingNonceManager;
use crate::chain::signature::{IValidator6492, StructuredSignature, VALIDATOR_ADDRESS};
use crate::chain::types::Eip155ChainReference;

/// Combined filler type for gas, blob gas, nonce, and chain ID.
pub type InnerFiller = JoinFill<
    GasFiller,
    JoinFill<BlobGasFiller, JoinFill<NonceFiller<PendingNonceManager>, ChainIdFiller>>,
>;

/// The composed provider: fillers, then wallet signing, over a [`RootProvider`].
pub type InnerProvider = FillProvider<
    JoinFill<JoinFill<Identity, InnerFiller>, WalletFiller<EthereumWallet>>,
    RootProvider,
>;

#[derive(Debug, thiserror::Error)]
pub enum Eip155ClientError {
    #[error("At least one signer must be configured for {0}")]
    NoSigners(ChainId),
    #[error("Invalid signer key for {chain}: {reason}")]
    InvalidSigner { chain: ChainId, reason: String },
    #[error("No usable RPC endpoint for {0}")]
    NoRpcEndpoint(ChainId),
    #[error("Transaction simulation failed: {0}")]
    Simulation(TransportError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    PendingTransaction(#[from] PendingTransactionError),
    #[error("Invalid contract response: {0}")]
    Decode(#[from] alloy_sol_types::Error),
}

impl From<Eip155ClientError> for ChainClientError {
    fn from(value: Eip155ClientError) -> Self {
        ChainClientError::new(value)
    }
}

/// [`ChainClient`] for an EVM chain.
///
/// - Transactions are signed by the configured keys in round-robin order.
/// - Nonces come from [`PendingNonceManager`] and are reset whenever a submission or a
///   receipt wait fails, since the transaction may or may not have reached the mempool.
/// - Gas is priced by EIP-1559 fillers, or with `eth_gasPrice` on legacy chains.
/// - Receipt waits are bounded by `receiptTimeoutSecs`.
#[derive(Debug)]
pub struct Eip155ChainClient {
    chain_id: ChainId,
    chain: Eip155ChainReference,
    eip1559: bool,
    flashblocks: bool,
    receipt_timeout: Duration,
    inner: InnerProvider,
    signer_addresses: Arc<Vec<Address>>,
    signer_cursor: Arc<AtomicUsize>,
    nonce_manager: PendingNonceManager,
    /// Sender of every submitted transaction whose receipt has not been seen yet.
    in_flight: DashMap<TxHash, Address>,
}

impl Eip155ChainClient {
    /// JSON-RPC client over every endpoint, throttled per endpoint, with fallback between them.
    pub fn rpc_client(
        chain_id: &ChainId,
        endpoints: &[(Url, Option<u32>)],
    ) -> Result<RpcClient, Eip155ClientError> {
        let transport_count = NonZeroUsize::new(endpoints.len())
            .ok_or_else(|| Eip155ClientError::NoRpcEndpoint(chain_id.clone()))?;
        let transports = endpoints
            .iter()
            .map(|(url, rate_limit)| {
                tracing::info!(chain = %chain_id, rpc_url = %url, ?rate_limit, "Using HTTP transport");
                ServiceBuilder::new()
                    .layer(ThrottleLayer::new(rate_limit.unwrap_or(u32::MAX)))
                    .service(Http::new(url.clone()))
            })
            .collect::<Vec<_>>();
        let fallback = ServiceBuilder::new()
            .layer(FallbackLayer::default().with_active_transport_count(transport_count))
            .service(transports);
        Ok(RpcClient::new(fallback, false))
    }

    pub fn chain(&self) -> Eip155ChainReference {
        self.chain
    }

    pub fn provider(&self) -> &InnerProvider {
        &self.inner
    }

    fn next_signer_address(&self) -> Address {
        if self.signer_addresses.len() == 1 {
            self.signer_addresses[0]
        } else {
            let next =
                self.signer_cursor.fetch_add(1, Ordering::Relaxed) % self.signer_addresses.len();
            self.signer_addresses[next]
        }
    }

    fn request(call: ContractCall) -> TransactionRequest {
        TransactionRequest::default()
            .with_to(call.address)
            .with_input(call.calldata)
    }

    async fn call(&self, request: TransactionRequest) -> Result<Bytes, TransportError> {
        self.inner.call(request).await
    }

    /// Asks the universal validator whether `signature` is valid for `signer` over `hash`.
    ///
    /// A reverted validation counts as an invalid signature.
    async fn validate_with_contract(
        &self,
        signer: Address,
        hash: B256,
        signature: Bytes,
    ) -> Result<bool, Eip155ClientError> {
        let call = IValidator6492::isValidSigWithSideEffectsCall {
            _signer: signer,
            _hash: hash,
            _signature: signature,
        };
        let request = Self::request(ContractCall::new(VALIDATOR_ADDRESS, &call));
        match self.call(request).await {
            Ok(output) => {
                Ok(IValidator6492::isValidSigWithSideEffectsCall::abi_decode_returns(&output)?)
            }
            Err(error) if error.as_error_resp().is_some() => {
                tracing::debug!(%signer, %error, "Signature validator reverted");
                Ok(false)
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn submit(
        &self,
        call: ContractCall,
        simulate: bool,
    ) -> Result<TxHash, Eip155ClientError> {
        let from_address = self.next_signer_address();
        let mut txr = Self::request(call).with_from(from_address);

        if simulate {
            self.call(txr.clone())
                .await
                .map_err(Eip155ClientError::Simulation)?;
        }

        if !self.eip1559 {
            let gas: u128 = self.inner.get_gas_price().await?;
            txr.set_gas_price(gas);
        }

        let block_id = if self.flashblocks {
            BlockId::latest()
        } else {
            BlockId::pending()
        };
        let gas_limit = self.inner.estimate_gas(txr.clone()).block(block_id).await?;
        txr.set_gas_limit(gas_limit);

        match self.inner.send_transaction(txr).await {
            Ok(pending) => {
                let tx_hash = *pending.tx_hash();
                self.in_flight.insert(tx_hash, from_address);
                tracing::debug!(chain = %self.chain_id, from = %from_address, %tx_hash, "Transaction submitted");
                Ok(tx_hash)
            }
            Err(e) => {
                self.nonce_manager.reset_nonce(from_address).await;
                Err(e.into())
            }
        }
    }
}

/// Builds the client: signers, then transports, then the provider.
///
/// Fails if no signer is configured, a key is invalid or no RPC endpoint resolved.
#[async_trait::async_trait]
impl FromConfig<Eip155ChainConfig> for Eip155ChainClient {
    async fn from_config(config: &Eip155ChainConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let chain_id = config.chain_id();

        // 1. Signers
        let keys = config.signers().map(Vec::as_slice).unwrap_or_default();
        let mut signers = keys.iter().map(|key| {
            PrivateKeySigner::from_bytes(&B256::from_slice(key.inner().as_bytes()))
                .map(|s| s.with_chain_id(Some(config.chain_reference().inner())))
                .map_err(|e| Eip155ClientError::InvalidSigner {
                    chain: chain_id.clone(),
                    reason: e.to_string(),
                })
        });
        let mut wallet = match signers.next() {
            Some(first) => EthereumWallet::from(first?),
            None => return Err(Eip155ClientError::NoSigners(chain_id).into()),
        };
        for signer in signers {
            wallet.register_signer(signer?);
        }
        let signer_addresses =
            NetworkWallet::<AlloyEthereum>::signer_addresses(&wallet).collect::<Vec<_>>();

        // 2. Transports
        let client = Self::rpc_client(&chain_id, &config.rpc_endpoints())?;

        // 3. Provider, with the nonce manager kept for resets
        let nonce_manager = PendingNonceManager::default();
        let filler = JoinFill::new(
            GasFiller,
            JoinFill::new(
                BlobGasFiller::default(),
                JoinFill::new(
                    NonceFiller::new(nonce_manager.clone()),
                    ChainIdFiller::default(),
                ),
            ),
        );
        let inner: InnerProvider = ProviderBuilder::default()
            .filler(filler)
            .wallet(wallet)
            .connect_client(client);

        tracing::info!(chain = %chain_id, signers = ?signer_addresses, "Using EVM provider");

        Ok(Self {
            chain_id,
            chain: config.chain_reference(),
            eip1559: config.eip1559(),
            flashblocks: config.flashblocks(),
            receipt_timeout: Duration::from_secs(config.receipt_timeout_secs()),
            inner,
            signer_addresses: Arc::new(signer_addresses),
            signer_cursor: Arc::new(AtomicUsize::new(0)),
            nonce_manager,
            in_flight: DashMap::new(),
        })
    }
}

#[async_trait::async_trait]
impl ChainClient for Eip155ChainClient {
    fn chain_id(&self) -> &ChainId {
        &self.chain_id
    }

    fn signer_addresses(&self) -> Vec<String> {
        self.signer_addresses.iter().map(|a| a.to_string()).collect()
    }

    async fn get_code(&self, address: Address) -> Result<Bytes, ChainClientError> {
        let code = self
            .inner
            .get_code_at(address)
            .await
            .map_err(Eip155ClientError::from)?;
        Ok(code)
    }

    async fn read_contract(&self, call: ContractCall) -> Result<Bytes, ChainClientError> {
        let output = self
            .call(Self::request(call))
            .await
            .map_err(Eip155ClientError::from)?;
        Ok(output)
    }

    /// EOA signatures are checked locally. Everything else goes through the universal
    /// validator, which covers deployed (EIP-1271) and counterfactual (EIP-6492) wallets.
    #[cfg_attr(feature = "telemetry", instrument(skip_all, err, fields(signer = %signature.signer, primary_type = %signature.primary_type)))]
    async fn verify_typed_data(
        &self,
        signature: TypedDataSignature,
    ) -> Result<bool, ChainClientError> {
        let structured = match StructuredSignature::try_from_bytes(
            signature.signature,
            signature.signer,
            &signature.signing_hash,
        ) {
            Ok(structured) => structured,
            Err(error) => {
                tracing::debug!(signer = %signature.signer, %error, "Unparseable signature");
                return Ok(false);
            }
        };
        let contract_signature = match structured {
            StructuredSignature::Eoa(_) => return Ok(true),
            StructuredSignature::Eip6492 { original, .. } => original,
            StructuredSignature::Eip1271(bytes) => bytes,
        };
        let is_valid = self
            .validate_with_contract(signature.signer, signature.signing_hash, contract_signature)
            .await?;
        Ok(is_valid)
    }

    #[cfg_attr(feature = "telemetry", instrument(skip_all, err, fields(chain = %self.chain_id, to = %call.address)))]
    async fn write_contract(&self, call: ContractCall) -> Result<TxHash, ChainClientError> {
        Ok(self.submit(call, true).await?)
    }

    #[cfg_attr(feature = "telemetry", instrument(skip_all, err, fields(chain = %self.chain_id, to = %call.address)))]
    async fn send_transaction(&self, call: ContractCall) -> Result<TxHash, ChainClientError> {
        Ok(self.submit(call, false).await?)
    }

    #[cfg_attr(feature = "telemetry", instrument(skip_all, err, fields(chain = %self.chain_id, %tx)))]
    async fn wait_for_receipt(&self, tx: TxHash) -> Result<TransactionOutcome, ChainClientError> {
        let watcher = PendingTransactionBuilder::new(self.inner.root().clone(), tx)
            .with_required_confirmations(1)
            .with_timeout(Some(self.receipt_timeout));
        let result = watcher.get_receipt().await;
        let sender = self.in_flight.remove(&tx).map(|(_, sender)| sender);
        match result {
            Ok(receipt) => Ok(TransactionOutcome {
                transaction: receipt.transaction_hash,
                success: receipt.status(),
                block_number: receipt.block_number,
            }),
            Err(e) => {
                if let Some(sender) = sender {
                    self.nonce_manager.reset_nonce(sender).await;
                }
                Err(Eip155ClientError::from(e).into())
            }
        }
    }
}

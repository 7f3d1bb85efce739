//! The `exact` payment scheme on EVM chains.
//!
//! The payer signs an ERC-3009 `transferWithAuthorization` for the token named by
//! `requirements.asset`. The facilitator checks the authorization, then submits it and pays
//! the gas.
//!
//! Validation, in order:
//!
//! 1. the accepted requirements equal the requirements, on an EIP-155 network. A differing
//!    network or asset is reported as such, any other difference as a general mismatch
//! 2. the payload parses
//! 3. the recipient is `payTo`
//! 4. the authorization is valid now, with a 6-second margin before expiry
//! 5. the signed value covers `amount`
//! 6. the EIP-712 domain is known, from `extra` or the token contract
//! 7. the payer's balance covers `amount`
//! 8. the signature is valid for the payer
//!
//! Settlement re-runs validation, deploys a counterfactual wallet if allowed, then calls
//! `transferWithAuthorization` and waits for the receipt.

pub mod types;

use alloy_primitives::{Address, B256, Bytes, U256};
use alloy_sol_types::{Eip712Domain, SolStruct, eip712_domain};
use std::sync::Arc;
use x402_types::chain::ChainId;
use x402_types::proto::PaymentVerificationError;
use x402_types::proto::v2;
use x402_types::scheme::{
    PaymentScheme, SchemeBlueprint, SchemeError, SettledPayment, VerifiedPayment,
};
use x402_types::signer::{ContractCall, SignerAdapter, TypedDataSignature};
use x402_types::timestamp::UnixTimestamp;

#[cfg(feature = "telemetry")]
use tracing::instrument;

use crate::chain::{EIP155_NAMESPACE, Eip155ChainReference, StructuredSignature};

pub use types::*;

/// Seconds an authorization must stay valid beyond now to be accepted.
const EXPIRY_MARGIN_SECS: u64 = 6;

/// A payment that passed validation, with everything settlement needs.
#[derive(Debug, Clone)]
pub struct ValidatedTransfer {
    pub network: ChainId,
    pub asset: Address,
    pub authorization: ExactEvmPayloadAuthorization,
    pub domain: Eip712Domain,
    pub signing_hash: B256,
    pub signature: StructuredSignature,
}

impl ValidatedTransfer {
    pub fn payer(&self) -> Address {
        self.authorization.from
    }

    /// The `transferWithAuthorization` call for this payment.
    ///
    /// EOA signatures use the `(v, r, s)` overload, everything else the `bytes` one.
    pub fn transfer_call(&self) -> ContractCall {
        let auth = &self.authorization;
        let value: U256 = auth.value.into();
        let valid_after = U256::from(auth.valid_after.as_secs());
        let valid_before = U256::from(auth.valid_before.as_secs());
        match &self.signature {
            StructuredSignature::Eoa(signature) => {
                let call = IEIP3009::transferWithAuthorization_1Call {
                    from: auth.from,
                    to: auth.to,
                    value,
                    validAfter: valid_after,
                    validBefore: valid_before,
                    nonce: auth.nonce,
                    v: 27 + signature.v() as u8,
                    r: B256::from(signature.r()),
                    s: B256::from(signature.s()),
                };
                ContractCall::new(self.asset, &call)
            }
            StructuredSignature::Eip6492 { inner, .. } => {
                ContractCall::new(self.asset, &self.bytes_transfer(inner.clone()))
            }
            StructuredSignature::Eip1271(bytes) => {
                ContractCall::new(self.asset, &self.bytes_transfer(bytes.clone()))
            }
        }
    }

    fn bytes_transfer(&self, signature: Bytes) -> IEIP3009::transferWithAuthorization_0Call {
        let auth = &self.authorization;
        IEIP3009::transferWithAuthorization_0Call {
            from: auth.from,
            to: auth.to,
            value: auth.value.into(),
            validAfter: U256::from(auth.valid_after.as_secs()),
            validBefore: U256::from(auth.valid_before.as_secs()),
            nonce: auth.nonce,
            signature,
        }
    }
}

/// Checks the authorization window against `now`.
pub fn assert_time(
    valid_after: UnixTimestamp,
    valid_before: UnixTimestamp,
    now: UnixTimestamp,
) -> Result<(), PaymentVerificationError> {
    if valid_before < now + EXPIRY_MARGIN_SECS {
        return Err(PaymentVerificationError::Expired);
    }
    if valid_after > now {
        return Err(PaymentVerificationError::Early);
    }
    Ok(())
}

/// `exact` scheme over ERC-3009 tokens.
#[derive(Debug, Clone, Default)]
pub struct ExactEvmScheme {
    config: ExactEvmConfig,
}

impl ExactEvmScheme {
    pub fn new(config: ExactEvmConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExactEvmConfig {
        &self.config
    }

    /// Runs every validation step and returns the transfer to settle.
    #[cfg_attr(feature = "telemetry", instrument(skip_all, err, fields(network = %requirements.network)))]
    pub async fn check(
        &self,
        payload: &v2::PaymentPayload,
        requirements: &v2::PaymentRequirements,
        signer: &SignerAdapter,
    ) -> Result<ValidatedTransfer, SchemeError> {
        let requirements: PaymentRequirements = requirements.as_concrete()?;
        let accepted: PaymentRequirements = payload
            .accepted
            .as_concrete()
            .map_err(|_| PaymentVerificationError::AcceptedRequirementsMismatch)?;
        if accepted.network != requirements.network {
            return Err(PaymentVerificationError::ChainIdMismatch.into());
        }
        if accepted.asset != requirements.asset {
            return Err(PaymentVerificationError::AssetMismatch.into());
        }
        if accepted != requirements {
            return Err(PaymentVerificationError::AcceptedRequirementsMismatch.into());
        }
        if requirements.scheme != EXACT_SCHEME {
            return Err(PaymentVerificationError::UnsupportedScheme.into());
        }
        let chain = Eip155ChainReference::try_from(&requirements.network)
            .map_err(|_| PaymentVerificationError::UnsupportedChain)?;
        let network = requirements.network.clone();

        let exact: ExactEvmPayload = serde_json::from_value(payload.payload.clone())
            .map_err(PaymentVerificationError::from)?;
        let authorization = exact.authorization;

        if authorization.to != requirements.pay_to {
            return Err(PaymentVerificationError::RecipientMismatch.into());
        }
        assert_time(
            authorization.valid_after,
            authorization.valid_before,
            UnixTimestamp::now(),
        )?;
        if authorization.value < requirements.amount {
            return Err(PaymentVerificationError::InvalidPaymentAmount.into());
        }

        let asset: Address = requirements.asset.into();
        let domain = self
            .domain(signer, &network, chain, asset, requirements.extra.as_ref())
            .await?;

        let balance = signer
            .read(
                Some(&network),
                asset,
                &IEIP3009::balanceOfCall {
                    account: authorization.from,
                },
            )
            .await?;
        let required: U256 = requirements.amount.into();
        if balance < required {
            return Err(PaymentVerificationError::InsufficientFunds.into());
        }

        let signing_hash =
            TransferWithAuthorization::from(&authorization).eip712_signing_hash(&domain);
        let signature = StructuredSignature::try_from_bytes(
            exact.signature.clone(),
            authorization.from,
            &signing_hash,
        )
        .map_err(|e| PaymentVerificationError::InvalidSignature(e.to_string()))?;
        let is_valid = signer
            .verify_typed_data(
                Some(&network),
                TypedDataSignature {
                    signer: authorization.from,
                    domain: domain.clone(),
                    primary_type: "TransferWithAuthorization".to_string(),
                    signing_hash,
                    signature: exact.signature,
                },
            )
            .await?;
        if !is_valid {
            return Err(PaymentVerificationError::InvalidSignature(
                "Signature does not match the payer".to_string(),
            )
            .into());
        }

        Ok(ValidatedTransfer {
            network,
            asset,
            authorization,
            domain,
            signing_hash,
            signature,
        })
    }

    /// EIP-712 domain of the token: name and version from `extra`, else from the contract.
    async fn domain(
        &self,
        signer: &SignerAdapter,
        network: &ChainId,
        chain: Eip155ChainReference,
        asset: Address,
        extra: Option<&PaymentRequirementsExtra>,
    ) -> Result<Eip712Domain, SchemeError> {
        let (name, version) = match extra {
            Some(extra) => (extra.name.clone(), extra.version.clone()),
            None => {
                let name = signer
                    .read(Some(network), asset, &IEIP3009::nameCall {})
                    .await?;
                let version = signer
                    .read(Some(network), asset, &IEIP3009::versionCall {})
                    .await?;
                (name, version)
            }
        };
        Ok(eip712_domain! {
            name: name,
            version: version,
            chain_id: chain.inner(),
            verifying_contract: asset,
        })
    }

    /// Deploys the payer's wallet if it is counterfactual and has no code yet.
    async fn deploy_if_needed(
        &self,
        signer: &SignerAdapter,
        transfer: &ValidatedTransfer,
    ) -> Result<(), SchemeError> {
        let StructuredSignature::Eip6492 {
            factory,
            factory_calldata,
            ..
        } = &transfer.signature
        else {
            return Ok(());
        };
        let network = Some(&transfer.network);
        let code = signer.get_code(network, transfer.payer()).await?;
        if !code.is_empty() {
            return Ok(());
        }
        if !self.config.deploy_erc4337_with_eip6492 {
            return Err(SchemeError::OnchainFailure(
                "undeployed smart wallet".to_string(),
            ));
        }
        let deployment = ContractCall {
            address: *factory,
            calldata: factory_calldata.clone(),
        };
        let tx = signer.send_transaction(network, deployment).await?;
        let outcome = signer.wait_for_receipt(network, tx).await?;
        if !outcome.success {
            return Err(SchemeError::OnchainFailure(format!(
                "Smart wallet deployment {tx} reverted"
            )));
        }
        tracing::info!(
            network = %transfer.network,
            wallet = %transfer.payer(),
            %tx,
            "Deployed counterfactual wallet"
        );
        Ok(())
    }
}

#[async_trait::async_trait]
impl PaymentScheme for ExactEvmScheme {
    fn scheme(&self) -> &str {
        EXACT_SCHEME
    }

    fn namespace(&self) -> &str {
        EIP155_NAMESPACE
    }

    /// `asset:payer:nonce`, as ERC-3009 nonces are single-use per payer and token.
    fn payment_id(&self, payload: &v2::PaymentPayload) -> Option<String> {
        let payload: PaymentPayload = payload.as_concrete().ok()?;
        let authorization = payload.payload.authorization;
        Some(format!(
            "{}:{}:{}",
            Address::from(payload.accepted.asset),
            authorization.from,
            authorization.nonce
        ))
    }

    async fn validate(
        &self,
        payload: &v2::PaymentPayload,
        requirements: &v2::PaymentRequirements,
        signer: &SignerAdapter,
    ) -> Result<VerifiedPayment, SchemeError> {
        let transfer = self.check(payload, requirements, signer).await?;
        Ok(VerifiedPayment {
            payer: transfer.payer().to_string(),
        })
    }

    #[cfg_attr(feature = "telemetry", instrument(skip_all, err, fields(network = %requirements.network)))]
    async fn execute(
        &self,
        payload: &v2::PaymentPayload,
        requirements: &v2::PaymentRequirements,
        signer: &SignerAdapter,
    ) -> Result<SettledPayment, SchemeError> {
        let transfer = self.check(payload, requirements, signer).await?;
        self.deploy_if_needed(signer, &transfer).await?;

        let network = Some(&transfer.network);
        let tx = signer
            .write_contract(network, transfer.transfer_call())
            .await?;
        let outcome = signer.wait_for_receipt(network, tx).await?;
        if !outcome.success {
            return Err(SchemeError::OnchainFailure(format!(
                "Transaction {tx} reverted"
            )));
        }
        Ok(SettledPayment {
            payer: transfer.payer().to_string(),
            transaction: tx.to_string(),
        })
    }
}

/// Builds [`ExactEvmScheme`] from an optional [`ExactEvmConfig`] object.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactEvmBlueprint;

impl SchemeBlueprint for ExactEvmBlueprint {
    fn id(&self) -> &str {
        EXACT_SCHEME
    }

    fn build(
        &self,
        config: Option<&serde_json::Value>,
    ) -> Result<Arc<dyn PaymentScheme>, Box<dyn std::error::Error>> {
        let config = match config {
            Some(config) => serde_json::from_value(config.clone())?,
            None => ExactEvmConfig::default(),
        };
        Ok(Arc::new(ExactEvmScheme::new(config)))
    }
}

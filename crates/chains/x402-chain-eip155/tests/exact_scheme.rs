//! The `exact` scheme against an in-memory ERC-3009 token.

use alloy_primitives::{Address, B256, Bytes, TxHash, U256, address};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{Eip712Domain, SolCall, SolStruct, SolValue, eip712_domain};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use x402_chain_eip155::chain::{EIP6492_MAGIC_SUFFIX, StructuredSignature};
use x402_chain_eip155::exact::{IEIP3009, TransferWithAuthorization};
use x402_chain_eip155::{ExactEvmBlueprint, ExactEvmScheme};
use x402_facilitator_local::FacilitatorCore;
use x402_facilitator_local::hooks::LifecycleHooks;
use x402_facilitator_local::verification::{InMemoryVerificationStore, VerificationTracker};
use x402_types::chain::{ChainId, ChainRegistry};
use x402_types::facilitator::Facilitator;
use x402_types::proto::v2::{PaymentPayload, PaymentRequirements};
use x402_types::proto::{PaymentVerificationError, SettleResponse, VerifyRequest, VerifyResponse};
use x402_types::scheme::{PaymentScheme, SchemeBlueprint, SchemeError, SchemeRegistry};
use x402_types::signer::{
    ChainClient, ChainClientError, ContractCall, SignerAdapter, TransactionOutcome,
    TypedDataSignature,
};
use x402_types::timestamp::UnixTimestamp;

const ASSET: Address = address!("0x036CbD53842c5426634e7929541eC2318f3dCF7e");
const PAY_TO: Address = address!("0x209693Bc6afc0C5328bA36FaF03C514EF312287C");
const FACTORY: Address = address!("0x00000000000000000000000000000000000fac70");
const TRANSFER_TX: TxHash = TxHash::repeat_byte(0xaa);
const DEPLOY_TX: TxHash = TxHash::repeat_byte(0xde);

fn base_sepolia() -> ChainId {
    ChainId::new("eip155", "84532")
}

/// ERC-3009 token with a single balance, plus the payer's wallet code.
struct TokenChain {
    chain_id: ChainId,
    balance: U256,
    wallet_code: Mutex<Bytes>,
    contract_signatures_valid: bool,
    transfer_reverts: bool,
    submitted: Mutex<Vec<ContractCall>>,
}

impl TokenChain {
    fn new(balance: u64) -> Self {
        Self {
            chain_id: base_sepolia(),
            balance: U256::from(balance),
            wallet_code: Mutex::new(Bytes::new()),
            contract_signatures_valid: false,
            transfer_reverts: false,
            submitted: Mutex::new(Vec::new()),
        }
    }

    fn submitted(&self) -> Vec<ContractCall> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ChainClient for TokenChain {
    fn chain_id(&self) -> &ChainId {
        &self.chain_id
    }

    fn signer_addresses(&self) -> Vec<String> {
        vec!["0x00000000000000000000000000000000000000fa".into()]
    }

    async fn get_code(&self, _address: Address) -> Result<Bytes, ChainClientError> {
        Ok(self.wallet_code.lock().unwrap().clone())
    }

    async fn read_contract(&self, call: ContractCall) -> Result<Bytes, ChainClientError> {
        assert_eq!(call.address, ASSET);
        let selector: [u8; 4] = call.calldata[..4].try_into().unwrap();
        let output = if selector == IEIP3009::nameCall::SELECTOR {
            IEIP3009::nameCall::abi_encode_returns(&"USD Coin".to_string())
        } else if selector == IEIP3009::versionCall::SELECTOR {
            IEIP3009::versionCall::abi_encode_returns(&"2".to_string())
        } else if selector == IEIP3009::balanceOfCall::SELECTOR {
            IEIP3009::balanceOfCall::abi_encode_returns(&self.balance)
        } else {
            return Err(ChainClientError::new("unknown selector"));
        };
        Ok(output.into())
    }

    async fn verify_typed_data(
        &self,
        signature: TypedDataSignature,
    ) -> Result<bool, ChainClientError> {
        let structured = StructuredSignature::try_from_bytes(
            signature.signature,
            signature.signer,
            &signature.signing_hash,
        );
        Ok(match structured {
            Ok(StructuredSignature::Eoa(_)) => true,
            Ok(_) => self.contract_signatures_valid,
            Err(_) => false,
        })
    }

    async fn write_contract(&self, call: ContractCall) -> Result<TxHash, ChainClientError> {
        self.submitted.lock().unwrap().push(call);
        Ok(TRANSFER_TX)
    }

    async fn send_transaction(&self, call: ContractCall) -> Result<TxHash, ChainClientError> {
        self.submitted.lock().unwrap().push(call);
        *self.wallet_code.lock().unwrap() = Bytes::from_static(&[0x60, 0x80]);
        Ok(DEPLOY_TX)
    }

    async fn wait_for_receipt(&self, tx: TxHash) -> Result<TransactionOutcome, ChainClientError> {
        Ok(TransactionOutcome {
            transaction: tx,
            success: !(self.transfer_reverts && tx == TRANSFER_TX),
            block_number: Some(7),
        })
    }
}

fn adapter(chain: Arc<TokenChain>) -> SignerAdapter {
    let mut chains: ChainRegistry<Arc<dyn ChainClient>> = ChainRegistry::new();
    chains.register(base_sepolia(), chain).unwrap();
    SignerAdapter::new(Arc::new(chains), None).unwrap()
}

fn domain() -> Eip712Domain {
    eip712_domain! {
        name: "USD Coin".to_string(),
        version: "2".to_string(),
        chain_id: 84532,
        verifying_contract: ASSET,
    }
}

fn exact_requirements(amount: &str, with_extra: bool) -> Value {
    let mut requirements = json!({
        "scheme": "exact",
        "network": "eip155:84532",
        "amount": amount,
        "payTo": PAY_TO.to_string(),
        "maxTimeoutSeconds": 60,
        "asset": ASSET.to_string(),
    });
    if with_extra {
        requirements["extra"] = json!({ "name": "USD Coin", "version": "2" });
    }
    requirements
}

struct Authorization {
    from: Address,
    to: Address,
    value: u64,
    valid_after: u64,
    valid_before: u64,
}

impl Authorization {
    fn new(from: Address, value: u64) -> Self {
        let now = UnixTimestamp::now().as_secs();
        Self {
            from,
            to: PAY_TO,
            value,
            valid_after: now - 60,
            valid_before: now + 300,
        }
    }

    fn signing_hash(&self, nonce: B256) -> B256 {
        TransferWithAuthorization {
            from: self.from,
            to: self.to,
            value: U256::from(self.value),
            validAfter: U256::from(self.valid_after),
            validBefore: U256::from(self.valid_before),
            nonce,
        }
        .eip712_signing_hash(&domain())
    }

    fn sign(&self, signer: &PrivateKeySigner) -> (B256, Bytes) {
        let nonce = B256::repeat_byte(0x11);
        let signature = signer.sign_hash_sync(&self.signing_hash(nonce)).unwrap();
        (nonce, Bytes::from(signature.as_bytes().to_vec()))
    }

    fn payload(&self, nonce: B256, signature: Bytes, requirements: &Value) -> PaymentPayload {
        serde_json::from_value(json!({
            "x402Version": 2,
            "accepted": requirements,
            "payload": {
                "signature": signature,
                "authorization": {
                    "from": self.from,
                    "to": self.to,
                    "value": self.value.to_string(),
                    "validAfter": self.valid_after.to_string(),
                    "validBefore": self.valid_before.to_string(),
                    "nonce": nonce,
                }
            }
        }))
        .unwrap()
    }
}

fn eoa_payment(
    payer: &PrivateKeySigner,
    value: u64,
    amount: &str,
) -> (PaymentPayload, PaymentRequirements) {
    let requirements_json = exact_requirements(amount, true);
    let authorization = Authorization::new(payer.address(), value);
    let (nonce, signature) = authorization.sign(payer);
    let payload = authorization.payload(nonce, signature, &requirements_json);
    (payload, serde_json::from_value(requirements_json).unwrap())
}

fn verification_error(
    result: Result<impl std::fmt::Debug, SchemeError>,
) -> PaymentVerificationError {
    match result {
        Err(SchemeError::PaymentVerification(error)) => error,
        other => panic!("expected a verification error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_amount_policy() {
    let signer = adapter(Arc::new(TokenChain::new(1_000)));
    let payer = PrivateKeySigner::random();
    let scheme = ExactEvmScheme::default();

    for value in [100, 101] {
        let (payload, requirements) = eoa_payment(&payer, value, "100");
        let verified = scheme.validate(&payload, &requirements, &signer).await.unwrap();
        assert_eq!(verified.payer, payer.address().to_string());
    }

    let (payload, requirements) = eoa_payment(&payer, 99, "100");
    let error = verification_error(scheme.validate(&payload, &requirements, &signer).await);
    assert_eq!(error, PaymentVerificationError::InvalidPaymentAmount);
}

#[tokio::test]
async fn test_time_window() {
    let signer = adapter(Arc::new(TokenChain::new(1_000)));
    let payer = PrivateKeySigner::random();
    let scheme = ExactEvmScheme::default();
    let requirements_json = exact_requirements("100", true);
    let requirements: PaymentRequirements =
        serde_json::from_value(requirements_json.clone()).unwrap();
    let now = UnixTimestamp::now().as_secs();

    let mut expired = Authorization::new(payer.address(), 100);
    expired.valid_before = now + 2;
    let (nonce, signature) = expired.sign(&payer);
    let payload = expired.payload(nonce, signature, &requirements_json);
    let error = verification_error(scheme.validate(&payload, &requirements, &signer).await);
    assert_eq!(error, PaymentVerificationError::Expired);

    let mut early = Authorization::new(payer.address(), 100);
    early.valid_after = now + 120;
    let (nonce, signature) = early.sign(&payer);
    let payload = early.payload(nonce, signature, &requirements_json);
    let error = verification_error(scheme.validate(&payload, &requirements, &signer).await);
    assert_eq!(error, PaymentVerificationError::Early);
}

#[tokio::test]
async fn test_recipient_and_accepted_requirements() {
    let signer = adapter(Arc::new(TokenChain::new(1_000)));
    let payer = PrivateKeySigner::random();
    let scheme = ExactEvmScheme::default();
    let requirements_json = exact_requirements("100", true);
    let requirements: PaymentRequirements =
        serde_json::from_value(requirements_json.clone()).unwrap();

    let mut elsewhere = Authorization::new(payer.address(), 100);
    elsewhere.to = Address::repeat_byte(0x77);
    let (nonce, signature) = elsewhere.sign(&payer);
    let payload = elsewhere.payload(nonce, signature, &requirements_json);
    let error = verification_error(scheme.validate(&payload, &requirements, &signer).await);
    assert_eq!(error, PaymentVerificationError::RecipientMismatch);

    let (payload, _) = eoa_payment(&payer, 100, "100");
    let cheaper: PaymentRequirements =
        serde_json::from_value(exact_requirements("50", true)).unwrap();
    let error = verification_error(scheme.validate(&payload, &cheaper, &signer).await);
    assert_eq!(error, PaymentVerificationError::AcceptedRequirementsMismatch);
}

#[tokio::test]
async fn test_accepted_network_or_asset_differs() {
    let signer = adapter(Arc::new(TokenChain::new(1_000)));
    let payer = PrivateKeySigner::random();
    let scheme = ExactEvmScheme::default();
    let requirements_json = exact_requirements("100", true);
    let requirements: PaymentRequirements =
        serde_json::from_value(requirements_json.clone()).unwrap();
    let authorization = Authorization::new(payer.address(), 100);
    let (nonce, signature) = authorization.sign(&payer);

    let mut mainnet = requirements_json.clone();
    mainnet["network"] = json!("eip155:8453");
    let payload = authorization.payload(nonce, signature.clone(), &mainnet);
    let error = verification_error(scheme.validate(&payload, &requirements, &signer).await);
    assert_eq!(error, PaymentVerificationError::ChainIdMismatch);

    let mut other_token = requirements_json.clone();
    other_token["asset"] = json!(Address::repeat_byte(0x55).to_string());
    let payload = authorization.payload(nonce, signature, &other_token);
    let error = verification_error(scheme.validate(&payload, &requirements, &signer).await);
    assert_eq!(error, PaymentVerificationError::AssetMismatch);
}

#[tokio::test]
async fn test_malformed_payload() {
    let signer = adapter(Arc::new(TokenChain::new(1_000)));
    let scheme = ExactEvmScheme::default();
    let requirements_json = exact_requirements("100", true);
    let payload: PaymentPayload = serde_json::from_value(json!({
        "x402Version": 2,
        "accepted": requirements_json,
        "payload": { "signature": "0x00" }
    }))
    .unwrap();
    let requirements: PaymentRequirements = serde_json::from_value(requirements_json).unwrap();
    let error = verification_error(scheme.validate(&payload, &requirements, &signer).await);
    assert!(matches!(error, PaymentVerificationError::InvalidFormat(_)));
}

#[tokio::test]
async fn test_insufficient_balance() {
    let signer = adapter(Arc::new(TokenChain::new(99)));
    let payer = PrivateKeySigner::random();
    let (payload, requirements) = eoa_payment(&payer, 100, "100");
    let error = verification_error(
        ExactEvmScheme::default()
            .validate(&payload, &requirements, &signer)
            .await,
    );
    assert_eq!(error, PaymentVerificationError::InsufficientFunds);
}

#[tokio::test]
async fn test_signature_of_another_key_is_rejected() {
    let signer = adapter(Arc::new(TokenChain::new(1_000)));
    let payer = PrivateKeySigner::random();
    let impostor = PrivateKeySigner::random();
    let requirements_json = exact_requirements("100", true);
    let requirements: PaymentRequirements =
        serde_json::from_value(requirements_json.clone()).unwrap();

    let authorization = Authorization::new(payer.address(), 100);
    let (nonce, signature) = authorization.sign(&impostor);
    let payload = authorization.payload(nonce, signature, &requirements_json);
    let error = verification_error(
        ExactEvmScheme::default()
            .validate(&payload, &requirements, &signer)
            .await,
    );
    assert!(matches!(error, PaymentVerificationError::InvalidSignature(_)));
}

#[tokio::test]
async fn test_domain_is_read_from_token_without_extra() {
    let signer = adapter(Arc::new(TokenChain::new(1_000)));
    let payer = PrivateKeySigner::random();
    let requirements_json = exact_requirements("100", false);
    let requirements: PaymentRequirements =
        serde_json::from_value(requirements_json.clone()).unwrap();

    let authorization = Authorization::new(payer.address(), 100);
    let (nonce, signature) = authorization.sign(&payer);
    let payload = authorization.payload(nonce, signature, &requirements_json);
    let transfer = ExactEvmScheme::default()
        .check(&payload, &requirements, &signer)
        .await
        .unwrap();
    assert_eq!(transfer.domain, domain());
    assert!(matches!(transfer.signature, StructuredSignature::Eoa(_)));
}

#[tokio::test]
async fn test_eoa_settlement_uses_vrs_overload() {
    let chain = Arc::new(TokenChain::new(1_000));
    let signer = adapter(chain.clone());
    let payer = PrivateKeySigner::random();
    let (payload, requirements) = eoa_payment(&payer, 100, "100");

    let settled = ExactEvmScheme::default()
        .execute(&payload, &requirements, &signer)
        .await
        .unwrap();
    assert_eq!(settled.transaction, TRANSFER_TX.to_string());
    assert_eq!(settled.payer, payer.address().to_string());

    let submitted = chain.submitted();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].address, ASSET);
    let call =
        IEIP3009::transferWithAuthorization_1Call::abi_decode(&submitted[0].calldata).unwrap();
    assert_eq!(call.from, payer.address());
    assert_eq!(call.to, PAY_TO);
    assert_eq!(call.value, U256::from(100));
    assert!(call.v == 27 || call.v == 28);
}

fn counterfactual_payment(wallet: Address) -> (PaymentPayload, PaymentRequirements, Bytes) {
    let requirements_json = exact_requirements("100", true);
    let authorization = Authorization::new(wallet, 100);
    let inner = Bytes::from_static(&[0x5a; 96]);
    let mut wrapped =
        (FACTORY, Bytes::from_static(&[0xde, 0xad]), inner.clone()).abi_encode_params();
    wrapped.extend_from_slice(&EIP6492_MAGIC_SUFFIX);
    let payload =
        authorization.payload(B256::repeat_byte(0x22), wrapped.into(), &requirements_json);
    (payload, serde_json::from_value(requirements_json).unwrap(), inner)
}

#[tokio::test]
async fn test_counterfactual_wallet_is_deployed_before_transfer() {
    let mut chain = TokenChain::new(1_000);
    chain.contract_signatures_valid = true;
    let chain = Arc::new(chain);
    let signer = adapter(chain.clone());
    let wallet = Address::repeat_byte(0x99);
    let (payload, requirements, inner) = counterfactual_payment(wallet);

    let scheme = ExactEvmBlueprint
        .build(Some(&json!({ "deployErc4337WithEip6492": true })))
        .unwrap();
    let settled = scheme.execute(&payload, &requirements, &signer).await.unwrap();
    assert_eq!(settled.transaction, TRANSFER_TX.to_string());

    let submitted = chain.submitted();
    assert_eq!(submitted.len(), 2);
    assert_eq!(submitted[0].address, FACTORY);
    assert_eq!(submitted[0].calldata, Bytes::from_static(&[0xde, 0xad]));
    let transfer =
        IEIP3009::transferWithAuthorization_0Call::abi_decode(&submitted[1].calldata).unwrap();
    assert_eq!(transfer.from, wallet);
    assert_eq!(transfer.signature, inner);
}

#[tokio::test]
async fn test_counterfactual_wallet_without_deployment_fails() {
    let mut chain = TokenChain::new(1_000);
    chain.contract_signatures_valid = true;
    let chain = Arc::new(chain);
    let signer = adapter(chain.clone());
    let (payload, requirements, _) = counterfactual_payment(Address::repeat_byte(0x99));

    let scheme = ExactEvmScheme::default();
    scheme.validate(&payload, &requirements, &signer).await.unwrap();
    let result = scheme.execute(&payload, &requirements, &signer).await;
    assert!(matches!(
        result,
        Err(SchemeError::OnchainFailure(reason)) if reason.contains("undeployed smart wallet")
    ));
    assert!(chain.submitted().is_empty());
}

#[tokio::test]
async fn test_reverted_transfer_is_onchain_failure() {
    let mut chain = TokenChain::new(1_000);
    chain.transfer_reverts = true;
    let signer = adapter(Arc::new(chain));
    let payer = PrivateKeySigner::random();
    let (payload, requirements) = eoa_payment(&payer, 100, "100");

    let result = ExactEvmScheme::default()
        .execute(&payload, &requirements, &signer)
        .await;
    assert!(matches!(
        result,
        Err(SchemeError::OnchainFailure(reason)) if reason.contains("reverted")
    ));
}

fn facilitator(chain: Arc<TokenChain>) -> (FacilitatorCore, Arc<InMemoryVerificationStore>) {
    let mut chains: ChainRegistry<Arc<dyn ChainClient>> = ChainRegistry::new();
    chains.register(base_sepolia(), chain).unwrap();
    let signer = SignerAdapter::new(Arc::new(chains), Some(base_sepolia())).unwrap();
    let mut schemes = SchemeRegistry::new();
    schemes
        .register(&[base_sepolia()], Arc::new(ExactEvmScheme::default()))
        .unwrap();
    let store = Arc::new(InMemoryVerificationStore::new());
    let tracker = Arc::new(VerificationTracker::new(
        store.clone(),
        Duration::from_secs(300),
    ));
    let mut hooks = LifecycleHooks::new();
    tracker.install(&mut hooks);
    (FacilitatorCore::new(schemes, signer).with_hooks(hooks), store)
}

#[tokio::test]
async fn test_verify_then_settle_through_facilitator() {
    let chain = Arc::new(TokenChain::new(1_000));
    let (facilitator, store) = facilitator(chain.clone());

    let payer = PrivateKeySigner::random();
    let (payload, requirements) = eoa_payment(&payer, 100, "100");
    let request = VerifyRequest::new(payload, requirements);

    let verified = facilitator.verify(&request).await.unwrap();
    assert_eq!(verified, VerifyResponse::valid(payer.address().to_string()));
    assert_eq!(store.len(), 1);

    let settled = facilitator.settle(&request).await.unwrap();
    assert!(matches!(
        settled,
        SettleResponse::Success { ref transaction, .. } if *transaction == TRANSFER_TX.to_string()
    ));
    assert!(store.is_empty());

    let again = facilitator.settle(&request).await.unwrap();
    assert!(matches!(again, SettleResponse::Error { .. }));
    assert_eq!(chain.submitted().len(), 1);
}

#[test]
fn test_payment_id_names_the_authorization() {
    let payer = PrivateKeySigner::random();
    let (payload, _) = eoa_payment(&payer, 100, "100");
    let scheme = ExactEvmScheme::default();

    let payment_id = scheme.payment_id(&payload).unwrap();
    assert_eq!(
        payment_id,
        format!("{ASSET}:{}:{}", payer.address(), B256::repeat_byte(0x11))
    );

    let mut decorated = payload.clone();
    decorated.extensions = Some(json!({ "bazaar": { "listed": true } }));
    assert_eq!(scheme.payment_id(&decorated), Some(payment_id));

    let mut garbled = payload;
    garbled.payload = json!({ "signature": "0x" });
    assert_eq!(scheme.payment_id(&garbled), None);
}

#[tokio::test]
async fn test_unsigned_fields_do_not_open_a_second_settlement() {
    let chain = Arc::new(TokenChain::new(1_000));
    let (facilitator, store) = facilitator(chain.clone());

    let payer = PrivateKeySigner::random();
    let (payload, requirements) = eoa_payment(&payer, 100, "100");
    let plain = VerifyRequest::new(payload, requirements);
    let mut decorated = plain.clone();
    decorated.payment_payload.extensions = Some(json!({ "retry": 1 }));

    assert!(facilitator.verify(&plain).await.unwrap().is_valid());
    assert!(facilitator.verify(&decorated).await.unwrap().is_valid());
    assert_eq!(store.len(), 1);

    let (first, second) = tokio::join!(facilitator.settle(&plain), facilitator.settle(&decorated));
    let successes = [first.unwrap(), second.unwrap()]
        .iter()
        .filter(|response| response.is_success())
        .count();
    assert_eq!(successes, 1);
    assert_eq!(chain.submitted().len(), 1);
    assert!(store.is_empty());
}

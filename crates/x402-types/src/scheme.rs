//! Payment schemes and the registry that routes payments to them.
//!
//! A [`PaymentScheme`] knows how to validate and execute one kind of payment (e.g.
//! `exact` on EVM chains). Schemes are created from [`SchemeBlueprint`]s according to
//! [`SchemeConfig`] entries and bound to concrete networks in a [`SchemeRegistry`],
//! keyed by `(scheme, network)`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

use crate::chain::{ChainId, ChainIdPattern, ChainRegistry};
use crate::proto::v2::{PaymentPayload, PaymentRequirements, X402Version2};
use crate::proto::{
    AsPaymentProblem, ErrorReason, PaymentProblem, PaymentVerificationError, SupportedPaymentKind,
};
use crate::signer::{SignerAdapter, SignerError};

/// Outcome of a successful [`PaymentScheme::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedPayment {
    pub payer: String,
}

/// Outcome of a successful [`PaymentScheme::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettledPayment {
    pub payer: String,
    /// Settlement transaction hash.
    pub transaction: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SchemeError {
    /// The payment itself is not acceptable.
    #[error(transparent)]
    PaymentVerification(#[from] PaymentVerificationError),
    /// The payment was acceptable but moving the funds failed.
    #[error("Onchain failure: {0}")]
    OnchainFailure(String),
    #[error(transparent)]
    Signer(#[from] SignerError),
}

impl AsPaymentProblem for SchemeError {
    fn as_payment_problem(&self) -> PaymentProblem {
        match self {
            SchemeError::PaymentVerification(e) => e.as_payment_problem(),
            SchemeError::OnchainFailure(_) => {
                PaymentProblem::new(ErrorReason::TransactionFailed, self.to_string())
            }
            SchemeError::Signer(SignerError::UnknownNetwork(_)) => {
                PaymentProblem::new(ErrorReason::UnsupportedChain, self.to_string())
            }
            SchemeError::Signer(_) => {
                PaymentProblem::new(ErrorReason::UnexpectedError, self.to_string())
            }
        }
    }
}

/// A payment scheme bound to one chain family.
///
/// Implementations talk to the chain only through the [`SignerAdapter`], passing the
/// payment's network explicitly.
#[async_trait::async_trait]
pub trait PaymentScheme: Send + Sync {
    /// Scheme identifier as it appears in payment requirements, e.g. `exact`.
    fn scheme(&self) -> &str;

    /// CAIP-2 namespace the scheme works on, e.g. `eip155`.
    fn namespace(&self) -> &str;

    /// Scheme-specific `extra` advertised on `/supported` for `network`.
    fn supported_extra(&self, _network: &ChainId) -> Option<serde_json::Value> {
        None
    }

    /// Identity of the signed authorization carried by `payload`, e.g. payer and nonce.
    ///
    /// Requests that can settle the same funds must share it, whatever their unsigned
    /// fields. `None` when the scheme cannot tell, or the payload does not parse.
    fn payment_id(&self, _payload: &PaymentPayload) -> Option<String> {
        None
    }

    /// Checks the payment without moving funds.
    async fn validate(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
        signer: &SignerAdapter,
    ) -> Result<VerifiedPayment, SchemeError>;

    /// Re-validates the payment and moves the funds on-chain.
    async fn execute(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
        signer: &SignerAdapter,
    ) -> Result<SettledPayment, SchemeError>;
}

/// Factory for a [`PaymentScheme`], looked up by [`SchemeConfig::id`].
pub trait SchemeBlueprint: Send + Sync {
    fn id(&self) -> &str;

    /// Builds the scheme from its optional `config` object.
    fn build(
        &self,
        config: Option<&serde_json::Value>,
    ) -> Result<Arc<dyn PaymentScheme>, Box<dyn std::error::Error>>;
}

#[derive(Default)]
pub struct SchemeBlueprints(HashMap<String, Box<dyn SchemeBlueprint>>);

impl Debug for SchemeBlueprints {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<&String> = self.0.keys().collect();
        f.debug_tuple("SchemeBlueprints").field(&ids).finish()
    }
}

impl SchemeBlueprints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn and_register<B: SchemeBlueprint + 'static>(mut self, blueprint: B) -> Self {
        self.register(blueprint);
        self
    }

    pub fn register<B: SchemeBlueprint + 'static>(&mut self, blueprint: B) {
        self.0.insert(blueprint.id().to_string(), Box::new(blueprint));
    }

    pub fn by_id(&self, id: &str) -> Option<&dyn SchemeBlueprint> {
        self.0.get(id).map(|b| b.as_ref())
    }
}

/// One `schemes` entry of the facilitator configuration.
///
/// ```json
/// { "id": "exact", "chains": "eip155:*", "config": { "deployErc4337WithEip6492": true } }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemeConfig {
    pub id: String,
    pub chains: ChainIdPattern,
    #[serde(default = "scheme_enabled_default")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}

fn scheme_enabled_default() -> bool {
    true
}

/// Routing key of a registered scheme.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct SchemeHandlerSlug {
    pub network: ChainId,
    pub scheme: String,
}

impl SchemeHandlerSlug {
    pub fn new<S: Into<String>>(network: ChainId, scheme: S) -> Self {
        Self {
            network,
            scheme: scheme.into(),
        }
    }
}

impl Display for SchemeHandlerSlug {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.scheme, self.network)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SchemeRegistryError {
    #[error("Scheme {scheme} is already registered for {network}")]
    SchemeAlreadyRegistered { scheme: String, network: ChainId },
    #[error("Scheme {scheme} works on {namespace} networks and cannot serve {network}")]
    NamespaceMismatch {
        scheme: String,
        namespace: String,
        network: ChainId,
    },
}

/// Registered schemes, keyed by `(scheme, network)`.
///
/// Filled at startup, read-only afterwards.
#[derive(Default)]
pub struct SchemeRegistry(HashMap<SchemeHandlerSlug, Arc<dyn PaymentScheme>>);

impl Debug for SchemeRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let slugs: Vec<String> = self.0.keys().map(|s| s.to_string()).collect();
        f.debug_tuple("SchemeRegistry").field(&slugs).finish()
    }
}

impl SchemeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `scheme` to every network in `networks`.
    ///
    /// Either all networks are registered or none: a duplicate `(scheme, network)` pair
    /// or a network outside the scheme's namespace leaves the registry unchanged.
    pub fn register(
        &mut self,
        networks: &[ChainId],
        scheme: Arc<dyn PaymentScheme>,
    ) -> Result<(), SchemeRegistryError> {
        for network in networks {
            if network.namespace() != scheme.namespace() {
                return Err(SchemeRegistryError::NamespaceMismatch {
                    scheme: scheme.scheme().to_string(),
                    namespace: scheme.namespace().to_string(),
                    network: network.clone(),
                });
            }
            let slug = SchemeHandlerSlug::new(network.clone(), scheme.scheme());
            if self.0.contains_key(&slug) {
                return Err(SchemeRegistryError::SchemeAlreadyRegistered {
                    scheme: slug.scheme,
                    network: slug.network,
                });
            }
        }
        for network in networks {
            let slug = SchemeHandlerSlug::new(network.clone(), scheme.scheme());
            self.0.insert(slug, scheme.clone());
        }
        Ok(())
    }

    /// Builds schemes from configuration, binding each to the registered networks its
    /// `chains` pattern matches.
    ///
    /// Disabled entries, unknown scheme ids and patterns matching no network are logged
    /// and skipped. Conflicting registrations are an error.
    pub fn build<P>(
        chains: &ChainRegistry<P>,
        blueprints: &SchemeBlueprints,
        configs: &[SchemeConfig],
    ) -> Result<Self, SchemeRegistryError> {
        let mut registry = Self::new();
        for config in configs {
            if !config.enabled {
                tracing::info!(
                    "Skipping disabled scheme {} for chains {}",
                    config.id,
                    config.chains
                );
                continue;
            }
            let Some(blueprint) = blueprints.by_id(&config.id) else {
                tracing::warn!("No scheme registered: {}", config.id);
                continue;
            };
            let networks = chains.networks_matching(&config.chains);
            if networks.is_empty() {
                tracing::warn!(
                    "No enabled chain matches {} for scheme {}",
                    config.chains,
                    config.id
                );
                continue;
            }
            let scheme = match blueprint.build(config.config.as_ref()) {
                Ok(scheme) => scheme,
                Err(err) => {
                    tracing::error!("Error building scheme {}: {}", config.id, err);
                    continue;
                }
            };
            registry.register(&networks, scheme)?;
            for network in networks {
                tracing::info!(scheme = %config.id, %network, "Registered scheme");
            }
        }
        Ok(registry)
    }

    pub fn lookup(&self, scheme: &str, network: &ChainId) -> Option<&Arc<dyn PaymentScheme>> {
        let slug = SchemeHandlerSlug::new(network.clone(), scheme);
        self.0.get(&slug)
    }

    /// Every registered `(scheme, network)` pair, sorted by network then scheme.
    pub fn kinds(&self) -> Vec<SupportedPaymentKind> {
        let mut kinds = self
            .0
            .iter()
            .map(|(slug, scheme)| SupportedPaymentKind {
                x402_version: X402Version2::VALUE,
                scheme: slug.scheme.clone(),
                network: slug.network.clone(),
                extra: scheme.supported_extra(&slug.network),
            })
            .collect::<Vec<_>>();
        kinds.sort_by(|a, b| {
            (a.network.to_string(), &a.scheme).cmp(&(b.network.to_string(), &b.scheme))
        });
        kinds
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

//! The verify/settle state machine.
//!
//! [`FacilitatorCore`] routes each payment to the [`PaymentScheme`] registered for its
//! `(scheme, network)` pair, fires the [`LifecycleHooks`] around every phase, and turns
//! every predictable failure into a response value:
//!
//! - invalid payments become [`VerifyResponse::Invalid`](proto::VerifyResponse::Invalid)
//! - settlements refused by a before-settle hook, failed on-chain or timed out become
//!   [`SettleResponse::Error`](proto::SettleResponse::Error)
//!
//! Only failures that no caller can act on surface as [`FacilitatorCoreError`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use x402_types::chain::ChainId;
use x402_types::facilitator::Facilitator;
use x402_types::proto;
use x402_types::proto::{AsPaymentProblem, ErrorReason, PaymentVerificationError};
use x402_types::scheme::{PaymentScheme, SchemeError, SchemeRegistry, SettledPayment};
use x402_types::signer::SignerAdapter;

#[cfg(feature = "telemetry")]
use tracing::instrument;

use crate::hooks::{
    AfterSettle, AfterVerify, BeforeSettle, BeforeVerify, LifecycleHooks, PaymentContext,
    SettleDecision, SettleFailure, VerifyFailure,
};

/// Marker every aborted-settlement message starts with.
pub const SETTLEMENT_ABORTED_PREFIX: &str = "Settlement aborted: ";

/// Default bound on a single settlement.
pub const DEFAULT_SETTLE_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, thiserror::Error)]
pub enum FacilitatorCoreError {
    /// A before-settle hook refused the settlement.
    #[error("Settlement aborted: {0}")]
    SettlementAborted(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A settlement that did not go through, as reported on the wire.
#[derive(Debug)]
struct SettleFailed {
    reason: ErrorReason,
    details: String,
}

impl From<SchemeError> for SettleFailed {
    fn from(error: SchemeError) -> Self {
        let problem = error.as_payment_problem();
        Self {
            reason: problem.reason(),
            details: problem.details().to_string(),
        }
    }
}

enum SettleOutcome {
    Settled(SettledPayment),
    Aborted(FacilitatorCoreError),
    Failed(SettleFailed),
}

pub struct FacilitatorCore {
    schemes: Arc<SchemeRegistry>,
    signer: SignerAdapter,
    hooks: Arc<LifecycleHooks>,
    settle_timeout: Duration,
}

impl std::fmt::Debug for FacilitatorCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FacilitatorCore")
            .field("schemes", &self.schemes)
            .field("signer", &self.signer)
            .field("hooks", &self.hooks)
            .field("settle_timeout", &self.settle_timeout)
            .finish()
    }
}

impl FacilitatorCore {
    pub fn new(schemes: SchemeRegistry, signer: SignerAdapter) -> Self {
        Self {
            schemes: Arc::new(schemes),
            signer,
            hooks: Arc::new(LifecycleHooks::default()),
            settle_timeout: DEFAULT_SETTLE_TIMEOUT,
        }
    }

    pub fn with_hooks(mut self, hooks: LifecycleHooks) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    pub fn with_settle_timeout(mut self, settle_timeout: Duration) -> Self {
        self.settle_timeout = settle_timeout;
        self
    }

    pub fn schemes(&self) -> &SchemeRegistry {
        &self.schemes
    }

    pub fn signer(&self) -> &SignerAdapter {
        &self.signer
    }

    /// Finds the scheme for a payment: the network must be served, then the scheme
    /// registered on it.
    fn resolve(
        &self,
        context: &PaymentContext,
    ) -> Result<Arc<dyn PaymentScheme>, PaymentVerificationError> {
        let network = context.network();
        if !self.signer.contains(network) {
            return Err(PaymentVerificationError::UnsupportedChain);
        }
        self.schemes
            .lookup(context.scheme(), network)
            .cloned()
            .ok_or(PaymentVerificationError::UnsupportedScheme)
    }

    /// Builds the context of a request, identified by its scheme when one serves it.
    fn prepare(
        &self,
        request: &proto::VerifyRequest,
    ) -> (
        Arc<PaymentContext>,
        Result<Arc<dyn PaymentScheme>, PaymentVerificationError>,
    ) {
        let context = PaymentContext::new(
            request.payment_payload.clone(),
            request.payment_requirements.clone(),
        );
        let scheme = self.resolve(&context);
        let payment_id = match &scheme {
            Ok(scheme) => scheme.payment_id(&context.payload),
            Err(_) => None,
        };
        (Arc::new(context.with_payment_id(payment_id)), scheme)
    }

    async fn verify_payment(
        &self,
        context: Arc<PaymentContext>,
        scheme: Result<Arc<dyn PaymentScheme>, PaymentVerificationError>,
    ) -> proto::VerifyResponse {
        self.hooks
            .before_verify
            .notify(&BeforeVerify {
                context: context.clone(),
            })
            .await;

        let result = match scheme {
            Ok(scheme) => {
                scheme
                    .validate(&context.payload, &context.requirements, &self.signer)
                    .await
            }
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(verified) => {
                tracing::info!(
                    network = %context.network(),
                    payer = %verified.payer,
                    "Payment verified"
                );
                self.hooks
                    .after_verify
                    .notify(&AfterVerify {
                        context,
                        payer: verified.payer.clone(),
                    })
                    .await;
                proto::VerifyResponse::valid(verified.payer)
            }
            Err(error) => {
                let problem = error.as_payment_problem();
                tracing::info!(
                    network = %context.network(),
                    reason = %problem.reason(),
                    details = problem.details(),
                    "Payment verification failed"
                );
                let reason = problem.reason().to_string();
                self.hooks
                    .verify_failure
                    .notify(&VerifyFailure {
                        context,
                        reason: reason.clone(),
                    })
                    .await;
                proto::VerifyResponse::invalid(None, reason)
            }
        }
    }

    /// Runs `execute` on its own task, bounded by the settle timeout.
    ///
    /// A timed-out task is left running detached; its late outcome is only logged.
    async fn execute_with_timeout(
        &self,
        scheme: Arc<dyn PaymentScheme>,
        context: Arc<PaymentContext>,
    ) -> Result<Result<SettledPayment, SettleFailed>, FacilitatorCoreError> {
        let signer = self.signer.clone();
        let task_context = context.clone();
        let mut handle = tokio::spawn(async move {
            scheme
                .execute(&task_context.payload, &task_context.requirements, &signer)
                .await
        });
        match tokio::time::timeout(self.settle_timeout, &mut handle).await {
            Ok(Ok(result)) => Ok(result.map_err(SettleFailed::from)),
            Ok(Err(join_error)) => Err(FacilitatorCoreError::Internal(format!(
                "settlement task failed: {join_error}"
            ))),
            Err(_elapsed) => {
                let network = context.network().clone();
                tokio::spawn(async move {
                    match handle.await {
                        Ok(Ok(settled)) => tracing::warn!(
                            %network,
                            transaction = %settled.transaction,
                            "Settlement completed after timeout"
                        ),
                        Ok(Err(error)) => tracing::warn!(
                            %network,
                            %error,
                            "Settlement failed after timeout"
                        ),
                        Err(error) => tracing::error!(%network, %error, "Settlement task failed"),
                    }
                });
                Ok(Err(SettleFailed {
                    reason: ErrorReason::Timeout,
                    details: format!(
                        "Settlement did not finish within {}s",
                        self.settle_timeout.as_secs_f64()
                    ),
                }))
            }
        }
    }

    async fn settle_payment(
        &self,
        context: Arc<PaymentContext>,
        scheme: Result<Arc<dyn PaymentScheme>, PaymentVerificationError>,
    ) -> Result<SettleOutcome, FacilitatorCoreError> {
        let decision = self
            .hooks
            .before_settle
            .decide(&BeforeSettle {
                context: context.clone(),
            })
            .await;
        if let SettleDecision::Abort { reason } = decision {
            return Ok(SettleOutcome::Aborted(
                FacilitatorCoreError::SettlementAborted(reason),
            ));
        }

        let result = match scheme {
            Ok(scheme) => self.execute_with_timeout(scheme, context.clone()).await,
            Err(e) => Ok(Err(SchemeError::from(e).into())),
        };

        let outcome = match result {
            Ok(Ok(settled)) => {
                self.hooks
                    .after_settle
                    .notify(&AfterSettle {
                        context,
                        payer: settled.payer.clone(),
                        transaction: settled.transaction.clone(),
                    })
                    .await;
                SettleOutcome::Settled(settled)
            }
            Ok(Err(failed)) => {
                self.hooks
                    .settle_failure
                    .notify(&SettleFailure {
                        context,
                        reason: failed.reason.to_string(),
                    })
                    .await;
                SettleOutcome::Failed(failed)
            }
            Err(internal) => {
                // Observers still learn the settlement is over
                self.hooks
                    .settle_failure
                    .notify(&SettleFailure {
                        context,
                        reason: ErrorReason::UnexpectedError.to_string(),
                    })
                    .await;
                return Err(internal);
            }
        };
        Ok(outcome)
    }
}

impl Facilitator for FacilitatorCore {
    type Error = FacilitatorCoreError;

    #[cfg_attr(
        feature = "telemetry",
        instrument(skip_all, err, fields(network = %request.network(), scheme = request.scheme()))
    )]
    async fn verify(
        &self,
        request: &proto::VerifyRequest,
    ) -> Result<proto::VerifyResponse, Self::Error> {
        let (context, scheme) = self.prepare(request);
        Ok(self.verify_payment(context, scheme).await)
    }

    #[cfg_attr(
        feature = "telemetry",
        instrument(skip_all, err, fields(network = %request.network(), scheme = request.scheme()))
    )]
    async fn settle(
        &self,
        request: &proto::SettleRequest,
    ) -> Result<proto::SettleResponse, Self::Error> {
        let network = request.network().clone();
        let (context, scheme) = self.prepare(request);
        let response = match self.settle_payment(context, scheme).await? {
            SettleOutcome::Settled(settled) => {
                tracing::info!(
                    %network,
                    payer = %settled.payer,
                    transaction = %settled.transaction,
                    "Payment settled"
                );
                proto::SettleResponse::Success {
                    payer: settled.payer,
                    transaction: settled.transaction,
                    network,
                }
            }
            SettleOutcome::Aborted(aborted) => {
                tracing::info!(%network, reason = %aborted, "Settlement aborted");
                proto::SettleResponse::Error {
                    reason: aborted.to_string(),
                    payer: None,
                    network,
                }
            }
            SettleOutcome::Failed(failed) => {
                tracing::warn!(
                    %network,
                    reason = %failed.reason,
                    details = %failed.details,
                    "Settlement failed"
                );
                proto::SettleResponse::Error {
                    reason: failed.reason.to_string(),
                    payer: None,
                    network,
                }
            }
        };
        Ok(response)
    }

    async fn supported(&self) -> Result<proto::SupportedResponse, Self::Error> {
        let kinds = self.schemes.kinds();
        let mut signers: HashMap<ChainId, Vec<String>> = HashMap::new();
        for kind in &kinds {
            if signers.contains_key(&kind.network) {
                continue;
            }
            match self.signer.signer_addresses(Some(&kind.network)) {
                Ok(addresses) => {
                    signers.insert(kind.network.clone(), addresses);
                }
                Err(error) => {
                    tracing::warn!(network = %kind.network, %error, "No signers for network");
                }
            }
        }
        Ok(proto::SupportedResponse {
            kinds,
            extensions: Vec::new(),
            signers,
        })
    }
}

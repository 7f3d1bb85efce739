//! Protocol types for x402 payment messages.
//!
//! Wire format types exchanged between resource servers and the facilitator.
//! Only protocol version 2 ([`v2`]) is spoken.
//!
//! # Key Types
//!
//! - [`SupportedPaymentKind`] - Describes a payment method supported by a facilitator
//! - [`SupportedResponse`] - Response from facilitator's `/supported` endpoint
//! - [`VerifyRequest`] / [`VerifyResponse`] - Payment verification messages
//! - [`SettleRequest`] / [`SettleResponse`] - Payment settlement messages
//! - [`PaymentVerificationError`] - Errors that can occur during verification
//! - [`PaymentProblem`] - Structured error response for payment failures
//!
//! # Wire Format
//!
//! All types serialize to JSON using camelCase field names. Verify and settle
//! responses are always values: a failed payment is a `false` flag plus a reason,
//! never a transport-level error.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_with::{VecSkipError, serde_as};
use std::collections::HashMap;

use crate::chain::ChainId;

pub mod v2;

/// Describes a payment method supported by a facilitator.
///
/// ```json
/// {
///   "x402Version": 2,
///   "scheme": "exact",
///   "network": "eip155:8453"
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SupportedPaymentKind {
    pub x402_version: u8,
    /// The payment scheme identifier (e.g., "exact").
    pub scheme: String,
    /// CAIP-2 chain ID.
    pub network: ChainId,
    /// Optional scheme-specific extra data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

/// Response from a facilitator's `/supported` endpoint.
///
/// ```json
/// {
///   "kinds": [
///     { "x402Version": 2, "scheme": "exact", "network": "eip155:8453" }
///   ],
///   "extensions": [],
///   "signers": {
///     "eip155:8453": ["0x1234..."]
///   }
/// }
/// ```
#[serde_as]
#[derive(Clone, Default, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedResponse {
    /// List of supported payment kinds.
    #[serde_as(as = "VecSkipError<_>")]
    pub kinds: Vec<SupportedPaymentKind>,
    /// List of supported protocol extensions.
    #[serde(default)]
    pub extensions: Vec<String>,
    /// Map of chain IDs to signer addresses for that chain.
    #[serde(default)]
    pub signers: HashMap<ChainId, Vec<String>>,
}

/// Request to verify a payment before settlement.
///
/// Both `paymentPayload` and `paymentRequirements` are required; a body missing
/// either one is rejected before it reaches the facilitator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    /// Protocol version. Optional on the envelope, the payload carries its own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x402_version: Option<v2::X402Version2>,
    /// The signed payment authorization.
    pub payment_payload: v2::PaymentPayload,
    /// The payment requirements to verify against.
    pub payment_requirements: v2::PaymentRequirements,
}

/// Request to settle a verified payment on-chain.
///
/// Same structure as [`VerifyRequest`]: the payment being settled is the one
/// previously verified.
pub type SettleRequest = VerifyRequest;

impl VerifyRequest {
    pub fn new(
        payment_payload: v2::PaymentPayload,
        payment_requirements: v2::PaymentRequirements,
    ) -> Self {
        Self {
            x402_version: Some(v2::X402Version2),
            payment_payload,
            payment_requirements,
        }
    }

    /// Network the payment is made on, as stated by the requirements.
    pub fn network(&self) -> &ChainId {
        &self.payment_requirements.network
    }

    /// Scheme the payment uses, as stated by the requirements.
    pub fn scheme(&self) -> &str {
        &self.payment_requirements.scheme
    }
}

/// Result of a payment verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResponse {
    /// The payload matches the requirements and passes all checks.
    Valid { payer: String },
    /// The payload was well-formed but failed verification.
    Invalid {
        reason: String,
        payer: Option<String>,
    },
}

impl VerifyResponse {
    pub fn valid(payer: String) -> Self {
        VerifyResponse::Valid { payer }
    }

    pub fn invalid(payer: Option<String>, reason: String) -> Self {
        VerifyResponse::Invalid { reason, payer }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, VerifyResponse::Valid { .. })
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyResponseWire {
    is_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    invalid_reason: Option<String>,
}

impl Serialize for VerifyResponse {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let wire = match self {
            VerifyResponse::Valid { payer } => VerifyResponseWire {
                is_valid: true,
                payer: Some(payer.clone()),
                invalid_reason: None,
            },
            VerifyResponse::Invalid { reason, payer } => VerifyResponseWire {
                is_valid: false,
                payer: payer.clone(),
                invalid_reason: Some(reason.clone()),
            },
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for VerifyResponse {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let wire = VerifyResponseWire::deserialize(deserializer)?;
        match wire.is_valid {
            true => {
                let payer = wire
                    .payer
                    .ok_or_else(|| serde::de::Error::missing_field("payer"))?;
                Ok(VerifyResponse::Valid { payer })
            }
            false => {
                let reason = wire
                    .invalid_reason
                    .ok_or_else(|| serde::de::Error::missing_field("invalidReason"))?;
                Ok(VerifyResponse::Invalid {
                    reason,
                    payer: wire.payer,
                })
            }
        }
    }
}

/// Result of a payment settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleResponse {
    /// Settlement succeeded.
    Success {
        payer: String,
        /// Transaction hash of the settlement.
        transaction: String,
        network: ChainId,
    },
    /// Settlement failed or was aborted.
    Error {
        reason: String,
        payer: Option<String>,
        network: ChainId,
    },
}

impl SettleResponse {
    pub fn is_success(&self) -> bool {
        matches!(self, SettleResponse::Success { .. })
    }

    pub fn network(&self) -> &ChainId {
        match self {
            SettleResponse::Success { network, .. } | SettleResponse::Error { network, .. } => {
                network
            }
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettleResponseWire {
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    transaction: Option<String>,
    network: ChainId,
}

impl Serialize for SettleResponse {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let wire = match self {
            SettleResponse::Success {
                payer,
                transaction,
                network,
            } => SettleResponseWire {
                success: true,
                error_reason: None,
                payer: Some(payer.clone()),
                transaction: Some(transaction.clone()),
                network: network.clone(),
            },
            SettleResponse::Error {
                reason,
                payer,
                network,
            } => SettleResponseWire {
                success: false,
                error_reason: Some(reason.clone()),
                payer: payer.clone(),
                transaction: None,
                network: network.clone(),
            },
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SettleResponse {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let wire = SettleResponseWire::deserialize(deserializer)?;
        match wire.success {
            true => {
                let payer = wire
                    .payer
                    .ok_or_else(|| serde::de::Error::missing_field("payer"))?;
                let transaction = wire
                    .transaction
                    .ok_or_else(|| serde::de::Error::missing_field("transaction"))?;
                Ok(SettleResponse::Success {
                    payer,
                    transaction,
                    network: wire.network,
                })
            }
            false => {
                let reason = wire
                    .error_reason
                    .ok_or_else(|| serde::de::Error::missing_field("errorReason"))?;
                Ok(SettleResponse::Error {
                    reason,
                    payer: wire.payer,
                    network: wire.network,
                })
            }
        }
    }
}

/// Body of a non-200 HTTP response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new<S: Into<String>>(error: S) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// Errors that can occur during payment verification.
///
/// These are payment problems, reported back to the caller as an invalid
/// verification or a failed settlement. They never become HTTP errors.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum PaymentVerificationError {
    /// The payment payload format is invalid or malformed.
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
    /// The payment amount is below the required amount.
    #[error("Payment amount is invalid with respect to the payment requirements")]
    InvalidPaymentAmount,
    /// The payment authorization's `validAfter` timestamp is in the future.
    #[error("Payment authorization is not yet valid")]
    Early,
    /// The payment authorization's `validBefore` timestamp has passed.
    #[error("Payment authorization is expired")]
    Expired,
    #[error("Payment chain id is invalid with respect to the payment requirements")]
    ChainIdMismatch,
    #[error("Payment recipient is invalid with respect to the payment requirements")]
    RecipientMismatch,
    #[error("Payment asset is invalid with respect to the payment requirements")]
    AssetMismatch,
    /// The payer's on-chain balance is insufficient.
    #[error("Onchain balance is not enough to cover the payment amount")]
    InsufficientFunds,
    /// The payment signature is invalid.
    #[error("{0}")]
    InvalidSignature(String),
    #[error("Unsupported chain")]
    UnsupportedChain,
    #[error("Unsupported scheme")]
    UnsupportedScheme,
    /// The accepted payment details don't match the requirements.
    #[error("Accepted does not match payment requirements")]
    AcceptedRequirementsMismatch,
}

impl AsPaymentProblem for PaymentVerificationError {
    fn as_payment_problem(&self) -> PaymentProblem {
        let error_reason = match self {
            PaymentVerificationError::InvalidFormat(_) => ErrorReason::InvalidFormat,
            PaymentVerificationError::InvalidPaymentAmount => ErrorReason::InvalidPaymentAmount,
            PaymentVerificationError::InsufficientFunds => ErrorReason::InsufficientFunds,
            PaymentVerificationError::Early => ErrorReason::InvalidPaymentEarly,
            PaymentVerificationError::Expired => ErrorReason::InvalidPaymentExpired,
            PaymentVerificationError::ChainIdMismatch => ErrorReason::ChainIdMismatch,
            PaymentVerificationError::RecipientMismatch => ErrorReason::RecipientMismatch,
            PaymentVerificationError::AssetMismatch => ErrorReason::AssetMismatch,
            PaymentVerificationError::InvalidSignature(_) => ErrorReason::InvalidSignature,
            PaymentVerificationError::UnsupportedChain => ErrorReason::UnsupportedChain,
            PaymentVerificationError::UnsupportedScheme => ErrorReason::UnsupportedScheme,
            PaymentVerificationError::AcceptedRequirementsMismatch => {
                ErrorReason::AcceptedRequirementsMismatch
            }
        };
        PaymentProblem::new(error_reason, self.to_string())
    }
}

impl From<serde_json::Error> for PaymentVerificationError {
    fn from(value: serde_json::Error) -> Self {
        Self::InvalidFormat(value.to_string())
    }
}

/// Machine-readable error reason codes for payment failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    InvalidFormat,
    InvalidPaymentAmount,
    InvalidPaymentEarly,
    InvalidPaymentExpired,
    ChainIdMismatch,
    RecipientMismatch,
    AssetMismatch,
    AcceptedRequirementsMismatch,
    InvalidSignature,
    InsufficientFunds,
    UnsupportedChain,
    UnsupportedScheme,
    /// The settlement transaction reverted or could not be submitted.
    TransactionFailed,
    /// Settlement did not finish within the configured timeout.
    Timeout,
    UnexpectedError,
}

impl ErrorReason {
    /// The snake_case code, as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorReason::InvalidFormat => "invalid_format",
            ErrorReason::InvalidPaymentAmount => "invalid_payment_amount",
            ErrorReason::InvalidPaymentEarly => "invalid_payment_early",
            ErrorReason::InvalidPaymentExpired => "invalid_payment_expired",
            ErrorReason::ChainIdMismatch => "chain_id_mismatch",
            ErrorReason::RecipientMismatch => "recipient_mismatch",
            ErrorReason::AssetMismatch => "asset_mismatch",
            ErrorReason::AcceptedRequirementsMismatch => "accepted_requirements_mismatch",
            ErrorReason::InvalidSignature => "invalid_signature",
            ErrorReason::InsufficientFunds => "insufficient_funds",
            ErrorReason::UnsupportedChain => "unsupported_chain",
            ErrorReason::UnsupportedScheme => "unsupported_scheme",
            ErrorReason::TransactionFailed => "transaction_failed",
            ErrorReason::Timeout => "timeout",
            ErrorReason::UnexpectedError => "unexpected_error",
        }
    }
}

impl std::fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trait for converting errors into structured payment problems.
pub trait AsPaymentProblem {
    fn as_payment_problem(&self) -> PaymentProblem;
}

/// A structured payment error with reason code and details.
#[derive(Debug, Clone)]
pub struct PaymentProblem {
    reason: ErrorReason,
    details: String,
}

impl PaymentProblem {
    pub fn new(reason: ErrorReason, details: String) -> Self {
        Self { reason, details }
    }

    pub fn reason(&self) -> ErrorReason {
        self.reason
    }

    pub fn details(&self) -> &str {
        &self.details
    }
}

//! Protocol version 2 types for x402.
//!
//! V2 identifies networks by CAIP-2 chain ID (e.g. `eip155:8453`) and embeds the
//! requirements the buyer accepted inside the signed payment payload.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fmt::{Display, Formatter};

use crate::chain::ChainId;
use crate::proto::PaymentVerificationError;

/// Version marker for x402 protocol version 2.
///
/// Serializes as the integer `2` and refuses any other number.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct X402Version2;

impl X402Version2 {
    pub const VALUE: u8 = 2;
}

impl PartialEq<u8> for X402Version2 {
    fn eq(&self, other: &u8) -> bool {
        *other == Self::VALUE
    }
}

impl From<X402Version2> for u8 {
    fn from(_: X402Version2) -> Self {
        X402Version2::VALUE
    }
}

impl Serialize for X402Version2 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(Self::VALUE)
    }
}

impl<'de> Deserialize<'de> for X402Version2 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let num = u8::deserialize(deserializer)?;
        if num == Self::VALUE {
            Ok(X402Version2)
        } else {
            Err(serde::de::Error::custom(format!(
                "expected version {}, got {}",
                Self::VALUE,
                num
            )))
        }
    }
}

impl Display for X402Version2 {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Self::VALUE)
    }
}

/// Metadata about the resource being paid for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub mime_type: String,
    pub url: String,
}

/// A signed payment authorization from the buyer.
///
/// # Type Parameters
///
/// - `TPaymentRequirements` - The accepted requirements type
/// - `TPayload` - The scheme-specific payload type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload<TPaymentRequirements = PaymentRequirements, TPayload = serde_json::Value>
{
    /// Protocol version (always 2).
    pub x402_version: X402Version2,
    /// The payment requirements the buyer accepted.
    pub accepted: TPaymentRequirements,
    /// The scheme-specific signed payload.
    pub payload: TPayload,
    /// Information about the resource being paid for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceInfo>,
    /// Protocol extensions, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<serde_json::Value>,
}

impl<TPayload> PaymentPayload<PaymentRequirements, TPayload> {
    pub fn network(&self) -> &ChainId {
        &self.accepted.network
    }

    pub fn scheme(&self) -> &str {
        &self.accepted.scheme
    }
}

impl PaymentPayload {
    /// Re-reads this payload with scheme-specific types.
    ///
    /// A payload that does not fit the types is an [`PaymentVerificationError::InvalidFormat`].
    pub fn as_concrete<TReq, TPayload>(
        &self,
    ) -> Result<PaymentPayload<TReq, TPayload>, PaymentVerificationError>
    where
        TReq: DeserializeOwned,
        TPayload: DeserializeOwned,
    {
        let json = serde_json::to_value(self)?;
        Ok(serde_json::from_value(json)?)
    }
}

/// Payment requirements set by the seller.
///
/// # Type Parameters
///
/// - `TScheme` - The scheme identifier type (default: `String`)
/// - `TAmount` - The amount type (default: `String`)
/// - `TAddress` - The address type (default: `String`)
/// - `TExtra` - Scheme-specific extra data type (default: `Option<serde_json::Value>`)
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements<
    TScheme = String,
    TAmount = String,
    TAddress = String,
    TExtra = Option<serde_json::Value>,
> {
    /// The payment scheme (e.g., "exact").
    pub scheme: TScheme,
    /// The CAIP-2 chain ID (e.g., "eip155:8453").
    pub network: ChainId,
    /// The payment amount in the token's smallest unit.
    pub amount: TAmount,
    /// The recipient address for payment.
    pub pay_to: TAddress,
    /// Maximum time in seconds for payment validity.
    pub max_timeout_seconds: u64,
    /// The token asset address.
    pub asset: TAddress,
    /// Scheme-specific extra data.
    #[serde(default)]
    pub extra: TExtra,
}

impl PaymentRequirements {
    /// Re-reads these requirements with scheme-specific types.
    pub fn as_concrete<TScheme, TAmount, TAddress, TExtra>(
        &self,
    ) -> Result<PaymentRequirements<TScheme, TAmount, TAddress, TExtra>, PaymentVerificationError>
    where
        TScheme: DeserializeOwned,
        TAmount: DeserializeOwned,
        TAddress: DeserializeOwned,
        TExtra: DeserializeOwned + Default,
    {
        let json = serde_json::to_value(self)?;
        Ok(serde_json::from_value(json)?)
    }
}

//! Wire and contract types of the `exact` scheme on EVM chains.

use alloy_primitives::{Address, B256, Bytes};
use serde::{Deserialize, Serialize};
use x402_types::proto::v2;
use x402_types::timestamp::UnixTimestamp;

use crate::chain::{ChecksummedAddress, TokenAmount};

/// Scheme identifier as it appears in payment requirements.
pub const EXACT_SCHEME: &str = "exact";

/// EIP-712 domain hints for the token, carried in `requirements.extra`.
///
/// When absent, the domain is read from the token contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequirementsExtra {
    pub name: String,
    pub version: String,
}

/// Payment requirements with EVM types.
pub type PaymentRequirements = v2::PaymentRequirements<
    String,
    TokenAmount,
    ChecksummedAddress,
    Option<PaymentRequirementsExtra>,
>;

/// Payment payload with EVM types.
pub type PaymentPayload = v2::PaymentPayload<PaymentRequirements, ExactEvmPayload>;

/// The signed ERC-3009 authorization carried in `paymentPayload.payload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExactEvmPayload {
    /// EOA, EIP-1271 or EIP-6492 signature over the authorization.
    pub signature: Bytes,
    pub authorization: ExactEvmPayloadAuthorization,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactEvmPayloadAuthorization {
    /// Payer.
    pub from: Address,
    pub to: Address,
    pub value: TokenAmount,
    pub valid_after: UnixTimestamp,
    pub valid_before: UnixTimestamp,
    /// Random 32-byte value; the token refuses to use it twice.
    pub nonce: B256,
}

/// Options of the `exact` scheme, from the `config` object of its `schemes` entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactEvmConfig {
    /// Deploy a counterfactual smart wallet before settling its EIP-6492 signed payment.
    #[serde(default)]
    pub deploy_erc4337_with_eip6492: bool,
}

alloy_sol_types::sol! {
    /// ERC-3009 token surface used by the scheme.
    #[allow(missing_docs)]
    #[allow(clippy::too_many_arguments)]
    #[derive(Debug)]
    interface IEIP3009 {
        function name() external view returns (string);
        function version() external view returns (string);
        function balanceOf(address account) external view returns (uint256);
        function transferWithAuthorization(address from, address to, uint256 value, uint256 validAfter, uint256 validBefore, bytes32 nonce, bytes signature) external;
        function transferWithAuthorization(address from, address to, uint256 value, uint256 validAfter, uint256 validBefore, bytes32 nonce, uint8 v, bytes32 r, bytes32 s) external;
    }

    /// The EIP-712 struct the payer signs.
    #[derive(Serialize, Deserialize)]
    struct TransferWithAuthorization {
        address from;
        address to;
        uint256 value;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }
}

impl From<&ExactEvmPayloadAuthorization> for TransferWithAuthorization {
    fn from(authorization: &ExactEvmPayloadAuthorization) -> Self {
        Self {
            from: authorization.from,
            to: authorization.to,
            value: authorization.value.into(),
            validAfter: alloy_primitives::U256::from(authorization.valid_after.as_secs()),
            validBefore: alloy_primitives::U256::from(authorization.valid_before.as_secs()),
            nonce: authorization.nonce,
        }
    }
}

//! Signature formats accepted on ERC-3009 authorizations.
//!
//! A payer may be an EOA, a deployed smart wallet (EIP-1271) or a smart wallet that does not
//! exist yet (EIP-6492). The raw bytes alone do not say which, so [`StructuredSignature`]
//! classifies them against the expected signer and the signed digest.

use alloy_primitives::{Address, B256, Bytes, Signature, address, hex};
use alloy_sol_types::{SolType, sol};

/// Universal signature validator deployed at the same address on every supported chain.
///
/// Checks EOA, EIP-1271 and EIP-6492 signatures in one `eth_call`, deploying the wallet
/// inside the simulation when needed.
pub const VALIDATOR_ADDRESS: Address = address!("0xdAcD51A54883eb67D95FAEb2BBfdC4a9a6BD2a3B");

/// Suffix marking an [EIP-6492](https://eips.ethereum.org/EIPS/eip-6492) wrapped signature.
pub const EIP6492_MAGIC_SUFFIX: [u8; 32] =
    hex!("6492649264926492649264926492649264926492649264926492649264926492");

sol! {
    /// Body of an EIP-6492 signature, before the magic suffix.
    #[derive(Debug)]
    struct Sig6492 {
        address factory;
        bytes   factoryCalldata;
        bytes   innerSig;
    }

    interface IValidator6492 {
        function isValidSigWithSideEffects(address _signer, bytes32 _hash, bytes calldata _signature) external returns (bool);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SignatureFormatError {
    #[error("Invalid EIP-6492 signature: {0}")]
    InvalidEip6492(alloy_sol_types::Error),
}

/// A payment signature, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuredSignature {
    /// Signature of a wallet that may not be deployed yet.
    Eip6492 {
        /// Factory that deploys the wallet.
        factory: Address,
        /// Call to send to `factory` to deploy the wallet.
        factory_calldata: Bytes,
        /// Signature the deployed wallet validates.
        inner: Bytes,
        /// The wrapped bytes as received, suffix included.
        original: Bytes,
    },
    /// 65- or 64-byte signature recovering to the expected signer, with normalized `s`.
    Eoa(Signature),
    /// Anything else: left to the signer's `isValidSignature`.
    Eip1271(Bytes),
}

impl StructuredSignature {
    /// Classifies `bytes` as signed by `expected_signer` over `prehash`.
    ///
    /// An ECDSA signature that recovers to some other address is not rejected here; it is
    /// passed on as [`StructuredSignature::Eip1271`] and fails on-chain validation.
    pub fn try_from_bytes(
        bytes: Bytes,
        expected_signer: Address,
        prehash: &B256,
    ) -> Result<Self, SignatureFormatError> {
        if let Some(body) = bytes.strip_suffix(EIP6492_MAGIC_SUFFIX.as_slice()) {
            let wrapped =
                Sig6492::abi_decode_params(body).map_err(SignatureFormatError::InvalidEip6492)?;
            return Ok(StructuredSignature::Eip6492 {
                factory: wrapped.factory,
                factory_calldata: wrapped.factoryCalldata,
                inner: wrapped.innerSig,
                original: bytes,
            });
        }
        let ecdsa = match bytes.len() {
            65 => Signature::from_raw(&bytes).ok(),
            64 => Some(Signature::from_erc2098(&bytes)),
            _ => None,
        }
        .map(|s| s.normalized_s());
        let recovers_to_signer = |s: &Signature| {
            s.recover_address_from_prehash(prehash)
                .is_ok_and(|recovered| recovered == expected_signer)
        };
        match ecdsa {
            Some(signature) if recovers_to_signer(&signature) => {
                Ok(StructuredSignature::Eoa(signature))
            }
            _ => Ok(StructuredSignature::Eip1271(bytes)),
        }
    }

    pub fn is_eip6492(&self) -> bool {
        matches!(self, StructuredSignature::Eip6492 { .. })
    }
}

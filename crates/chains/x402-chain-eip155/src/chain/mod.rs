//! EVM chain support for x402 payments via EIP-155.
//!
//! - [`types`] - wire types: [`ChecksummedAddress`], [`TokenAmount`] and the numeric
//!   [`Eip155ChainReference`]
//! - [`signature`] - parsing of EOA, EIP-1271 and EIP-6492 signatures
//! - [`config`] - per-chain configuration (`facilitator` feature)
//! - [`client`] - the `alloy`-backed [`ChainClient`](x402_types::signer::ChainClient)
//!   (`facilitator` feature)

#[cfg(feature = "facilitator")]
pub mod config;
#[cfg(feature = "facilitator")]
pub use config::*;

#[cfg(feature = "facilitator")]
pub mod pending_nonce_manager;
#[cfg(feature = "facilitator")]
pub use pending_nonce_manager::*;

#[cfg(feature = "facilitator")]
pub mod client;
#[cfg(feature = "facilitator")]
pub use client::*;

pub mod signature;
pub use signature::*;

pub mod types;
pub use types::*;

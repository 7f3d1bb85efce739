//! EIP-155 (EVM) chain support for an x402 facilitator.
//!
//! Two halves, which only meet through [`x402_types::signer::SignerAdapter`]:
//!
//! - [`chain`] - the EVM [`ChainClient`](x402_types::signer::ChainClient): an `alloy`
//!   provider with the facilitator's signing keys, round-robin signer selection, pending-aware
//!   nonce management and universal (EOA / EIP-1271 / EIP-6492) signature checks
//! - [`exact`] - the `exact` payment scheme, settling ERC-3009 `transferWithAuthorization`
//!   authorizations
//!
//! # Feature Flags
//!
//! - `facilitator` - the `alloy`-backed chain client and its configuration
//! - `telemetry` - `tracing` spans on chain calls
//!
//! # Example
//!
//! ```ignore
//! use x402_chain_eip155::chain::{Eip155ChainClient, Eip155ChainConfig};
//! use x402_chain_eip155::ExactEvmBlueprint;
//! use x402_types::chain::FromConfig;
//! use x402_types::scheme::SchemeBlueprints;
//!
//! let client = Eip155ChainClient::from_config(&config).await?;
//! let blueprints = SchemeBlueprints::new().and_register(ExactEvmBlueprint);
//! ```

pub mod chain;
pub mod exact;

pub use exact::{ExactEvmBlueprint, ExactEvmScheme};

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core types for an x402 payment facilitator.
//!
//! A facilitator verifies signed payment payloads against payment requirements and later
//! settles them on-chain. This crate holds everything that is independent of a particular
//! blockchain family: wire types, chain routing, the signer surface handed to payment
//! schemes, and the scheme registry.
//!
//! # Modules
//!
//! - [`chain`] - CAIP-2 chain IDs and the [`ChainRegistry`](chain::ChainRegistry)
//! - [`config`] - RPC config and environment variable resolution
//! - [`facilitator`] - The [`Facilitator`](facilitator::Facilitator) trait (verify, settle, supported)
//! - [`proto`] - Wire format types for protocol version 2
//! - [`scheme`] - The [`PaymentScheme`](scheme::PaymentScheme) trait and scheme registry
//! - [`signer`] - The [`ChainClient`](signer::ChainClient) trait and the [`SignerAdapter`](signer::SignerAdapter)
//! - [`timestamp`] - Unix timestamps used in payment authorization windows
//!
//! # Feature Flags
//!
//! - `telemetry` - Enables tracing spans on signer adapter calls

pub mod chain;
pub mod config;
pub mod facilitator;
pub mod proto;
pub mod scheme;
pub mod signer;
pub mod timestamp;

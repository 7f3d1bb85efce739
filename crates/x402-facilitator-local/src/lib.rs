#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Facilitator engine for the x402 payment protocol.
//!
//! This crate provides [`FacilitatorCore`], a [`Facilitator`](x402_types::facilitator::Facilitator)
//! implementation that validates x402 payment payloads and settles them on-chain through
//! registered payment schemes, plus everything needed to serve it over HTTP.
//!
//! # Architecture
//!
//! 1. **Chain Registry**: One chain client per network ([`x402_types::chain::ChainRegistry`])
//! 2. **Signer Adapter**: Routes chain calls by network ([`x402_types::signer::SignerAdapter`])
//! 3. **Scheme Registry**: Payment schemes per `(scheme, network)` ([`x402_types::scheme::SchemeRegistry`])
//! 4. **Lifecycle Hooks**: Observers and the before-settle gate ([`hooks::LifecycleHooks`])
//! 5. **FacilitatorCore**: The verify/settle state machine ([`FacilitatorCore`])
//!
//! Replay protection is not built into the core. It is a set of hooks installed by
//! [`verification::VerificationTracker`]: settle is refused unless the same payment was
//! verified recently, and a payment can only be settled once.
//!
//! # Modules
//!
//! - [`facilitator_core`] - The verify/settle state machine
//! - [`hooks`] - Lifecycle events and hook lists
//! - [`verification`] - Verification store, tracker hooks and background sweeper
//! - [`handlers`] - HTTP endpoints for the x402 protocol
//! - [`util`] - Graceful shutdown and telemetry
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use x402_facilitator_local::hooks::LifecycleHooks;
//! use x402_facilitator_local::verification::{InMemoryVerificationStore, VerificationTracker};
//! use x402_facilitator_local::{FacilitatorCore, handlers};
//!
//! let store = Arc::new(InMemoryVerificationStore::new());
//! let tracker = Arc::new(VerificationTracker::new(store, Duration::from_secs(300)));
//! let mut hooks = LifecycleHooks::new();
//! tracker.install(&mut hooks);
//!
//! let facilitator = FacilitatorCore::new(scheme_registry, signer).with_hooks(hooks);
//! let app = axum::Router::new().merge(handlers::routes().with_state(Arc::new(facilitator)));
//! ```

pub mod facilitator_core;
pub mod handlers;
pub mod hooks;
pub mod util;
pub mod verification;

pub use facilitator_core::{
    DEFAULT_SETTLE_TIMEOUT, FacilitatorCore, FacilitatorCoreError, SETTLEMENT_ABORTED_PREFIX,
};

//! Payment schemes offered by the facilitator.
//!
//! | Blueprint | Scheme id | Chains |
//! |-----------|-----------|--------|
//! | [`ExactEvmBlueprint`] | `exact` | EIP-155 (EVM) |
//!
//! Which networks a scheme serves, and with what settings, comes from the `schemes`
//! section of the configuration.

use x402_chain_eip155::ExactEvmBlueprint;
use x402_types::scheme::SchemeBlueprints;

pub fn blueprints() -> SchemeBlueprints {
    SchemeBlueprints::new().and_register(ExactEvmBlueprint)
}

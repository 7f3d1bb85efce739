//! Process plumbing for running the facilitator as a service.
//!
//! | Module | Description | Feature |
//! |--------|-------------|---------|
//! | [`sig_down`] | Shutdown on SIGTERM/SIGINT, with task draining | - |
//! | [`telemetry`] | Logging, OpenTelemetry tracing and metrics setup | `telemetry` |

pub mod sig_down;
#[cfg(feature = "telemetry")]
pub mod telemetry;

pub use sig_down::*;
#[cfg(feature = "telemetry")]
pub use telemetry::*;

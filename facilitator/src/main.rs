//! x402 Facilitator HTTP entrypoint.
//!
//! Launches an Axum HTTP server that verifies and settles x402 payments on EVM networks.
//!
//! Endpoints:
//! - `GET /verify` – Supported verification schema
//! - `POST /verify` – Verify a payment payload against requirements
//! - `GET /settle` – Supported settlement schema
//! - `POST /settle` – Settle a verified payment payload on-chain
//! - `GET /supported` – List supported payment kinds (version/scheme/network)
//! - `GET /health` – Liveness probe
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `CONFIG` selects the configuration file, `config.json` by default
//! - `HOST`, `PORT` control binding address when the file leaves them out
//! - `OTEL_*` variables enable trace and metric export with the `telemetry` feature

mod chain;
mod config;
mod run;
mod schemes;

use std::process;

use crate::run::run;

#[tokio::main]
async fn main() {
    let result = run().await;
    if let Err(e) = result {
        eprintln!("{e}");
        process::exit(1)
    }
}

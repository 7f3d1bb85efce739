//! Server bootstrap.
//!
//! Startup order: `.env`, logging and telemetry, configuration, chain clients, payment
//! schemes, replay protection hooks, then the HTTP server. Any failure before the server
//! binds is fatal.

use axum::Router;
use axum::http::Method;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors;
use x402_facilitator_local::hooks::LifecycleHooks;
use x402_facilitator_local::util::SigDown;
use x402_facilitator_local::verification::{
    InMemoryVerificationStore, VerificationStore, VerificationTracker, spawn_sweeper,
};
use x402_facilitator_local::{FacilitatorCore, handlers};
use x402_types::chain::{ChainRegistry, FromConfig};
use x402_types::scheme::SchemeRegistry;
use x402_types::signer::{ChainClient, SignerAdapter};

#[cfg(feature = "telemetry")]
use x402_facilitator_local::util::{Telemetry, http_tracing};

use crate::config::Config;
use crate::schemes;

/// How long in-flight work may take to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Initializes the x402 facilitator server.
///
/// Binds to the `host` and `port` of the configuration and serves until SIGTERM or
/// SIGINT.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| "Failed to initialize rustls crypto provider")?;

    dotenv().ok();

    #[cfg(feature = "telemetry")]
    let _telemetry = Telemetry::new()
        .with_name(env!("CARGO_PKG_NAME"))
        .with_version(env!("CARGO_PKG_VERSION"))
        .register();

    let config = Config::load()?;

    let chain_registry: ChainRegistry<Arc<dyn ChainClient>> =
        ChainRegistry::from_config(config.chains()).await?;
    if chain_registry.is_empty() {
        tracing::warn!("No chain is enabled, every payment will be rejected");
    }
    let scheme_registry =
        SchemeRegistry::build(&chain_registry, &schemes::blueprints(), config.schemes())?;
    let signer = SignerAdapter::new(
        Arc::new(chain_registry),
        config.default_network().cloned(),
    )?;
    tracing::info!(schemes = ?scheme_registry, "Payment schemes registered");

    let sig_down = SigDown::try_new()?;

    let verification = config.verification();
    let store: Arc<dyn VerificationStore> = Arc::new(InMemoryVerificationStore::new());
    let tracker = Arc::new(VerificationTracker::new(
        Arc::clone(&store),
        verification.freshness(),
    ));
    let mut hooks = LifecycleHooks::new();
    tracker.install(&mut hooks);
    sig_down.task_tracker().spawn(spawn_sweeper(
        store,
        verification.freshness(),
        verification.sweep_interval(),
        sig_down.cancellation_token(),
    ));

    let facilitator = FacilitatorCore::new(scheme_registry, signer)
        .with_hooks(hooks)
        .with_settle_timeout(config.settle_timeout());
    let axum_state = Arc::new(facilitator);

    let http_endpoints = Router::new().merge(handlers::routes().with_state(axum_state));
    #[cfg(feature = "telemetry")]
    let http_endpoints = http_endpoints.layer(http_tracing());
    let http_endpoints = http_endpoints.layer(
        cors::CorsLayer::new()
            .allow_origin(cors::Any)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(cors::Any),
    );

    let addr = SocketAddr::new(config.host(), config.port());
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .inspect_err(|e| tracing::error!("Failed to bind to {}: {}", addr, e))?;

    let axum_cancellation_token = sig_down.cancellation_token();
    let axum_graceful_shutdown = async move { axum_cancellation_token.cancelled().await };
    axum::serve(listener, http_endpoints)
        .with_graceful_shutdown(axum_graceful_shutdown)
        .await?;

    sig_down.shutdown(SHUTDOWN_GRACE).await;
    tracing::info!("Server stopped");
    Ok(())
}

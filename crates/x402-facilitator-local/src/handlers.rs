//! HTTP endpoints implemented by the x402 **facilitator**.
//!
//! Protocol-critical endpoints (`/verify`, `/settle`) and discovery endpoints
//! (`/supported`, `/health`, and `GET` descriptions of the `POST` endpoints).
//!
//! Status codes:
//!
//! - `200` for every verify or settle outcome, including invalid payments and aborted
//!   settlements
//! - `400` with `{"error": ...}` when the body is not a valid request, e.g. a missing
//!   `paymentRequirements`
//! - `500` with `{"error": ...}` for anything the facilitator could not turn into a
//!   response

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use x402_types::chain::ChainId;
use x402_types::facilitator::Facilitator;
use x402_types::proto;
use x402_types::proto::ErrorResponse;

#[cfg(feature = "telemetry")]
use tracing::instrument;

use crate::facilitator_core::SETTLEMENT_ABORTED_PREFIX;

/// All facilitator routes, with the facilitator as router state.
pub fn routes<A>() -> Router<A>
where
    A: Facilitator + Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/verify", get(get_verify_info).post(post_verify::<A>))
        .route("/settle", get(get_settle_info).post(post_settle::<A>))
        .route("/supported", get(get_supported::<A>))
        .route("/health", get(get_health))
}

/// `GET /verify`: Returns a machine-readable description of the `/verify` endpoint.
#[cfg_attr(feature = "telemetry", instrument(skip_all))]
pub async fn get_verify_info() -> impl IntoResponse {
    Json(json!({
        "endpoint": "/verify",
        "description": "POST to verify x402 payments",
        "body": {
            "paymentPayload": "PaymentPayload",
            "paymentRequirements": "PaymentRequirements",
        }
    }))
}

/// `GET /settle`: Returns a machine-readable description of the `/settle` endpoint.
#[cfg_attr(feature = "telemetry", instrument(skip_all))]
pub async fn get_settle_info() -> impl IntoResponse {
    Json(json!({
        "endpoint": "/settle",
        "description": "POST to settle x402 payments",
        "body": {
            "paymentPayload": "PaymentPayload",
            "paymentRequirements": "PaymentRequirements",
        }
    }))
}

#[cfg_attr(feature = "telemetry", instrument(skip_all))]
pub async fn get_health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// `GET /supported`: Lists the `(scheme, network)` pairs this facilitator serves.
#[cfg_attr(feature = "telemetry", instrument(skip_all))]
pub async fn get_supported<A>(State(facilitator): State<A>) -> Response
where
    A: Facilitator + Send + Sync,
{
    match facilitator.supported().await {
        Ok(supported) => (StatusCode::OK, Json(supported)).into_response(),
        Err(error) => internal_error(error.to_string()),
    }
}

/// `POST /verify`: Checks a payment payload against its requirements without moving funds.
#[cfg_attr(feature = "telemetry", instrument(skip_all))]
pub async fn post_verify<A>(
    State(facilitator): State<A>,
    body: Result<Json<proto::VerifyRequest>, JsonRejection>,
) -> Response
where
    A: Facilitator + Send + Sync,
{
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => return bad_request(rejection),
    };
    match facilitator.verify(&body).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(error) => {
            tracing::warn!(
                error = %error,
                network = %body.network(),
                "Verification failed unexpectedly"
            );
            internal_error(error.to_string())
        }
    }
}

/// `POST /settle`: Executes a verified payment on-chain.
///
/// An aborted settlement reported as an error is still answered with a `200`
/// [`proto::SettleResponse`].
#[cfg_attr(feature = "telemetry", instrument(skip_all))]
pub async fn post_settle<A>(
    State(facilitator): State<A>,
    body: Result<Json<proto::SettleRequest>, JsonRejection>,
) -> Response
where
    A: Facilitator + Send + Sync,
{
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => return bad_request(rejection),
    };
    match facilitator.settle(&body).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(error) => settle_error_response(error.to_string(), body.network()),
    }
}

fn settle_error_response(message: String, network: &ChainId) -> Response {
    if message.starts_with(SETTLEMENT_ABORTED_PREFIX) {
        tracing::info!(%network, reason = %message, "Settlement aborted");
        let response = proto::SettleResponse::Error {
            reason: message,
            payer: None,
            network: network.clone(),
        };
        return (StatusCode::OK, Json(response)).into_response();
    }
    tracing::warn!(%network, error = %message, "Settlement failed unexpectedly");
    internal_error(message)
}

fn bad_request(rejection: JsonRejection) -> Response {
    tracing::debug!(error = %rejection.body_text(), "Malformed request");
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse::new(rejection.body_text())),
    )
        .into_response()
}

fn internal_error(message: String) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::new(message)),
    )
        .into_response()
}

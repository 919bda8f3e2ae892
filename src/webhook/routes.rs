//! Webhook endpoints: verification handshake and event ingestion.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::handshake::{self, Verification};
use super::payload;
use crate::pipeline::MessageProcessor;

#[derive(Clone)]
pub struct WebhookState {
    pub processor: Arc<MessageProcessor>,
    /// `None` when the relay is unconfigured; every handshake is rejected.
    pub verify_token: Option<SecretString>,
}

/// Router exposing `GET /webhook` and `POST /webhook`.
pub fn webhook_routes(state: WebhookState) -> Router {
    Router::new()
        .route("/webhook", get(verify_subscription).post(receive_events))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
struct VerifyParams {
    #[serde(rename = "hub.mode", default)]
    mode: String,
    #[serde(rename = "hub.verify_token", default)]
    verify_token: String,
    #[serde(rename = "hub.challenge", default)]
    challenge: String,
}

async fn verify_subscription(
    State(state): State<WebhookState>,
    Query(params): Query<VerifyParams>,
) -> Response {
    let expected = state
        .verify_token
        .as_ref()
        .map(|t| t.expose_secret())
        .unwrap_or_default();

    match handshake::verify(&params.mode, &params.verify_token, &params.challenge, expected) {
        Verification::Verified(challenge) => {
            info!("Webhook subscription verified");
            (StatusCode::OK, challenge).into_response()
        }
        Verification::Rejected => {
            warn!(mode = %params.mode, "Webhook verification rejected");
            StatusCode::FORBIDDEN.into_response()
        }
    }
}

/// Acknowledge immediately; processing runs in the background.
async fn receive_events(State(state): State<WebhookState>, body: Bytes) -> Response {
    let raw = match payload::parse_body(&body) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(error = %e, bytes = body.len(), "Webhook body is not JSON");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "malformed_payload",
                    "message": e.to_string(),
                })),
            )
                .into_response();
        }
    };

    let batch = payload::normalize(&raw);
    debug!(
        messages = batch.messages.len(),
        statuses = batch.statuses.len(),
        "Webhook received"
    );
    if !batch.is_empty() {
        state.processor.ingest(batch);
    }

    (StatusCode::OK, Json(json!({ "status": "received" }))).into_response()
}

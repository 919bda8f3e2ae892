//! REST endpoints for outbound sends, status lookups and rule management.
//!
//! Send endpoints always answer `{"success": bool, ...}` so callers branch
//! on the flag rather than on transport errors.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::error::{GatewayError, RulesError, ValidationError};
use crate::gateway::{DispatchResult, TemplateMessage};
use crate::pipeline::{AutoResponseRule, MessageProcessor, OutboundMessage};

/// Shared state for the REST handlers.
#[derive(Clone)]
pub struct ApiState {
    pub processor: Arc<MessageProcessor>,
    /// Required secrets that are not set. Empty when fully configured.
    pub missing_config: Vec<String>,
    /// Language used for templates that do not name one.
    pub default_language: String,
}

pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(config_status))
        .route("/api/messages/send", post(send_message))
        .route("/api/messages/template", post(send_template))
        .route("/api/messages/mark-read", post(mark_read))
        .route("/api/messages/{id}/status", get(message_status))
        .route("/api/rules", get(list_rules).put(replace_rules))
        .with_state(state)
}

// ── Response helpers ────────────────────────────────────────────────────

fn dispatched(result: &DispatchResult) -> Response {
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "providerMessageId": result.provider_message_id,
            "destination": result.destination,
            "sentAt": result.sent_at,
        })),
    )
        .into_response()
}

fn validation_failure(err: ValidationError) -> Response {
    let mut body = json!({
        "success": false,
        "error": "validation_error",
        "message": err.to_string(),
    });
    match &err {
        ValidationError::MissingFields { fields } => body["fields"] = json!(fields),
        ValidationError::InvalidField { field, .. } => body["fields"] = json!([field]),
        ValidationError::MalformedBody(_) => {}
    }
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}

fn gateway_failure(err: GatewayError) -> Response {
    match err {
        GatewayError::NotConfigured { ref missing } => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "success": false,
                "error": "not_configured",
                "message": err.to_string(),
                "missing": missing,
            })),
        )
            .into_response(),
        GatewayError::InvalidMessageId(_) => validation_failure(ValidationError::InvalidField {
            field: "id".into(),
            reason: err.to_string(),
        }),
        GatewayError::UpstreamApi {
            status,
            ref message,
            ref details,
        } => {
            let code = match status {
                Some(404) => StatusCode::NOT_FOUND,
                _ => StatusCode::BAD_GATEWAY,
            };
            (
                code,
                Json(json!({
                    "success": false,
                    "error": "upstream_api_error",
                    "message": message,
                    "upstreamStatus": status,
                    "details": details,
                })),
            )
                .into_response()
        }
    }
}

/// Unwrap a JSON body or turn the rejection into a structured 400.
fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, Response> {
    body.map(|Json(v)| v).map_err(|rejection| {
        debug!(error = %rejection.body_text(), "Rejected request body");
        validation_failure(ValidationError::MalformedBody(rejection.body_text()))
    })
}

fn present(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

// ── Health / status ─────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "whatsapp-relay"
    }))
}

async fn config_status(State(state): State<ApiState>) -> impl IntoResponse {
    let processor = &state.processor;
    Json(json!({
        "configured": state.missing_config.is_empty(),
        "missing": state.missing_config,
        "trackedMessages": processor.tracker().len().await,
        "viewers": processor.broadcaster().registry().len().await,
        "rules": processor.rules().await.len(),
    }))
}

// ── Sends ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest {
    destination: Option<String>,
    body: Option<String>,
    kind: Option<String>,
    media_url: Option<String>,
    caption: Option<String>,
    viewer_id: Option<String>,
}

impl SendRequest {
    fn into_outbound(self) -> Result<(OutboundMessage, Option<String>), ValidationError> {
        let kind = self.kind.as_deref().unwrap_or("text");
        let mut missing = Vec::new();
        if !present(&self.destination) {
            missing.push("destination".to_string());
        }

        let message = match kind {
            "text" => {
                if !present(&self.body) {
                    missing.push("body".to_string());
                }
                if !missing.is_empty() {
                    return Err(ValidationError::MissingFields { fields: missing });
                }
                OutboundMessage::Text {
                    destination: self.destination.unwrap_or_default(),
                    body: self.body.unwrap_or_default(),
                }
            }
            "image" => {
                if !present(&self.media_url) {
                    missing.push("mediaUrl".to_string());
                }
                if !missing.is_empty() {
                    return Err(ValidationError::MissingFields { fields: missing });
                }
                OutboundMessage::Image {
                    destination: self.destination.unwrap_or_default(),
                    media_url: self.media_url.unwrap_or_default(),
                    caption: self.caption.or(self.body),
                }
            }
            other => {
                return Err(ValidationError::InvalidField {
                    field: "kind".into(),
                    reason: format!("unsupported kind '{other}', expected text or image"),
                });
            }
        };
        Ok((message, self.viewer_id))
    }
}

async fn send_message(
    State(state): State<ApiState>,
    body: Result<Json<SendRequest>, JsonRejection>,
) -> Response {
    let request = match json_body(body) {
        Ok(r) => r,
        Err(response) => return response,
    };
    let (message, viewer_id) = match request.into_outbound() {
        Ok(parts) => parts,
        Err(e) => return validation_failure(e),
    };

    match state.processor.send(&message, viewer_id.as_deref()).await {
        Ok(result) => dispatched(&result),
        Err(e) => gateway_failure(e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TemplateRequest {
    destination: Option<String>,
    template_name: Option<String>,
    language_code: Option<String>,
    #[serde(default)]
    components: Vec<Value>,
    viewer_id: Option<String>,
}

async fn send_template(
    State(state): State<ApiState>,
    body: Result<Json<TemplateRequest>, JsonRejection>,
) -> Response {
    let request = match json_body(body) {
        Ok(r) => r,
        Err(response) => return response,
    };

    let mut missing = Vec::new();
    if !present(&request.destination) {
        missing.push("destination".to_string());
    }
    if !present(&request.template_name) {
        missing.push("templateName".to_string());
    }
    if !missing.is_empty() {
        return validation_failure(ValidationError::MissingFields { fields: missing });
    }

    let template = TemplateMessage {
        name: request.template_name.unwrap_or_default(),
        language_code: request
            .language_code
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| state.default_language.clone()),
        components: request.components,
    };
    let destination = request.destination.unwrap_or_default();

    match state
        .processor
        .send_template(&destination, &template, request.viewer_id.as_deref())
        .await
    {
        Ok(result) => dispatched(&result),
        Err(e) => gateway_failure(e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkReadRequest {
    provider_message_id: Option<String>,
}

async fn mark_read(
    State(state): State<ApiState>,
    body: Result<Json<MarkReadRequest>, JsonRejection>,
) -> Response {
    let request = match json_body(body) {
        Ok(r) => r,
        Err(response) => return response,
    };
    let Some(id) = request.provider_message_id.filter(|id| !id.trim().is_empty()) else {
        return validation_failure(ValidationError::MissingFields {
            fields: vec!["providerMessageId".into()],
        });
    };

    let success = state.processor.mark_read(&id).await;
    (StatusCode::OK, Json(json!({ "success": success }))).into_response()
}

// ── Status lookup ───────────────────────────────────────────────────────

async fn message_status(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.processor.message_status(&id).await {
        Ok(lookup) => {
            let mut body = serde_json::to_value(&lookup).unwrap_or_else(|_| json!({}));
            body["success"] = json!(true);
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => gateway_failure(e),
    }
}

// ── Rules ───────────────────────────────────────────────────────────────

async fn list_rules(State(state): State<ApiState>) -> impl IntoResponse {
    let rules = state.processor.rules().await;
    Json(json!({ "rules": rules.rules() }))
}

#[derive(Debug, Deserialize)]
struct ReplaceRulesRequest {
    rules: Vec<AutoResponseRule>,
}

async fn replace_rules(
    State(state): State<ApiState>,
    body: Result<Json<ReplaceRulesRequest>, JsonRejection>,
) -> Response {
    let request = match json_body(body) {
        Ok(r) => r,
        Err(response) => return response,
    };

    match state.processor.replace_rules(request.rules).await {
        Ok(table) => {
            info!(count = table.len(), "Rules replaced via API");
            (
                StatusCode::OK,
                Json(json!({ "success": true, "rules": table.rules() })),
            )
                .into_response()
        }
        Err(RulesError::Validation(e)) => validation_failure(e),
        Err(e @ RulesError::Persistence(_)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "success": false,
                "error": "persistence_error",
                "message": e.to_string(),
            })),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::gateway::UnconfiguredGateway;
    use crate::pipeline::RuleTable;
    use crate::realtime::{EventBroadcaster, SessionRegistry};
    use crate::tracking::StatusTracker;

    fn unconfigured_app() -> Router {
        let missing = vec!["WHATSAPP_ACCESS_TOKEN".to_string()];
        let processor = MessageProcessor::new(
            Arc::new(UnconfiguredGateway::new(missing.clone())),
            RuleTable::default_rules(),
            EventBroadcaster::new(Arc::new(SessionRegistry::new())),
            Arc::new(StatusTracker::new()),
        );
        api_routes(ApiState {
            processor: Arc::new(processor),
            missing_config: missing,
            default_language: "en_US".into(),
        })
    }

    async fn call(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn send_names_missing_fields() {
        let (status, body) = call(
            unconfigured_app(),
            post_json("/api/messages/send", json!({ "kind": "text" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["fields"], json!(["destination", "body"]));
    }

    #[tokio::test]
    async fn image_send_requires_media_url() {
        let (status, body) = call(
            unconfigured_app(),
            post_json(
                "/api/messages/send",
                json!({ "destination": "15551234567", "kind": "image" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["fields"], json!(["mediaUrl"]));
    }

    #[tokio::test]
    async fn unknown_kind_is_rejected() {
        let (status, body) = call(
            unconfigured_app(),
            post_json(
                "/api/messages/send",
                json!({ "destination": "1", "body": "x", "kind": "sticker" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["fields"], json!(["kind"]));
    }

    #[tokio::test]
    async fn malformed_json_is_structured_400() {
        let request = Request::post("/api/messages/send")
            .header("content-type", "application/json")
            .body(Body::from("{oops"))
            .unwrap();
        let (status, body) = call(unconfigured_app(), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn unconfigured_send_is_503_with_flag() {
        let (status, body) = call(
            unconfigured_app(),
            post_json(
                "/api/messages/send",
                json!({ "destination": "15551234567", "body": "hi" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "not_configured");
        assert_eq!(body["missing"], json!(["WHATSAPP_ACCESS_TOKEN"]));
    }

    #[tokio::test]
    async fn template_requires_name() {
        let (status, body) = call(
            unconfigured_app(),
            post_json("/api/messages/template", json!({ "destination": "15551234567" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["fields"], json!(["templateName"]));
    }

    #[tokio::test]
    async fn mark_read_degrades_to_false() {
        let (status, body) = call(
            unconfigured_app(),
            post_json("/api/messages/mark-read", json!({ "providerMessageId": "wamid.1" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn rules_can_be_listed_and_replaced() {
        let app = unconfigured_app();
        let (status, body) = call(
            app.clone(),
            Request::get("/api/rules").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rules"].as_array().unwrap().len(), 4);

        let replace = Request::put("/api/rules")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({ "rules": [{ "triggers": ["Refund"], "response": "5 days" }] }).to_string(),
            ))
            .unwrap();
        let (status, body) = call(app.clone(), replace).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rules"][0]["triggers"], json!(["refund"]));

        let invalid = Request::put("/api/rules")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({ "rules": [{ "triggers": [], "response": "x" }] }).to_string(),
            ))
            .unwrap();
        let (status, body) = call(app, invalid).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["fields"], json!(["rules[0].triggers"]));
    }

    #[tokio::test]
    async fn status_reports_unconfigured() {
        let (status, body) = call(
            unconfigured_app(),
            Request::get("/api/status").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["configured"], false);
        assert_eq!(body["missing"], json!(["WHATSAPP_ACCESS_TOKEN"]));
    }

    #[test]
    fn unaddressable_message_id_is_a_validation_error() {
        let response = gateway_failure(GatewayError::InvalidMessageId("../me/accounts".into()));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

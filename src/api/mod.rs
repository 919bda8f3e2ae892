//! HTTP surface: REST routes plus the composed application router.

pub mod routes;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::CorsLayer;

use crate::config::AppConfig;
use crate::pipeline::MessageProcessor;
use crate::realtime::realtime_routes;
use crate::webhook::{WebhookState, webhook_routes};

pub use routes::{ApiState, api_routes};

/// Build the full router: webhook, REST API and realtime channel.
pub fn app_router(processor: Arc<MessageProcessor>, config: &AppConfig) -> Router {
    let registry = Arc::clone(processor.broadcaster().registry());

    let webhook = webhook_routes(WebhookState {
        processor: Arc::clone(&processor),
        verify_token: config.gateway.verify_token.clone(),
    });
    let api = api_routes(ApiState {
        processor,
        missing_config: config.gateway.missing(),
        default_language: config.default_language.clone(),
    });

    webhook
        .merge(api)
        .merge(realtime_routes(registry))
        .layer(CorsLayer::permissive())
}

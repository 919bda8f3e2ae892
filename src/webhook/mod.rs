//! Provider webhook: handshake, payload normalization and HTTP endpoints.

pub mod handshake;
pub mod payload;
pub mod routes;

pub use routes::{WebhookState, webhook_routes};

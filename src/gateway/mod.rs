//! Messaging provider gateway.
//!
//! `MessagingGateway` is the opaque RPC boundary to the provider. The
//! production implementation is [`CloudApiClient`]; when the required
//! secrets are missing the relay runs with [`UnconfiguredGateway`] instead.

pub mod client;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::pipeline::types::DeliveryStatus;

pub use client::CloudApiClient;

/// Returned by every successful send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResult {
    /// Id the provider assigned; later status callbacks refer to it.
    pub provider_message_id: String,
    /// Normalized destination the message was sent to.
    pub destination: String,
    pub sent_at: DateTime<Utc>,
}

/// Template send parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateMessage {
    pub name: String,
    pub language_code: String,
    /// Provider-defined component objects, passed through untouched.
    #[serde(default)]
    pub components: Vec<serde_json::Value>,
}

/// Provider's view of a message, from a read-through status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    pub provider_message_id: String,
    /// `None` when the provider did not report a recognisable stage.
    pub status: Option<DeliveryStatus>,
    /// Raw provider response.
    pub raw: serde_json::Value,
}

/// Outbound operations against the messaging provider.
///
/// Destinations are normalized with [`crate::phone::normalize`] by the
/// implementation before transmission.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Send a plain text message.
    async fn send_text(&self, destination: &str, body: &str)
    -> Result<DispatchResult, GatewayError>;

    /// Send an image by URL with an optional caption.
    async fn send_media(
        &self,
        destination: &str,
        media_url: &str,
        caption: Option<&str>,
    ) -> Result<DispatchResult, GatewayError>;

    /// Send a pre-approved template.
    async fn send_template(
        &self,
        destination: &str,
        template: &TemplateMessage,
    ) -> Result<DispatchResult, GatewayError>;

    /// Mark an inbound message as read. Failures degrade to `false`.
    async fn mark_read(&self, provider_message_id: &str) -> bool;

    /// Ask the provider directly for a message's state.
    async fn get_status(&self, provider_message_id: &str)
    -> Result<ProviderStatus, GatewayError>;
}

/// Stand-in used when required secrets are missing.
///
/// Every call fails with [`GatewayError::NotConfigured`]; nothing crashes.
#[derive(Debug, Clone)]
pub struct UnconfiguredGateway {
    missing: Vec<String>,
}

impl UnconfiguredGateway {
    pub fn new(missing: Vec<String>) -> Self {
        Self { missing }
    }

    fn error(&self) -> GatewayError {
        GatewayError::NotConfigured {
            missing: self.missing.clone(),
        }
    }
}

#[async_trait]
impl MessagingGateway for UnconfiguredGateway {
    async fn send_text(&self, _destination: &str, _body: &str) -> Result<DispatchResult, GatewayError> {
        Err(self.error())
    }

    async fn send_media(
        &self,
        _destination: &str,
        _media_url: &str,
        _caption: Option<&str>,
    ) -> Result<DispatchResult, GatewayError> {
        Err(self.error())
    }

    async fn send_template(
        &self,
        _destination: &str,
        _template: &TemplateMessage,
    ) -> Result<DispatchResult, GatewayError> {
        Err(self.error())
    }

    async fn mark_read(&self, provider_message_id: &str) -> bool {
        tracing::debug!(message_id = provider_message_id, "mark_read skipped, gateway not configured");
        false
    }

    async fn get_status(&self, _provider_message_id: &str) -> Result<ProviderStatus, GatewayError> {
        Err(self.error())
    }
}

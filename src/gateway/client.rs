//! WhatsApp Cloud API client.
//!
//! Sends through `{api_base}/{api_version}/{phone_number_id}/messages` with a
//! bearer token. Non-success responses become [`GatewayError::UpstreamApi`]
//! carrying the provider's `error` object.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Url};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::{DispatchResult, MessagingGateway, ProviderStatus, TemplateMessage};
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::phone;
use crate::pipeline::types::DeliveryStatus;

/// HTTP client for the provider's Cloud API.
pub struct CloudApiClient {
    client: Client,
    /// `{api_base}/{api_version}`
    api_root: String,
    phone_number_id: String,
    access_token: SecretString,
}

impl CloudApiClient {
    /// Build a client from configuration.
    ///
    /// Fails with [`GatewayError::NotConfigured`] when the access token or
    /// sender id is absent.
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let (Some(access_token), Some(phone_number_id)) =
            (config.access_token.clone(), config.phone_number_id.clone())
        else {
            return Err(GatewayError::NotConfigured {
                missing: config.missing(),
            });
        };

        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GatewayError::transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_root: format!("{}/{}", config.api_base, config.api_version),
            phone_number_id,
            access_token,
        })
    }

    fn messages_url(&self) -> String {
        format!("{}/{}/messages", self.api_root, self.phone_number_id)
    }

    /// `{api_root}/{id}`, with the id encoded as exactly one path segment.
    fn status_url(&self, provider_message_id: &str) -> Result<Url, GatewayError> {
        let id = provider_message_id.trim();
        if id.is_empty() || id.contains('/') || id == "." || id == ".." {
            return Err(GatewayError::InvalidMessageId(provider_message_id.to_string()));
        }

        let mut url = Url::parse(&self.api_root)
            .map_err(|e| GatewayError::transport(format!("invalid API root {}: {e}", self.api_root)))?;
        url.path_segments_mut()
            .map_err(|()| GatewayError::transport(format!("API root {} cannot carry a path", self.api_root)))?
            .pop_if_empty()
            .push(id);
        Ok(url)
    }

    /// POST a message object and turn the response into a `DispatchResult`.
    async fn dispatch(&self, destination: &str, mut message: Value) -> Result<DispatchResult, GatewayError> {
        let to = phone::normalize(destination);
        message["messaging_product"] = json!("whatsapp");
        message["recipient_type"] = json!("individual");
        message["to"] = json!(to);

        let body = self
            .send(self.client.post(self.messages_url()).json(&message))
            .await?;

        let provider_message_id = body
            .pointer("/messages/0/id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| GatewayError::UpstreamApi {
                status: None,
                message: "response did not include a message id".into(),
                details: Some(body.clone()),
            })?;

        info!(to = %to, message_id = %provider_message_id, "Message dispatched");
        Ok(DispatchResult {
            provider_message_id,
            destination: to,
            sent_at: Utc::now(),
        })
    }

    /// Execute a request and return the parsed JSON body of a success response.
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, GatewayError> {
        let response = request
            .bearer_auth(self.access_token.expose_secret())
            .send()
            .await
            .map_err(|e| GatewayError::transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::transport(format!("failed to read response body: {e}")))?;
        let body: Option<Value> = serde_json::from_str(&text).ok();

        if !status.is_success() {
            let details = body.as_ref().and_then(|b| b.get("error")).cloned();
            let message = details
                .as_ref()
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| {
                    if text.is_empty() {
                        status.to_string()
                    } else {
                        text.clone()
                    }
                });
            warn!(status = %status, error = %message, "Gateway request failed");
            return Err(GatewayError::UpstreamApi {
                status: Some(status.as_u16()),
                message,
                details,
            });
        }

        body.ok_or_else(|| GatewayError::UpstreamApi {
            status: Some(status.as_u16()),
            message: "response body was not JSON".into(),
            details: None,
        })
    }
}

#[async_trait]
impl MessagingGateway for CloudApiClient {
    async fn send_text(&self, destination: &str, body: &str) -> Result<DispatchResult, GatewayError> {
        self.dispatch(
            destination,
            json!({
                "type": "text",
                "text": { "preview_url": false, "body": body }
            }),
        )
        .await
    }

    async fn send_media(
        &self,
        destination: &str,
        media_url: &str,
        caption: Option<&str>,
    ) -> Result<DispatchResult, GatewayError> {
        let mut image = json!({ "link": media_url });
        if let Some(caption) = caption {
            image["caption"] = json!(caption);
        }
        self.dispatch(destination, json!({ "type": "image", "image": image }))
            .await
    }

    async fn send_template(
        &self,
        destination: &str,
        template: &TemplateMessage,
    ) -> Result<DispatchResult, GatewayError> {
        let mut body = json!({
            "name": template.name,
            "language": { "code": template.language_code },
        });
        if !template.components.is_empty() {
            body["components"] = json!(template.components);
        }
        self.dispatch(destination, json!({ "type": "template", "template": body }))
            .await
    }

    async fn mark_read(&self, provider_message_id: &str) -> bool {
        let request = self.client.post(self.messages_url()).json(&json!({
            "messaging_product": "whatsapp",
            "status": "read",
            "message_id": provider_message_id,
        }));

        match self.send(request).await {
            Ok(body) => {
                let ok = body.get("success").and_then(Value::as_bool).unwrap_or(true);
                debug!(message_id = provider_message_id, success = ok, "Marked message read");
                ok
            }
            Err(e) => {
                warn!(message_id = provider_message_id, error = %e, "Failed to mark message read");
                false
            }
        }
    }

    async fn get_status(&self, provider_message_id: &str) -> Result<ProviderStatus, GatewayError> {
        let url = self.status_url(provider_message_id)?;
        let raw = self.send(self.client.get(url)).await?;
        let status = raw
            .get("status")
            .and_then(Value::as_str)
            .and_then(DeliveryStatus::from_provider);

        Ok(ProviderStatus {
            provider_message_id: provider_message_id.to_string(),
            status,
            raw,
        })
    }
}

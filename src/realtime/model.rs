//! Realtime frames pushed to connected viewers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pipeline::types::{DeliveryStatus, InboundMessage, StatusErrorDetail};

/// Payload of a `message_status` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub message_id: String,
    pub status: DeliveryStatus,
    pub timestamp: DateTime<Utc>,
    pub recipient_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<StatusErrorDetail>,
}

/// Payload of an `auto_response_sent` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoResponse {
    /// Normalized destination the reply went to.
    pub to: String,
    pub message: String,
    /// Trigger keyword that fired the rule.
    pub trigger: String,
    pub provider_message_id: String,
    /// Inbound message id being answered.
    pub in_reply_to: String,
    pub timestamp: DateTime<Utc>,
}

/// Events sent over the realtime channel, framed as
/// `{"event": "<name>", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum RealtimeEvent {
    /// Sent once when a session is established.
    #[serde(rename_all = "camelCase")]
    Connected { viewer_id: String, connection_id: Uuid },
    /// An inbound message arrived.
    MessageReceived(InboundMessage),
    /// A delivery status changed.
    MessageStatus(StatusUpdate),
    /// An automatic reply was dispatched.
    AutoResponseSent(AutoResponse),
}

impl RealtimeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::MessageReceived(_) => "message_received",
            Self::MessageStatus(_) => "message_status",
            Self::AutoResponseSent(_) => "auto_response_sent",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::MessageKind;

    #[test]
    fn frames_are_event_and_data() {
        let event = RealtimeEvent::AutoResponseSent(AutoResponse {
            to: "15551234567".into(),
            message: "Our pricing starts at $29/month.".into(),
            trigger: "price".into(),
            provider_message_id: "wamid.OUT".into(),
            in_reply_to: "wamid.IN".into(),
            timestamp: Utc::now(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "auto_response_sent");
        assert_eq!(json["data"]["trigger"], "price");
        assert_eq!(json["data"]["providerMessageId"], "wamid.OUT");
        assert_eq!(json["data"]["inReplyTo"], "wamid.IN");
        assert_eq!(event.name(), "auto_response_sent");
    }

    #[test]
    fn message_received_carries_the_message() {
        let event = RealtimeEvent::MessageReceived(InboundMessage {
            id: "wamid.1".into(),
            from: "15551234567".into(),
            timestamp: Utc::now(),
            kind: MessageKind::Text,
            text_body: Some("hi".into()),
            media: None,
            contact: None,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "message_received");
        assert_eq!(json["data"]["from"], "15551234567");

        let back: RealtimeEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn connected_frame_uses_camel_case() {
        let id = Uuid::new_v4();
        let json = serde_json::to_value(RealtimeEvent::Connected {
            viewer_id: "v1".into(),
            connection_id: id,
        })
        .unwrap();
        assert_eq!(json["event"], "connected");
        assert_eq!(json["data"]["viewerId"], "v1");
        assert_eq!(json["data"]["connectionId"], id.to_string());
    }
}

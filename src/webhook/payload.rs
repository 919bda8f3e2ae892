//! Webhook payload normalization.
//!
//! Provider envelope: `{entry: [{changes: [{value: {messages?, statuses?, contacts?}}]}]}`.
//! Only `entry[0].changes[0].value` is read. Every level is optional and
//! normalization never fails: anything absent or unrecognisable yields empty
//! lists. Individual messages or statuses that cannot be read are skipped
//! without affecting their siblings.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::pipeline::types::{
    ContactInfo, DeliveryStatus, InboundMessage, MediaRef, MessageKind, NormalizedBatch,
    StatusErrorDetail, StatusEvent,
};

// ── Provider items ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    timestamp: Option<Value>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    text: Option<RawText>,
    #[serde(default)]
    image: Option<RawMedia>,
    #[serde(default)]
    document: Option<RawMedia>,
    #[serde(default)]
    audio: Option<RawMedia>,
    #[serde(default)]
    voice: Option<RawMedia>,
    #[serde(default)]
    video: Option<RawMedia>,
    #[serde(default)]
    sticker: Option<RawMedia>,
}

#[derive(Debug, Deserialize)]
struct RawText {
    #[serde(default)]
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMedia {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    caption: Option<String>,
    #[serde(default)]
    filename: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawContact {
    #[serde(default)]
    wa_id: Option<String>,
    #[serde(default)]
    profile: Option<RawProfile>,
}

#[derive(Debug, Deserialize)]
struct RawProfile {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawStatus {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    timestamp: Option<Value>,
    #[serde(default)]
    recipient_id: Option<String>,
    #[serde(default)]
    errors: Option<Vec<StatusErrorDetail>>,
}

// ── Public API ──────────────────────────────────────────────────────

/// Parse a raw request body as JSON.
///
/// This is the only failure the event endpoint reports to the provider;
/// anything that parses is accepted and normalized fail-open.
pub fn parse_body(body: &[u8]) -> Result<Value, PipelineError> {
    serde_json::from_slice(body).map_err(|e| PipelineError::MalformedPayload(e.to_string()))
}

/// Normalize a webhook body into messages and status events.
///
/// The envelope is walked untyped: a malformed `contacts`, `messages` or
/// `statuses` field empties only itself.
pub fn normalize(raw: &Value) -> NormalizedBatch {
    let Some(value) = raw
        .pointer("/entry/0/changes/0/value")
        .filter(|v| v.is_object())
    else {
        debug!("Webhook payload carries no change value");
        return NormalizedBatch::default();
    };

    let contact = items(value, "contacts").first().and_then(read_contact);

    let messages = items(value, "messages")
        .iter()
        .filter_map(|item| read_message(item, contact.as_ref()))
        .collect();

    let statuses = items(value, "statuses")
        .iter()
        .filter_map(read_status)
        .collect();

    NormalizedBatch { messages, statuses }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn items<'a>(value: &'a Value, field: &str) -> &'a [Value] {
    match value.get(field) {
        None | Some(Value::Null) => &[],
        Some(Value::Array(list)) => list,
        Some(other) => {
            warn!(field, kind = json_kind(other), "Ignoring non-array webhook field");
            &[]
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn read_contact(item: &Value) -> Option<ContactInfo> {
    let raw = RawContact::deserialize(item)
        .inspect_err(|e| debug!(error = %e, "Skipping unreadable contact"))
        .ok()?;
    Some(ContactInfo {
        wa_id: raw.wa_id,
        name: raw.profile.and_then(|p| p.name),
    })
}

fn read_message(item: &Value, contact: Option<&ContactInfo>) -> Option<InboundMessage> {
    let raw = match RawMessage::deserialize(item) {
        Ok(raw) => raw,
        Err(e) => {
            debug!(error = %e, "Skipping unreadable message");
            return None;
        }
    };

    let id = non_empty(raw.id)?;
    let Some(from) = non_empty(raw.from) else {
        debug!(message_id = %id, "Skipping message with no sender");
        return None;
    };

    let kind = raw
        .kind
        .as_deref()
        .map(MessageKind::from_provider)
        .unwrap_or(MessageKind::Unsupported);

    let text_body = match kind {
        MessageKind::Text => raw.text.and_then(|t| t.body),
        _ => None,
    };

    let media = match kind {
        MessageKind::Image => raw.image,
        MessageKind::Document => raw.document,
        MessageKind::Audio => raw.audio.or(raw.voice),
        MessageKind::Video => raw.video,
        MessageKind::Sticker => raw.sticker,
        _ => None,
    }
    .and_then(|m| {
        Some(MediaRef {
            id: non_empty(m.id)?,
            mime_type: m.mime_type,
            caption: m.caption,
            filename: m.filename,
        })
    });

    Some(InboundMessage {
        id,
        from,
        timestamp: parse_timestamp(raw.timestamp.as_ref()),
        kind,
        text_body,
        media,
        contact: contact.cloned(),
    })
}

fn read_status(item: &Value) -> Option<StatusEvent> {
    let raw = match RawStatus::deserialize(item) {
        Ok(raw) => raw,
        Err(e) => {
            debug!(error = %e, "Skipping unreadable status");
            return None;
        }
    };

    let id = non_empty(raw.id)?;
    let status_str = raw.status.unwrap_or_default();
    let Some(status) = DeliveryStatus::from_provider(&status_str) else {
        debug!(message_id = %id, status = %status_str, "Skipping unknown delivery status");
        return None;
    };

    Some(StatusEvent {
        id,
        status,
        timestamp: parse_timestamp(raw.timestamp.as_ref()),
        recipient_id: raw.recipient_id.unwrap_or_default(),
        errors: raw.errors.unwrap_or_default(),
    })
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.trim().is_empty())
}

/// Provider timestamps are unix seconds, sent as a string or a number.
/// Anything unreadable falls back to the receive time.
fn parse_timestamp(raw: Option<&Value>) -> DateTime<Utc> {
    let secs = match raw {
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        Some(Value::Number(n)) => n.as_i64(),
        _ => None,
    };
    secs.and_then(|s| DateTime::from_timestamp(s, 0))
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn envelope(value: Value) -> Value {
        json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "id": "102290129340398",
                "changes": [{ "field": "messages", "value": value }]
            }]
        })
    }

    #[test]
    fn text_message_with_contact() {
        let raw = envelope(json!({
            "messaging_product": "whatsapp",
            "contacts": [{ "profile": { "name": "Dana" }, "wa_id": "15551234567" }],
            "messages": [{
                "from": "15551234567",
                "id": "wamid.ABC",
                "timestamp": "1700000000",
                "type": "text",
                "text": { "body": "What's your price?" }
            }]
        }));

        let batch = normalize(&raw);
        assert_eq!(batch.messages.len(), 1);
        assert!(batch.statuses.is_empty());

        let msg = &batch.messages[0];
        assert_eq!(msg.id, "wamid.ABC");
        assert_eq!(msg.from, "15551234567");
        assert_eq!(msg.kind, MessageKind::Text);
        assert_eq!(msg.text_body.as_deref(), Some("What's your price?"));
        assert_eq!(msg.timestamp.timestamp(), 1_700_000_000);
        let contact = msg.contact.as_ref().unwrap();
        assert_eq!(contact.name.as_deref(), Some("Dana"));
        assert_eq!(contact.wa_id.as_deref(), Some("15551234567"));
    }

    #[test]
    fn contact_attached_to_every_message_in_batch() {
        let raw = envelope(json!({
            "contacts": [{ "profile": { "name": "Dana" }, "wa_id": "1555" }],
            "messages": [
                { "from": "1555", "id": "m1", "type": "text", "text": { "body": "a" } },
                { "from": "1555", "id": "m2", "type": "text", "text": { "body": "b" } }
            ]
        }));
        let batch = normalize(&raw);
        assert_eq!(batch.messages.len(), 2);
        assert!(batch.messages.iter().all(|m| m.contact.is_some()));
    }

    #[test]
    fn image_message_carries_media_ref() {
        let raw = envelope(json!({
            "messages": [{
                "from": "1555",
                "id": "m1",
                "timestamp": 1700000000,
                "type": "image",
                "image": { "id": "media-1", "mime_type": "image/jpeg", "caption": "receipt" }
            }]
        }));
        let msg = &normalize(&raw).messages[0];
        assert_eq!(msg.kind, MessageKind::Image);
        assert!(msg.text_body.is_none());
        let media = msg.media.as_ref().unwrap();
        assert_eq!(media.id, "media-1");
        assert_eq!(media.caption.as_deref(), Some("receipt"));
        assert_eq!(msg.timestamp.timestamp(), 1_700_000_000);
    }

    #[test]
    fn statuses_are_normalized() {
        let raw = envelope(json!({
            "statuses": [
                { "id": "m1", "status": "delivered", "timestamp": "1700000100", "recipient_id": "15551234567" },
                {
                    "id": "m2", "status": "failed", "recipient_id": "15551234567",
                    "errors": [{ "code": 131026, "title": "Message undeliverable" }]
                }
            ]
        }));
        let batch = normalize(&raw);
        assert!(batch.messages.is_empty());
        assert_eq!(batch.statuses.len(), 2);
        assert_eq!(batch.statuses[0].status, DeliveryStatus::Delivered);
        assert_eq!(batch.statuses[0].recipient_id, "15551234567");
        assert_eq!(batch.statuses[1].status, DeliveryStatus::Failed);
        assert_eq!(batch.statuses[1].errors[0].code, Some(131026));
    }

    #[test]
    fn malformed_and_partial_payloads_yield_empty() {
        let cases = [
            json!({}),
            json!(null),
            json!([]),
            json!("entry"),
            json!({ "entry": null }),
            json!({ "entry": [] }),
            json!({ "entry": "nope" }),
            json!({ "entry": [{}] }),
            json!({ "entry": [{ "changes": [] }] }),
            json!({ "entry": [{ "changes": [{}] }] }),
            json!({ "entry": [{ "changes": [{ "value": null }] }] }),
            json!({ "entry": [{ "changes": [{ "value": {} }] }] }),
            json!({ "entry": [{ "changes": [{ "value": { "messages": [] } }] }] }),
            json!({ "entry": [{ "changes": [{ "value": { "messages": "x", "statuses": 3 } }] }] }),
        ];
        for raw in cases {
            assert_eq!(normalize(&raw), NormalizedBatch::default(), "payload: {raw}");
        }
    }

    #[test]
    fn unreadable_items_do_not_drop_siblings() {
        let raw = envelope(json!({
            "messages": [
                "garbage",
                { "from": "1555", "type": "text", "text": { "body": "no id" } },
                { "id": "m0", "type": "text", "text": { "body": "no sender" } },
                { "from": "1555", "id": "m1", "type": "text", "text": { "body": "ok" } }
            ],
            "statuses": [
                { "id": "s1", "status": "deleted" },
                { "status": "read" },
                { "id": "s2", "status": "read", "recipient_id": "1555" }
            ]
        }));
        let batch = normalize(&raw);
        assert_eq!(batch.messages.len(), 1);
        assert_eq!(batch.messages[0].id, "m1");
        assert_eq!(batch.statuses.len(), 1);
        assert_eq!(batch.statuses[0].id, "s2");

        // A malformed sibling field empties only itself.
        let raw = envelope(json!({
            "contacts": { "wa_id": "15551234567" },
            "statuses": "none",
            "messages": [{ "from": "15551234567", "id": "m2", "type": "text", "text": { "body": "price?" } }]
        }));
        let batch = normalize(&raw);
        assert_eq!(batch.messages.len(), 1);
        assert_eq!(batch.messages[0].id, "m2");
        assert!(batch.messages[0].contact.is_none());
        assert!(batch.statuses.is_empty());

        let raw = json!({
            "entry": [
                { "changes": [
                    { "value": { "statuses": [{ "id": "s3", "status": "delivered" }] } },
                    "garbage"
                ]},
                42
            ]
        });
        let batch = normalize(&raw);
        assert_eq!(batch.statuses.len(), 1);
        assert_eq!(batch.statuses[0].id, "s3");
    }

    #[test]
    fn only_first_entry_and_change_are_read() {
        let raw = json!({
            "entry": [
                { "changes": [
                    { "value": { "messages": [{ "from": "1", "id": "first", "type": "text", "text": { "body": "a" } }] } },
                    { "value": { "messages": [{ "from": "1", "id": "second-change", "type": "text", "text": { "body": "b" } }] } }
                ]},
                { "changes": [
                    { "value": { "messages": [{ "from": "1", "id": "second-entry", "type": "text", "text": { "body": "c" } }] } }
                ]}
            ]
        });
        let batch = normalize(&raw);
        assert_eq!(batch.messages.len(), 1);
        assert_eq!(batch.messages[0].id, "first");
    }

    #[test]
    fn unknown_message_type_is_kept_as_unsupported() {
        let raw = envelope(json!({
            "messages": [{ "from": "1555", "id": "m1", "type": "order", "order": {} }]
        }));
        let batch = normalize(&raw);
        assert_eq!(batch.messages[0].kind, MessageKind::Unsupported);
        assert!(batch.messages[0].text_body.is_none());
    }

    #[test]
    fn bad_timestamp_falls_back_to_now() {
        let before = Utc::now();
        let raw = envelope(json!({
            "messages": [{ "from": "1555", "id": "m1", "timestamp": "soon", "type": "text", "text": { "body": "x" } }]
        }));
        let ts = normalize(&raw).messages[0].timestamp;
        assert!(ts >= before);
    }

    #[test]
    fn parse_body_rejects_non_json() {
        assert!(matches!(
            parse_body(b"not json"),
            Err(PipelineError::MalformedPayload(_))
        ));
        assert!(parse_body(br#"{"object":"x"}"#).is_ok());
    }
}

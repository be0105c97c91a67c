//! Wire Envelope
//!
//! Every frame exchanged with the feed is a JSON envelope:
//!
//! ```json
//! { "topic": "quotes.1001", "type": "data", "payload": { ... }, "timestamp": "..." }
//! ```
//!
//! Control frames (`subscribe`/`unsubscribe`) carry an empty payload except
//! on the reserved `auth` topic, where the subscribe payload holds the
//! credentials and the data payload holds the handshake verdict.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::topic::Topic;

// =============================================================================
// Envelope
// =============================================================================

/// The message kind carried by an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    /// Client requests delivery for a topic.
    Subscribe,
    /// Client stops delivery for a topic.
    Unsubscribe,
    /// Server pushes a payload for a topic.
    Data,
    /// Server reports a topic-level error.
    Error,
}

/// One frame on the feed connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Topic the frame belongs to.
    pub topic: Topic,
    /// Frame kind.
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    /// Kind-specific body; empty object for plain control frames.
    #[serde(default)]
    pub payload: Value,
    /// Sender-side wall-clock timestamp.
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    /// Build a subscribe control frame.
    #[must_use]
    pub fn subscribe(topic: Topic) -> Self {
        Self {
            topic,
            kind: EnvelopeKind::Subscribe,
            payload: Value::Object(serde_json::Map::new()),
            timestamp: Utc::now(),
        }
    }

    /// Build an unsubscribe control frame.
    #[must_use]
    pub fn unsubscribe(topic: Topic) -> Self {
        Self {
            topic,
            kind: EnvelopeKind::Unsubscribe,
            payload: Value::Object(serde_json::Map::new()),
            timestamp: Utc::now(),
        }
    }

    /// Build a data frame (used by tests and fakes; the server side of the
    /// protocol).
    #[must_use]
    pub fn data(topic: Topic, payload: Value) -> Self {
        Self {
            topic,
            kind: EnvelopeKind::Data,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Build the credential handshake frame sent on the `auth` topic.
    #[must_use]
    pub fn auth_request(api_key: &str, user_key: &str) -> Self {
        Self {
            topic: Topic::auth(),
            kind: EnvelopeKind::Subscribe,
            payload: json!({ "apiKey": api_key, "userKey": user_key }),
            timestamp: Utc::now(),
        }
    }
}

// =============================================================================
// Auth handshake payload
// =============================================================================

/// The server's verdict on the `auth` topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    /// Whether the credentials were accepted.
    pub success: bool,
    /// Rejection reason when `success` is false.
    #[serde(default)]
    pub error: Option<String>,
}

impl AuthResponse {
    /// Decode the verdict from an auth data payload.
    ///
    /// # Errors
    ///
    /// Returns the underlying JSON error when the payload does not have the
    /// handshake shape.
    pub fn from_payload(payload: &Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(payload.clone())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_frame_has_empty_payload() {
        let frame = Envelope::subscribe(Topic::quote(1001));
        assert_eq!(frame.kind, EnvelopeKind::Subscribe);
        assert_eq!(frame.payload, json!({}));

        let encoded = serde_json::to_value(&frame).unwrap();
        assert_eq!(encoded["topic"], "quotes.1001");
        assert_eq!(encoded["type"], "subscribe");
    }

    #[test]
    fn auth_request_carries_credentials() {
        let frame = Envelope::auth_request("key-123", "user-456");
        assert_eq!(frame.topic, Topic::auth());
        assert_eq!(frame.kind, EnvelopeKind::Subscribe);
        assert_eq!(frame.payload["apiKey"], "key-123");
        assert_eq!(frame.payload["userKey"], "user-456");
    }

    #[test]
    fn decodes_data_frame() {
        let raw = r#"{
            "topic": "quotes.1001",
            "type": "data",
            "payload": { "bid": "1.0" },
            "timestamp": "2026-08-24T12:00:00Z"
        }"#;
        let frame: Envelope = serde_json::from_str(raw).unwrap();
        assert_eq!(frame.topic, Topic::quote(1001));
        assert_eq!(frame.kind, EnvelopeKind::Data);
        assert_eq!(frame.payload["bid"], "1.0");
    }

    #[test]
    fn missing_payload_defaults_to_null() {
        let raw = r#"{
            "topic": "auth",
            "type": "error",
            "timestamp": "2026-08-24T12:00:00Z"
        }"#;
        let frame: Envelope = serde_json::from_str(raw).unwrap();
        assert_eq!(frame.kind, EnvelopeKind::Error);
        assert!(frame.payload.is_null());
    }

    #[test]
    fn auth_response_success() {
        let verdict = AuthResponse::from_payload(&json!({ "success": true })).unwrap();
        assert!(verdict.success);
        assert!(verdict.error.is_none());
    }

    #[test]
    fn auth_response_failure_with_reason() {
        let verdict =
            AuthResponse::from_payload(&json!({ "success": false, "error": "bad key" })).unwrap();
        assert!(!verdict.success);
        assert_eq!(verdict.error.as_deref(), Some("bad key"));
    }

    #[test]
    fn auth_response_rejects_malformed_payload() {
        assert!(AuthResponse::from_payload(&json!({ "ok": 1 })).is_err());
    }
}

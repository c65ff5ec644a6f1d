//! The notification message flowing through every queue.

use serde::{Deserialize, Serialize};

/// One notification as carried on the wire.
///
/// The payload is JSON with exactly these four fields; unknown fields are
/// ignored on decode and missing fields default. `retry_count` is a float on
/// the wire for compatibility with the upstream producers, but semantically
/// it is a non-negative attempt counter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Destination address or phone number, opaque to the worker
    #[serde(default)]
    pub recipient: String,

    /// Subject line; empty for SMS
    #[serde(default)]
    pub subject: String,

    /// Payload text; HTML for email, plain text for SMS
    #[serde(default)]
    pub body: String,

    /// Remaining delivery attempts
    #[serde(default)]
    pub retry_count: f64,
}

impl Message {
    /// Whether the retry budget still allows a delivery attempt.
    pub fn has_budget(&self) -> bool {
        self.retry_count > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let message = Message {
            recipient: "a@b.com".to_string(),
            subject: "Hi".to_string(),
            body: "<p>x</p>".to_string(),
            retry_count: 3.0,
        };

        let json = serde_json::to_vec(&message).unwrap();
        let parsed: Message = serde_json::from_slice(&json).unwrap();
        assert_eq!(parsed, message);
    }

    #[test]
    fn test_decode_ignores_unknown_fields() {
        let json = r#"{
            "recipient": "+79990001122",
            "subject": "",
            "body": "code 1234",
            "retry_count": 2,
            "trace_id": "abc-123"
        }"#;

        let message: Message = serde_json::from_str(json).unwrap();
        assert_eq!(message.recipient, "+79990001122");
        assert_eq!(message.retry_count, 2.0);
    }

    #[test]
    fn test_decode_missing_fields_default() {
        let message: Message = serde_json::from_str(r#"{"recipient": "a@b.com"}"#).unwrap();
        assert_eq!(message.recipient, "a@b.com");
        assert_eq!(message.subject, "");
        assert_eq!(message.body, "");
        assert_eq!(message.retry_count, 0.0);
        assert!(!message.has_budget());
    }

    #[test]
    fn test_encode_emits_all_fields() {
        let message = Message::default();
        let json = serde_json::to_string(&message).unwrap();
        assert!(json.contains("\"recipient\""));
        assert!(json.contains("\"subject\""));
        assert!(json.contains("\"body\""));
        assert!(json.contains("\"retry_count\""));
    }
}

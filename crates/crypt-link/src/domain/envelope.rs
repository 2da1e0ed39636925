//! Wire messages exchanged over the WebSocket.

use crate::domain::correlation::MessageId;
use serde::{Deserialize, Serialize};

/// Decoded inbound reply.
///
/// Schema: `{ message_id: string, success: boolean, data?: any, error?: string }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEnvelope {
    pub message_id: MessageId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InboundEnvelope {
    /// Decode a text frame.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Successful reply carrying `data`.
    pub fn ok(message_id: impl Into<MessageId>, data: serde_json::Value) -> Self {
        Self {
            message_id: message_id.into(),
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Failed reply carrying an error description.
    pub fn failure(message_id: impl Into<MessageId>, error: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Outbound request frame.
///
/// Only `message_id` is required by the correlation protocol; `operation` and
/// `data` are forwarded untouched to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub message_id: MessageId,
    pub operation: String,
    pub data: serde_json::Value,
}

impl OutboundMessage {
    pub fn new(
        message_id: MessageId,
        operation: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            message_id,
            operation: operation.into(),
            data,
        }
    }

    /// Encode as a JSON text frame.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_success_envelope() {
        let env =
            InboundEnvelope::decode(r#"{"message_id":"req-2","success":true,"data":{"x":1}}"#)
                .unwrap();
        assert_eq!(env.message_id.as_str(), "req-2");
        assert!(env.success);
        assert_eq!(env.data, Some(json!({"x": 1})));
        assert_eq!(env.error, None);
    }

    #[test]
    fn test_decode_failure_envelope() {
        let env = InboundEnvelope::decode(
            r#"{"message_id":"req-3","success":false,"error":"bad request"}"#,
        )
        .unwrap();
        assert!(!env.success);
        assert_eq!(env.error.as_deref(), Some("bad request"));
        assert_eq!(env.data, None);
    }

    #[test]
    fn test_decode_rejects_missing_fields() {
        assert!(InboundEnvelope::decode(r#"{"success":true}"#).is_err());
        assert!(InboundEnvelope::decode(r#"{"message_id":"a"}"#).is_err());
        assert!(InboundEnvelope::decode("not json").is_err());
    }

    #[test]
    fn test_outbound_embeds_message_id() {
        let msg = OutboundMessage::new(MessageId::new("req-9"), "encrypt", json!("hello"));
        let value: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(value["message_id"], "req-9");
        assert_eq!(value["operation"], "encrypt");
        assert_eq!(value["data"], "hello");
    }
}

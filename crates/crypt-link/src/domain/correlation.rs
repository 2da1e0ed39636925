//! Message identifier used to pair outbound requests with inbound replies.
//!
//! Identifiers are opaque strings on the wire. Callers may supply their own;
//! generated identifiers use UUID v7 so they are unique and time-ordered.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use uuid::Uuid;

/// Correlation identifier carried as `message_id` in both directions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Generate a fresh identifier (UUID v7).
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Wrap a caller-supplied identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as it appears on the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Timestamp embedded in a generated identifier (ms since Unix epoch).
    ///
    /// Returns `None` for caller-supplied identifiers that are not UUID v7.
    pub fn timestamp_ms(&self) -> Option<u64> {
        let uuid = Uuid::parse_str(&self.0).ok()?;
        let bytes = uuid.as_bytes();
        if (bytes[6] >> 4) != 7 {
            return None;
        }
        Some(
            bytes[..6]
                .iter()
                .fold(0u64, |acc, b| (acc << 8) | u64::from(*b)),
        )
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<MessageId> for String {
    fn from(id: MessageId) -> Self {
        id.0
    }
}

impl AsRef<str> for MessageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for MessageId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        let a = MessageId::generate();
        let b = MessageId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let id = MessageId::new("req-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"req-1\"");
        let parsed: MessageId = serde_json::from_str("\"req-1\"").unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_timestamp_only_for_generated_ids() {
        assert!(MessageId::new("req-1").timestamp_ms().is_none());

        let now_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as i64;
        let ts = MessageId::generate().timestamp_ms().unwrap() as i64;
        assert!((ts - now_ms).abs() < 1000);
    }
}

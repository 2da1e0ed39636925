//! Error types for the correlation layer.
//!
//! Every failure reaches the caller as an `Err`. Transport failures inside the
//! connection driver are logged there and only become visible to callers
//! through the timeout of their pending requests.

use crate::domain::correlation::MessageId;
use thiserror::Error;

/// Errors returned by the correlation client and connection manager.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No open connection to send on.
    #[error("Not connected")]
    NotConnected,

    /// The readiness barrier gave up waiting for the connection to open.
    #[error("Connection timed out after {timeout_ms}ms")]
    ConnectionTimeout { timeout_ms: u64 },

    /// No correlated reply arrived before the request deadline.
    #[error("Request {message_id} timed out after {timeout_ms}ms")]
    Timeout { message_id: MessageId, timeout_ms: u64 },

    /// The reply envelope marked the request as failed. Carries the remote
    /// error description verbatim.
    #[error("{0}")]
    Remote(String),

    /// The identifier already has a pending request.
    #[error("Message id already pending: {0}")]
    DuplicateMessageId(MessageId),

    /// Transport-level failure while sending.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The outbound message could not be serialized.
    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    /// The pending request was dropped without a terminal transition.
    #[error("Pending request abandoned")]
    Abandoned,
}

impl ClientError {
    /// Whether the error came from a deadline (request or readiness).
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::ConnectionTimeout { .. })
    }
}

/// Transport-level errors produced by [`crate::ports::Connector`] implementations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Establishing the connection failed.
    #[error("Connect failed: {0}")]
    Connect(String),

    /// The connection is closed.
    #[error("Connection closed")]
    Closed,

    /// Read or write failure on an open connection.
    #[error("I/O error: {0}")]
    Io(String),
}

/// Configuration validation and loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid URL for {field}: {reason}")]
    InvalidUrl { field: &'static str, reason: String },

    #[error("Invalid timeout: {0}")]
    InvalidTimeout(String),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for correlation client operations.
pub type ClientResult<T> = Result<T, ClientError>;

//! Domain types for the correlation layer.
//!
//! Identifiers, wire envelopes, the correlation table, configuration and
//! errors. Nothing here touches a socket.

pub mod config;
pub mod correlation;
pub mod envelope;
pub mod error;
pub mod pending;

pub use config::{ClientConfig, ConnectionConfig};
pub use correlation::MessageId;
pub use envelope::{InboundEnvelope, OutboundMessage};
pub use error::{ClientError, ClientResult, ConfigError, TransportError};
pub use pending::{CorrelationTable, PendingStats};

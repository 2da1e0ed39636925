#![allow(missing_docs)]

//! crypt-link - request/response correlation over a persistent WebSocket,
//! plus the session key exchange used for encrypted payloads.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      CorrelatedClient                         │
//! │   ensure_connection() ─► request() / send_and_await()         │
//! ├───────────────────────────┬──────────────────────────────────┤
//! │    ConnectionManager      │        CorrelationTable          │
//! │  state watch, driver task │  message_id ─► oneshot + timer   │
//! │  flat reconnect delay     │  remove() arbitrates completion  │
//! ├───────────────────────────┴──────────────────────────────────┤
//! │           Connector port (WebSocket / in-memory)             │
//! └──────────────────────────────────────────────────────────────┘
//!
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Session: AuthClient login ─► token + verified public key     │
//! │          SessionStore (file / memory) with expiry            │
//! │ CryptClient: encrypt / decrypt jobs, results over WebSocket  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use crypt_link::{ClientConfig, CorrelatedClient};
//!
//! let config = ClientConfig::default();
//! let client = CorrelatedClient::websocket(config.connection.clone());
//! let reply = client.request("encrypt", serde_json::json!("hi")).await?;
//! ```
//!
//! Replies are matched by `message_id`. A request that gets no reply fails
//! with [`ClientError::Timeout`]; requests in flight when the connection drops
//! are not replayed.

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod adapters;
pub mod client;
pub mod connection;
pub mod crypt;
pub mod domain;
pub mod ports;
pub mod session;
pub mod telemetry;

pub use adapters::{FileSessionStore, MemorySessionStore, WebSocketConnector};
pub use client::CorrelatedClient;
pub use connection::{ConnectionManager, ConnectionState, ConnectionStats};
pub use crypt::{Accepted, CryptClient, CryptError, EncryptedData};
pub use domain::config::{
    AuthConfig, ClientConfig, ConnectionConfig, CryptConfig, SessionConfig, TelemetryConfig,
};
pub use domain::{
    ClientError, ClientResult, ConfigError, CorrelationTable, InboundEnvelope, MessageId,
    OutboundMessage, PendingStats, TransportError,
};
pub use ports::{Connector, Frame, SessionStore, StoreError};
pub use session::{AuthClient, PublicKeyHandle, Session, SessionError};
pub use telemetry::{init_tracing, TelemetryError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

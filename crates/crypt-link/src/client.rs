//! Correlated client: readiness barrier plus request/await over the managed
//! connection.
//!
//! ```ignore
//! use crypt_link::{CorrelatedClient, ConnectionConfig};
//! use serde_json::json;
//!
//! let client = CorrelatedClient::websocket(ConnectionConfig::default());
//! client.ensure_connection().await?;
//! let reply = client.request("encrypt", json!("hello")).await?;
//! ```

use crate::adapters::websocket::WebSocketConnector;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::domain::config::ConnectionConfig;
use crate::domain::correlation::MessageId;
use crate::domain::envelope::OutboundMessage;
use crate::domain::error::{ClientError, ClientResult};
use crate::domain::pending::{CompletionReceiver, CorrelationTable};
use crate::ports::transport::Connector;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Request/response client over one managed connection.
pub struct CorrelatedClient {
    manager: ConnectionManager,
    table: Arc<CorrelationTable>,
    config: ConnectionConfig,
}

impl CorrelatedClient {
    /// Create a client using `connector` for transport sessions.
    pub fn new(config: ConnectionConfig, connector: Arc<dyn Connector>) -> Self {
        let table = CorrelationTable::new();
        let manager = ConnectionManager::new(&config, connector, table.clone());
        Self {
            manager,
            table,
            config,
        }
    }

    /// Create a client over WebSocket.
    pub fn websocket(config: ConnectionConfig) -> Self {
        Self::new(config, Arc::new(WebSocketConnector::new()))
    }

    /// Start connecting (no-op if already open or connecting).
    pub fn connect(&self) {
        self.manager.connect();
    }

    /// Close without reconnecting. Pending requests run out their timers.
    pub fn disconnect(&self) {
        self.manager.disconnect();
    }

    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn table(&self) -> &Arc<CorrelationTable> {
        &self.table
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Readiness barrier.
    ///
    /// Returns at once when the connection is open, without calling
    /// `connect()`. Otherwise starts connecting and waits for the open
    /// notification, failing with [`ClientError::ConnectionTimeout`] after the
    /// readiness timeout.
    pub async fn ensure_connection(&self) -> ClientResult<()> {
        if self.manager.state().is_open() {
            return Ok(());
        }

        let mut state_rx = self.manager.subscribe();
        self.manager.connect();

        let timeout = self.config.readiness_timeout();
        let outcome = tokio::time::timeout(timeout, state_rx.wait_for(ConnectionState::is_open))
            .await
            .map(|opened| opened.map(|_| ()));
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ClientError::NotConnected),
            Err(_) => Err(ClientError::ConnectionTimeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Await the reply correlated with `message_id`, using the default
    /// request timeout.
    ///
    /// The message carrying `message_id` is expected to be on its way already;
    /// use [`request`](Self::request) to register before sending.
    pub async fn send_and_await(
        &self,
        message_id: impl Into<MessageId>,
    ) -> ClientResult<serde_json::Value> {
        self.send_and_await_with_timeout(message_id, self.config.request_timeout())
            .await
    }

    /// Await the reply correlated with `message_id` for at most `timeout`.
    pub async fn send_and_await_with_timeout(
        &self,
        message_id: impl Into<MessageId>,
        timeout: Duration,
    ) -> ClientResult<serde_json::Value> {
        let rx = self.table.register(message_id.into(), timeout)?;
        complete(rx).await
    }

    /// Send a raw message on the open connection.
    pub async fn send<T: Serialize + ?Sized>(&self, message: &T) -> ClientResult<()> {
        self.manager.send(message).await
    }

    /// Readiness barrier, fresh id, register, send, await.
    pub async fn request(
        &self,
        operation: &str,
        data: serde_json::Value,
    ) -> ClientResult<serde_json::Value> {
        self.request_with_timeout(operation, data, self.config.request_timeout())
            .await
    }

    /// [`request`](Self::request) with an explicit timeout.
    pub async fn request_with_timeout(
        &self,
        operation: &str,
        data: serde_json::Value,
        timeout: Duration,
    ) -> ClientResult<serde_json::Value> {
        self.ensure_connection().await?;

        let message_id = MessageId::generate();
        let rx = self.table.register(message_id.clone(), timeout)?;
        let message = OutboundMessage::new(message_id.clone(), operation, data);

        if let Err(e) = self.manager.send(&message).await {
            self.table.cancel(message_id.as_str());
            return Err(e);
        }
        debug!(message_id = %message_id, operation = operation, "Request sent");

        complete(rx).await
    }
}

async fn complete(rx: CompletionReceiver) -> ClientResult<serde_json::Value> {
    rx.await.unwrap_or(Err(ClientError::Abandoned))
}

//! Client for the encrypt/decrypt service.
//!
//! Both endpoints take JSON and require the session's bearer token. The
//! service does not answer with the result: it replies `202 Accepted` with a
//! job `message_id` and later pushes the result over the WebSocket as an
//! envelope carrying that id. [`CryptClient::encrypt_and_await`] and
//! [`CryptClient::decrypt_and_await`] run the whole exchange.
//!
//! The server seals payloads with a fresh AES-256-GCM key wrapped in RSA,
//! which is what [`EncryptedData`] carries.

use crate::client::CorrelatedClient;
use crate::domain::config::CryptConfig;
use crate::domain::correlation::MessageId;
use crate::domain::error::ClientError;
use crate::session::Session;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from the encrypt/decrypt service.
#[derive(Debug, Error)]
pub enum CryptError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("{message} (status {status})")]
    Rejected { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Job acknowledgement returned by `/encrypt` and `/decrypt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accepted {
    /// Id the result envelope will carry
    pub message_id: MessageId,
    /// Job status, `"processing"` on acceptance
    pub status: String,
}

/// Sealed payload as produced by `/encrypt` and accepted by `/decrypt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedData {
    /// Base64 RSA-wrapped AES key
    pub encrypted_key: String,
    /// Base64 GCM nonce
    pub nonce: String,
    /// Base64 ciphertext
    pub data: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// HTTP client for `{url}/encrypt` and `{url}/decrypt`.
#[derive(Debug, Clone)]
pub struct CryptClient {
    client: Client,
    base_url: String,
}

impl CryptClient {
    pub fn new(config: &CryptConfig) -> Result<Self, CryptError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.http_timeout_ms))
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Submit `message` for encryption. The result arrives over the
    /// WebSocket under the returned id.
    pub async fn encrypt(&self, token: &str, message: &str) -> Result<Accepted, CryptError> {
        self.post(token, "encrypt", &message, "Encryption failed").await
    }

    /// Submit a sealed payload for decryption.
    pub async fn decrypt(
        &self,
        token: &str,
        encrypted: &EncryptedData,
    ) -> Result<Accepted, CryptError> {
        self.post(token, "decrypt", encrypted, "Decryption failed").await
    }

    /// Encrypt and wait for the result on `link`.
    ///
    /// The connection is made ready before the job is submitted, so a result
    /// pushed right after acceptance has a socket to land on.
    pub async fn encrypt_and_await(
        &self,
        link: &CorrelatedClient,
        token: &str,
        message: &str,
    ) -> Result<serde_json::Value, CryptError> {
        link.ensure_connection().await?;
        let accepted = self.encrypt(token, message).await?;
        await_result(link, accepted).await
    }

    /// Decrypt and wait for the result on `link`.
    pub async fn decrypt_and_await(
        &self,
        link: &CorrelatedClient,
        token: &str,
        encrypted: &EncryptedData,
    ) -> Result<serde_json::Value, CryptError> {
        link.ensure_connection().await?;
        let accepted = self.decrypt(token, encrypted).await?;
        await_result(link, accepted).await
    }

    /// [`encrypt_and_await`](Self::encrypt_and_await) with the session's token.
    pub async fn encrypt_for(
        &self,
        link: &CorrelatedClient,
        session: &Session,
        message: &str,
    ) -> Result<serde_json::Value, CryptError> {
        let token = session.token().ok_or(CryptError::NotAuthenticated)?;
        self.encrypt_and_await(link, token, message).await
    }

    /// [`decrypt_and_await`](Self::decrypt_and_await) with the session's token.
    pub async fn decrypt_for(
        &self,
        link: &CorrelatedClient,
        session: &Session,
        encrypted: &EncryptedData,
    ) -> Result<serde_json::Value, CryptError> {
        let token = session.token().ok_or(CryptError::NotAuthenticated)?;
        self.decrypt_and_await(link, token, encrypted).await
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        token: &str,
        endpoint: &str,
        body: &B,
        fallback: &str,
    ) -> Result<Accepted, CryptError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        debug!(url = %url, "Calling crypt service");

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let err = rejection(status, &text, fallback);
            warn!(url = %url, error = %err, "Crypt service rejected request");
            return Err(err);
        }

        let accepted: Accepted =
            serde_json::from_str(&text).map_err(|e| CryptError::Parse(e.to_string()))?;
        debug!(message_id = %accepted.message_id, status = %accepted.status, "Job accepted");
        Ok(accepted)
    }
}

async fn await_result(
    link: &CorrelatedClient,
    accepted: Accepted,
) -> Result<serde_json::Value, CryptError> {
    Ok(link.send_and_await(accepted.message_id).await?)
}

fn rejection(status: StatusCode, body: &str, fallback: &str) -> CryptError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .unwrap_or_else(|| fallback.to_string());
    CryptError::Rejected {
        status: status.as_u16(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{ConnectBehavior, MemoryConnector};
    use crate::domain::config::ConnectionConfig;

    #[test]
    fn test_rejection_surfaces_server_error() {
        let err = rejection(
            StatusCode::BAD_REQUEST,
            r#"{"error":"invalid nonce"}"#,
            "Decryption failed",
        );
        assert!(matches!(
            err,
            CryptError::Rejected { status: 400, ref message } if message == "invalid nonce"
        ));
    }

    #[test]
    fn test_rejection_falls_back() {
        let err = rejection(StatusCode::INTERNAL_SERVER_ERROR, "oops", "Decryption failed");
        assert_eq!(err.to_string(), "Decryption failed (status 500)");
    }

    #[test]
    fn test_encrypted_data_wire_format() {
        let data: EncryptedData =
            serde_json::from_str(r#"{"encrypted_key":"k","nonce":"n","data":"d"}"#).unwrap();
        assert_eq!(data.encrypted_key, "k");
        assert_eq!(
            serde_json::to_value(&data).unwrap(),
            serde_json::json!({"encrypted_key":"k","nonce":"n","data":"d"})
        );
    }

    #[test]
    fn test_accepted_wire_format() {
        let accepted: Accepted =
            serde_json::from_str(r#"{"message_id":"job-1","status":"processing"}"#).unwrap();
        assert_eq!(accepted.message_id.as_str(), "job-1");
        assert_eq!(accepted.status, "processing");
    }

    #[tokio::test]
    async fn test_requires_token() {
        let (connector, _listener) = MemoryConnector::new();
        let link = CorrelatedClient::new(ConnectionConfig::default(), connector.clone());
        let client = CryptClient::new(&CryptConfig::default()).unwrap();
        let session = Session::in_memory(chrono::Duration::days(1));
        assert!(matches!(
            client.encrypt_for(&link, &session, "x").await,
            Err(CryptError::NotAuthenticated)
        ));
        assert_eq!(connector.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unready_link_fails_before_submitting() {
        let (connector, _listener) = MemoryConnector::new();
        connector.set_default_behavior(ConnectBehavior::Refuse);
        let link = CorrelatedClient::new(ConnectionConfig::default(), connector);
        let client = CryptClient::new(&CryptConfig {
            url: "http://127.0.0.1:1/api/crypt".into(),
            http_timeout_ms: 1000,
        })
        .unwrap();

        let err = client.encrypt_and_await(&link, "tok", "x").await.unwrap_err();
        assert!(matches!(
            err,
            CryptError::Client(ClientError::ConnectionTimeout { .. })
        ));
    }

    #[tokio::test]
    async fn test_unreachable_service() {
        let client = CryptClient::new(&CryptConfig {
            url: "http://127.0.0.1:1/api/crypt/".into(),
            http_timeout_ms: 1000,
        })
        .unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:1/api/crypt");
        assert!(matches!(
            client.encrypt("tok", "x").await,
            Err(CryptError::Http(_))
        ));
    }
}

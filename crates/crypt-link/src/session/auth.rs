//! Login service client.

use super::SessionError;
use crate::domain::config::AuthConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct LoginBody {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    public_key: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Credentials returned by a successful login. The key is still URL-encoded
/// and unverified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginResponse {
    pub token: String,
    pub public_key: String,
}

/// HTTP client for `POST {url}/auth/login`.
#[derive(Debug, Clone)]
pub struct AuthClient {
    client: Client,
    login_url: String,
}

impl AuthClient {
    pub fn new(config: &AuthConfig) -> Result<Self, SessionError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.http_timeout_ms))
            .build()?;

        Ok(Self {
            client,
            login_url: format!("{}/auth/login", config.url.trim_end_matches('/')),
        })
    }

    pub fn login_url(&self) -> &str {
        &self.login_url
    }

    /// Exchange credentials for a bearer token and the server's public key.
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, SessionError> {
        debug!(url = %self.login_url, username = username, "Logging in");

        let response = self
            .client
            .post(&self.login_url)
            .json(&LoginRequest { username, password })
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        let body: Option<LoginBody> = serde_json::from_str(&text).ok();

        parse_login(status.is_success(), body).inspect(|_| {
            info!(username = username, "Login succeeded");
        })
    }
}

fn parse_login(ok: bool, body: Option<LoginBody>) -> Result<LoginResponse, SessionError> {
    if !ok {
        let message = body
            .and_then(|b| b.error)
            .unwrap_or_else(|| "Login failed".to_string());
        return Err(SessionError::LoginRejected(message));
    }

    let body = body.ok_or(SessionError::InvalidResponse)?;
    match (body.token, body.public_key) {
        (Some(token), Some(public_key)) if !token.is_empty() && !public_key.is_empty() => {
            Ok(LoginResponse { token, public_key })
        }
        _ => Err(SessionError::InvalidResponse),
    }
}

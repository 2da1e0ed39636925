//! Client configuration with validation.
//!
//! Every section is `#[serde(default)]`, so a TOML file only needs the keys it
//! overrides.

use crate::domain::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Default WebSocket endpoint
pub const DEFAULT_WS_URL: &str = "ws://localhost:8083/ws";

/// Default login service
pub const DEFAULT_AUTH_URL: &str = "http://localhost:8082";

/// Default encrypt/decrypt gateway path
pub const DEFAULT_CRYPT_URL: &str = "http://localhost/api/crypt";

/// Main client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket connection and correlation timing
    pub connection: ConnectionConfig,
    /// Login service
    pub auth: AuthConfig,
    /// Encrypt/decrypt service
    pub crypt: CryptConfig,
    /// Persisted session state
    pub session: SessionConfig,
    /// Logging
    pub telemetry: TelemetryConfig,
}

impl ClientConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_url("connection.url", &self.connection.url, &["ws", "wss"])?;
        check_url("auth.url", &self.auth.url, &["http", "https"])?;
        check_url("crypt.url", &self.crypt.url, &["http", "https"])?;

        let timeouts = [
            ("connection.request_timeout_ms", self.connection.request_timeout_ms),
            ("connection.readiness_timeout_ms", self.connection.readiness_timeout_ms),
            ("connection.connect_timeout_ms", self.connection.connect_timeout_ms),
            ("connection.reconnect_delay_ms", self.connection.reconnect_delay_ms),
            ("auth.http_timeout_ms", self.auth.http_timeout_ms),
            ("crypt.http_timeout_ms", self.crypt.http_timeout_ms),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(ConfigError::InvalidTimeout(format!("{name} cannot be 0")));
            }
        }

        if self.session.ttl_secs == 0 {
            return Err(ConfigError::InvalidTimeout(
                "session.ttl_secs cannot be 0".into(),
            ));
        }

        Ok(())
    }
}

fn check_url(field: &'static str, value: &str, schemes: &[&str]) -> Result<(), ConfigError> {
    let url = Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
        field,
        reason: e.to_string(),
    })?;
    if !schemes.contains(&url.scheme()) {
        return Err(ConfigError::InvalidUrl {
            field,
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    Ok(())
}

/// WebSocket connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Endpoint URL
    pub url: String,
    /// Default per-request timeout (default: 30000)
    pub request_timeout_ms: u64,
    /// Readiness barrier timeout (default: 5000)
    pub readiness_timeout_ms: u64,
    /// Deadline for a single connect attempt before it counts as failed
    /// (default: 10000)
    pub connect_timeout_ms: u64,
    /// Flat delay before a reconnect attempt (default: 1000)
    pub reconnect_delay_ms: u64,
    /// Outbound frame buffer per connection
    pub outbound_buffer: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_WS_URL.to_string(),
            request_timeout_ms: 30_000,
            readiness_timeout_ms: 5_000,
            connect_timeout_ms: 10_000,
            reconnect_delay_ms: 1_000,
            outbound_buffer: 256,
        }
    }
}

impl ConnectionConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_millis(self.readiness_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Login service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Base URL; login is `POST {url}/auth/login`
    pub url: String,
    pub http_timeout_ms: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_AUTH_URL.to_string(),
            http_timeout_ms: 10_000,
        }
    }
}

/// Encrypt/decrypt service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptConfig {
    /// Base URL; endpoints are `{url}/encrypt` and `{url}/decrypt`
    pub url: String,
    pub http_timeout_ms: u64,
}

impl Default for CryptConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_CRYPT_URL.to_string(),
            http_timeout_ms: 10_000,
        }
    }
}

/// Session persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Session file; `None` keeps the session in memory only
    pub path: Option<PathBuf>,
    /// Lifetime of persisted token and key (default: 1 day)
    pub ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            path: default_session_path(),
            ttl_secs: 24 * 60 * 60,
        }
    }
}

/// Default session file under the user's config directory.
pub fn default_session_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("crypt-link").join("session.json"))
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub log_level: String,
    /// Emit JSON lines instead of pretty output
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.connection.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.connection.readiness_timeout(), Duration::from_secs(5));
        assert_eq!(config.connection.reconnect_delay(), Duration::from_secs(1));
        assert_eq!(config.connection.connect_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = ClientConfig::from_toml_str(
            r#"
            [connection]
            url = "wss://example.com/ws"
            request_timeout_ms = 1500
            "#,
        )
        .unwrap();
        assert_eq!(config.connection.url, "wss://example.com/ws");
        assert_eq!(config.connection.request_timeout_ms, 1500);
        assert_eq!(config.connection.reconnect_delay_ms, 1000);
        assert_eq!(config.crypt.url, DEFAULT_CRYPT_URL);
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let mut config = ClientConfig::default();
        config.connection.readiness_timeout_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidTimeout(_))));

        let mut config = ClientConfig::default();
        config.connection.connect_timeout_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidTimeout(_))));
    }

    #[test]
    fn test_rejects_wrong_scheme() {
        let mut config = ClientConfig::default();
        config.connection.url = "http://localhost:8083/ws".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUrl { field: "connection.url", .. })
        ));

        let mut config = ClientConfig::default();
        config.auth.url = "not a url".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUrl { field: "auth.url", .. })
        ));
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            ClientConfig::from_toml_str("connection = 5"),
            Err(ConfigError::Parse(_))
        ));
    }
}

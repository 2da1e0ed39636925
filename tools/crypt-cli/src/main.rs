//! crypt-cli: command-line client for crypt-link.
//!
//! ## Usage
//!
//! ```bash
//! # Log in and persist the session
//! crypt-cli login alice --password secret
//!
//! # Server-side encrypt/decrypt with the stored token; the service accepts
//! # the job over HTTP and the result arrives on the WebSocket
//! crypt-cli encrypt "hello"
//! crypt-cli decrypt '{"encrypted_key":"...","nonce":"...","data":"..."}'
//!
//! # Encrypt locally with the verified public key
//! crypt-cli local-encrypt "hello"
//!
//! # Correlated request over the WebSocket
//! crypt-cli request encrypt '"hello"'
//! ```

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crypt_link::ClientConfig;

/// crypt-link command-line client
#[derive(Parser, Debug)]
#[command(name = "crypt-cli")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// WebSocket endpoint URL
    #[arg(long, global = true)]
    ws_url: Option<String>,

    /// Login service base URL
    #[arg(long, global = true)]
    auth_url: Option<String>,

    /// Encrypt/decrypt service base URL
    #[arg(long, global = true)]
    crypt_url: Option<String>,

    /// Session file
    #[arg(long, global = true)]
    session_file: Option<PathBuf>,

    /// Request timeout in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Log as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in and store the token and public key
    Login {
        username: String,
        #[arg(long, env = "CRYPT_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Forget the stored session
    Logout,
    /// Show the stored session
    Status,
    /// Encrypt text with the encrypt service and wait for the result
    Encrypt { text: String },
    /// Decrypt an EncryptedData JSON document and wait for the result
    Decrypt { json: String },
    /// Encrypt text locally with the stored public key
    LocalEncrypt { text: String },
    /// Send a correlated request over the WebSocket
    Request {
        operation: String,
        /// JSON payload
        #[arg(default_value = "null")]
        data: String,
    },
}

impl Args {
    /// Configuration file (or defaults) with command-line overrides applied.
    fn resolve_config(&self) -> Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::from_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => ClientConfig::default(),
        };

        if let Some(url) = &self.ws_url {
            config.connection.url = url.clone();
        }
        if let Some(url) = &self.auth_url {
            config.auth.url = url.clone();
        }
        if let Some(url) = &self.crypt_url {
            config.crypt.url = url.clone();
        }
        if let Some(path) = &self.session_file {
            config.session.path = Some(path.clone());
        }
        if let Some(ms) = self.timeout_ms {
            config.connection.request_timeout_ms = ms;
        }
        if self.json_logs {
            config.telemetry.json_logs = true;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.resolve_config()?;

    crypt_link::init_tracing(&config.telemetry).context("Failed to initialize logging")?;

    commands::run(args.command, &config).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_apply() {
        let args = Args::parse_from([
            "crypt-cli",
            "--ws-url",
            "ws://example.test:9000/ws",
            "--timeout-ms",
            "1500",
            "status",
        ]);
        let config = args.resolve_config().unwrap();
        assert_eq!(config.connection.url, "ws://example.test:9000/ws");
        assert_eq!(config.connection.request_timeout_ms, 1500);
        assert!(matches!(args.command, Command::Status));
    }

    #[test]
    fn test_invalid_override_rejected() {
        let args = Args::parse_from(["crypt-cli", "--auth-url", "ftp://nope", "status"]);
        assert!(args.resolve_config().is_err());
    }

    #[test]
    fn test_config_file_then_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.toml");
        std::fs::write(
            &path,
            "[crypt]\nurl = \"http://gateway.test/api/crypt\"\n[connection]\nreconnect_delay_ms = 250\n",
        )
        .unwrap();

        let args = Args::parse_from([
            "crypt-cli",
            "request",
            "ping",
            "--config",
            path.to_str().unwrap(),
            "--crypt-url",
            "http://override.test/api/crypt",
        ]);
        let config = args.resolve_config().unwrap();
        assert_eq!(config.crypt.url, "http://override.test/api/crypt");
        assert_eq!(config.connection.reconnect_delay_ms, 250);
        match args.command {
            Command::Request { operation, data } => {
                assert_eq!(operation, "ping");
                assert_eq!(data, "null");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_encrypt_without_login_fails_before_connecting() {
        let dir = tempfile::tempdir().unwrap();
        let session = dir.path().join("session.json");
        let args = Args::parse_from([
            "crypt-cli",
            "--session-file",
            session.to_str().unwrap(),
            "--ws-url",
            "ws://127.0.0.1:1/ws",
            "encrypt",
            "hello",
        ]);
        let config = args.resolve_config().unwrap();

        let err = commands::run(args.command, &config).await.unwrap_err();
        assert!(format!("{err:#}").contains("Not authenticated"));
    }
}

//! Subcommand handlers.

use anyhow::{Context, Result};
use crypt_link::{
    AuthClient, ClientConfig, CorrelatedClient, CryptClient, EncryptedData, Session,
};
use serde_json::Value;
use tracing::info;

use crate::Command;

pub async fn run(command: Command, config: &ClientConfig) -> Result<()> {
    match command {
        Command::Login { username, password } => login(config, &username, &password).await,
        Command::Logout => {
            open_session(config)?.logout().context("Failed to clear session")?;
            println!("Logged out");
            Ok(())
        }
        Command::Status => status(config),
        Command::Encrypt { text } => {
            let session = open_session(config)?;
            let crypt = CryptClient::new(&config.crypt)?;
            let link = CorrelatedClient::websocket(config.connection.clone());
            let result = crypt.encrypt_for(&link, &session, &text).await;
            link.disconnect();
            print_json(&result.context("Encryption failed")?)
        }
        Command::Decrypt { json } => {
            let session = open_session(config)?;
            let sealed: EncryptedData =
                serde_json::from_str(&json).context("Expected {encrypted_key, nonce, data}")?;
            let crypt = CryptClient::new(&config.crypt)?;
            let link = CorrelatedClient::websocket(config.connection.clone());
            let result = crypt.decrypt_for(&link, &session, &sealed).await;
            link.disconnect();
            print_json(&result.context("Decryption failed")?)
        }
        Command::LocalEncrypt { text } => {
            let ciphertext = open_session(config)?
                .encrypt_with_public_key(&text)
                .context("Local encryption failed")?;
            println!("{ciphertext}");
            Ok(())
        }
        Command::Request { operation, data } => request(config, &operation, &data).await,
    }
}

fn open_session(config: &ClientConfig) -> Result<Session> {
    Session::from_config(&config.session).context("Failed to open session store")
}

async fn login(config: &ClientConfig, username: &str, password: &str) -> Result<()> {
    let auth = AuthClient::new(&config.auth)?;
    let mut session = open_session(config)?;
    session
        .login(&auth, username, password)
        .await
        .context("Login failed")?;

    let bits = session.public_key().map(|k| k.bits()).unwrap_or_default();
    println!("Logged in as {username} (public key: {bits} bits)");
    Ok(())
}

fn status(config: &ClientConfig) -> Result<()> {
    let session = open_session(config)?;
    let store = config
        .session
        .path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "memory".to_string());

    println!("session store:  {store}");
    println!("authenticated:  {}", session.is_authenticated());
    match session.public_key() {
        Some(key) => println!("public key:     {} bits", key.bits()),
        None => println!("public key:     none"),
    }
    println!("websocket:      {}", config.connection.url);
    println!("auth service:   {}", config.auth.url);
    println!("crypt service:  {}", config.crypt.url);
    Ok(())
}

async fn request(config: &ClientConfig, operation: &str, data: &str) -> Result<()> {
    let payload: Value = serde_json::from_str(data).context("Payload must be JSON")?;

    let client = CorrelatedClient::websocket(config.connection.clone());
    client
        .ensure_connection()
        .await
        .with_context(|| format!("Cannot reach {}", config.connection.url))?;
    info!(operation = operation, "Sending request");

    let result = client.request(operation, payload).await;
    client.disconnect();

    print_json(&result.context("Request failed")?)
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

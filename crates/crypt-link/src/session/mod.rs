//! Session security handshake.
//!
//! Login yields a bearer token plus the server's RSA public key. The key is
//! percent-decoded, parsed and must encrypt a test value before it replaces
//! the current one. Token and key are persisted through a [`SessionStore`]
//! with a per-entry expiry.

pub mod auth;
pub mod public_key;

pub use auth::{AuthClient, LoginResponse};
pub use public_key::PublicKeyHandle;

use crate::adapters::store::{FileSessionStore, MemorySessionStore};
use crate::domain::config::SessionConfig;
use crate::ports::store::{PersistedSession, SessionStore, StoreError, StoredValue};
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Longest accepted session lifetime (ten years).
const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Session and key-exchange errors.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Login rejected: {0}")]
    LoginRejected(String),

    #[error("Invalid server response")]
    InvalidResponse,

    #[error("Invalid public key format: {0}")]
    InvalidPublicKey(String),

    #[error("Encryption test failed: {0}")]
    KeyTestFailed(String),

    #[error("Public key not set")]
    NoPublicKey,

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("RSA encryption failed: {0}")]
    Encryption(String),
}

/// Bearer token and verified public key, backed by a store.
pub struct Session {
    store: Box<dyn SessionStore>,
    ttl: chrono::Duration,
    persisted: PersistedSession,
    token: Option<String>,
    public_key: Option<PublicKeyHandle>,
}

impl Session {
    /// Restore from `store`. Expired entries are ignored; a persisted key is
    /// verified again and dropped if it no longer passes.
    pub fn open(store: Box<dyn SessionStore>, ttl: chrono::Duration) -> Result<Self, SessionError> {
        let persisted = match store.load() {
            Ok(persisted) => persisted,
            Err(StoreError::Serde(e)) => {
                warn!(error = %e, "Discarding unreadable session");
                PersistedSession::default()
            }
            Err(e) => return Err(e.into()),
        };

        let now = Utc::now();
        let token = persisted.live_token(now).map(str::to_string);
        let public_key = persisted.live_public_key(now).and_then(|pem| {
            PublicKeyHandle::from_pem(pem)
                .inspect_err(|e| warn!(error = %e, "Discarding persisted public key"))
                .ok()
        });

        let kept = PersistedSession {
            token: persisted.token.clone().filter(|_| token.is_some()),
            public_key: persisted.public_key.clone().filter(|_| public_key.is_some()),
        };
        let session = Self {
            store,
            ttl,
            persisted: kept,
            token,
            public_key,
        };
        if session.persisted != persisted {
            session.persist()?;
        }

        debug!(
            authenticated = session.is_authenticated(),
            has_key = session.public_key.is_some(),
            "Session restored"
        );
        Ok(session)
    }

    /// Session kept in memory only.
    pub fn in_memory(ttl: chrono::Duration) -> Self {
        Self {
            store: Box::new(MemorySessionStore::new()),
            ttl,
            persisted: PersistedSession::default(),
            token: None,
            public_key: None,
        }
    }

    /// File-backed session if a path is configured, in-memory otherwise.
    pub fn from_config(config: &SessionConfig) -> Result<Self, SessionError> {
        let ttl = chrono::Duration::seconds(config.ttl_secs.min(MAX_TTL_SECS) as i64);
        match &config.path {
            Some(path) => Self::open(Box::new(FileSessionStore::new(path)), ttl),
            None => Ok(Self::in_memory(ttl)),
        }
    }

    /// Log in and install the returned credentials.
    ///
    /// The key is verified before anything is committed: a login whose key
    /// fails leaves the previous token and key in place.
    pub async fn login(
        &mut self,
        auth: &AuthClient,
        username: &str,
        password: &str,
    ) -> Result<(), SessionError> {
        let response = auth.login(username, password).await?;
        let key = PublicKeyHandle::install(&response.public_key)?;

        let next = PersistedSession {
            token: Some(StoredValue::new(&response.token, self.ttl)),
            public_key: Some(StoredValue::new(key.pem(), self.ttl)),
        };
        self.commit(next)?;
        self.token = Some(response.token);
        self.public_key = Some(key);

        info!(key_bits = self.public_key.as_ref().map(|k| k.bits()), "Session established");
        Ok(())
    }

    /// Store a bearer token.
    pub fn set_token(&mut self, token: impl Into<String>) -> Result<(), SessionError> {
        let token = token.into();
        let next = PersistedSession {
            token: Some(StoredValue::new(&token, self.ttl)),
            ..self.persisted.clone()
        };
        self.commit(next)?;
        self.token = Some(token);
        Ok(())
    }

    /// Decode, verify and install a URL-encoded public key. On failure the
    /// current key is left untouched.
    pub fn set_public_key(&mut self, raw: &str) -> Result<(), SessionError> {
        let key = PublicKeyHandle::install(raw).inspect_err(|e| {
            warn!(error = %e, "Public key rejected");
        })?;
        let next = PersistedSession {
            public_key: Some(StoredValue::new(key.pem(), self.ttl)),
            ..self.persisted.clone()
        };
        self.commit(next)?;
        self.public_key = Some(key);
        Ok(())
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Token or [`SessionError::NotAuthenticated`].
    pub fn require_token(&self) -> Result<&str, SessionError> {
        self.token().ok_or(SessionError::NotAuthenticated)
    }

    pub fn public_key(&self) -> Option<&PublicKeyHandle> {
        self.public_key.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    /// Same as [`encrypt_with_public_key`](Self::encrypt_with_public_key).
    pub fn encrypt(&self, plaintext: &str) -> Result<String, SessionError> {
        self.encrypt_with_public_key(plaintext)
    }

    /// Encrypt with the installed key (RSA PKCS#1 v1.5, base64).
    pub fn encrypt_with_public_key(&self, plaintext: &str) -> Result<String, SessionError> {
        self.public_key
            .as_ref()
            .ok_or(SessionError::NoPublicKey)?
            .encrypt(plaintext)
    }

    /// Forget token and key, in memory and in the store.
    pub fn logout(&mut self) -> Result<(), SessionError> {
        self.store.clear()?;
        self.token = None;
        self.public_key = None;
        self.persisted = PersistedSession::default();
        info!("Session cleared");
        Ok(())
    }

    /// Write `next` to the store, then adopt it. A failed write changes
    /// nothing in memory.
    fn commit(&mut self, next: PersistedSession) -> Result<(), SessionError> {
        self.store.save(&next)?;
        self.persisted = next;
        Ok(())
    }

    fn persist(&self) -> Result<(), SessionError> {
        if self.persisted.is_empty() {
            self.store.clear()?;
        } else {
            self.store.save(&self.persisted)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("authenticated", &self.is_authenticated())
            .field("public_key", &self.public_key)
            .finish()
    }
}

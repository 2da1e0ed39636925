//! Session store port: persistence for the bearer token and public key.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from session persistence.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Session store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session store format error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// A persisted value with its own expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredValue {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl StoredValue {
    /// Value expiring `ttl` from now.
    pub fn new(value: impl Into<String>, ttl: Duration) -> Self {
        Self {
            value: value.into(),
            expires_at: Utc::now() + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Everything the client persists between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSession {
    #[serde(default)]
    pub token: Option<StoredValue>,
    /// Decoded PEM of the verified public key
    #[serde(default)]
    pub public_key: Option<StoredValue>,
}

impl PersistedSession {
    /// Token, unless missing or expired.
    pub fn live_token(&self, now: DateTime<Utc>) -> Option<&str> {
        live(self.token.as_ref(), now)
    }

    /// Public key PEM, unless missing or expired.
    pub fn live_public_key(&self, now: DateTime<Utc>) -> Option<&str> {
        live(self.public_key.as_ref(), now)
    }

    pub fn is_empty(&self) -> bool {
        self.token.is_none() && self.public_key.is_none()
    }
}

fn live(value: Option<&StoredValue>, now: DateTime<Utc>) -> Option<&str> {
    value
        .filter(|v| !v.is_expired(now))
        .map(|v| v.value.as_str())
}

/// Persistence for [`PersistedSession`].
pub trait SessionStore: Send + Sync {
    /// Load the stored session; an absent store yields an empty session.
    fn load(&self) -> Result<PersistedSession, StoreError>;

    /// Replace the stored session.
    fn save(&self, session: &PersistedSession) -> Result<(), StoreError>;

    /// Remove everything.
    fn clear(&self) -> Result<(), StoreError>;
}

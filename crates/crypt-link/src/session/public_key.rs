//! Verified RSA public key.
//!
//! A key is only ever handed out after it has been decoded, parsed and has
//! encrypted the self-test value once. There is no way to build a
//! [`PublicKeyHandle`] that skipped the self-test.

use super::SessionError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use percent_encoding::percent_decode_str;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};
use std::fmt;

/// Plaintext encrypted during install to prove the key works.
pub const SELF_TEST_VALUE: &str = "test";

/// A parsed public key that passed the encryption self-test.
#[derive(Clone)]
pub struct PublicKeyHandle {
    pem: String,
    key: RsaPublicKey,
}

impl PublicKeyHandle {
    /// Percent-decode `raw` as received from the login service, then verify.
    pub fn install(raw: &str) -> Result<Self, SessionError> {
        let decoded = percent_decode_str(raw)
            .decode_utf8()
            .map_err(|e| SessionError::InvalidPublicKey(format!("not UTF-8 after decoding: {e}")))?;
        Self::from_pem(&decoded)
    }

    /// Verify an already decoded PEM (SPKI, falling back to PKCS#1).
    pub fn from_pem(pem: &str) -> Result<Self, SessionError> {
        let pem = pem.trim();
        let key = RsaPublicKey::from_public_key_pem(pem)
            .or_else(|spki_err| {
                RsaPublicKey::from_pkcs1_pem(pem).map_err(|pkcs1_err| {
                    SessionError::InvalidPublicKey(format!(
                        "not an SPKI key ({spki_err}) nor a PKCS#1 key ({pkcs1_err})"
                    ))
                })
            })?;

        let handle = Self {
            pem: pem.to_string(),
            key,
        };
        handle
            .encrypt_bytes(SELF_TEST_VALUE.as_bytes())
            .map_err(|e| SessionError::KeyTestFailed(e.to_string()))?;
        Ok(handle)
    }

    /// The decoded PEM text.
    pub fn pem(&self) -> &str {
        &self.pem
    }

    /// Modulus size in bits.
    pub fn bits(&self) -> usize {
        self.key.size() * 8
    }

    /// RSA PKCS#1 v1.5 encryption, base64 encoded.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, SessionError> {
        let ciphertext = self.encrypt_bytes(plaintext.as_bytes())?;
        Ok(BASE64.encode(ciphertext))
    }

    fn encrypt_bytes(&self, plaintext: &[u8]) -> Result<Vec<u8>, SessionError> {
        let mut rng = rand::thread_rng();
        self.key
            .encrypt(&mut rng, Pkcs1v15Encrypt, plaintext)
            .map_err(|e| SessionError::Encryption(e.to_string()))
    }
}

impl fmt::Debug for PublicKeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKeyHandle")
            .field("bits", &self.bits())
            .finish()
    }
}

impl PartialEq for PublicKeyHandle {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

//! Ed25519 secret key handling.

use crate::error::{SignerError, SignerResult};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::{SigningKey, VerifyingKey};
use std::fmt;

/// The server's grant signing key.
pub struct SecretKey {
    inner: SigningKey,
}

impl SecretKey {
    /// Generate a new random key.
    pub fn generate() -> Self {
        let mut rng = rand_core::OsRng;
        Self {
            inner: SigningKey::generate(&mut rng),
        }
    }

    /// Parse a base64-encoded key.
    ///
    /// Accepts the 32-byte seed, or 64 bytes of seed followed by the public
    /// key (checked for consistency).
    pub fn from_base64(s: &str) -> SignerResult<Self> {
        let bytes = STANDARD
            .decode(s.trim())
            .map_err(|e| SignerError::KeyParsing(format!("invalid base64: {e}")))?;

        let seed: [u8; 32] = match bytes.len() {
            32 | 64 => bytes[..32]
                .try_into()
                .map_err(|_| SignerError::KeyParsing("invalid secret key bytes".to_string()))?,
            n => {
                return Err(SignerError::KeyParsing(format!(
                    "expected 32 or 64 bytes, got {n}"
                )));
            }
        };
        let inner = SigningKey::from_bytes(&seed);

        if bytes.len() == 64 && inner.verifying_key().as_bytes()[..] != bytes[32..] {
            return Err(SignerError::KeyParsing(
                "public half does not match secret key".to_string(),
            ));
        }

        Ok(Self { inner })
    }

    /// Read a base64 key from a file.
    pub fn from_file(path: &std::path::Path) -> SignerResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_base64(&contents)
    }

    /// Encode the 32-byte seed as base64.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.inner.as_bytes())
    }

    /// Base64 of the public key, for logging which key is active.
    pub fn public_key_base64(&self) -> String {
        STANDARD.encode(self.inner.verifying_key().as_bytes())
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.inner
    }

    pub(crate) fn verifying_key(&self) -> VerifyingKey {
        self.inner.verifying_key()
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey([REDACTED])")
    }
}

//! Upload grant encoding, signing and verification.
//!
//! Wire form: `base64url(json(grant)) "." base64url(signature)`, both without
//! padding, so the token is safe as a single URL path segment.

use crate::error::{SignerError, SignerResult};
use crate::key::SecretKey;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ed25519_dalek::{Signature, Signer as _};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Upper bound on an encoded grant, checked before decoding.
const MAX_GRANT_LEN: usize = 2048;

/// Permission to upload one object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadGrant {
    /// Pending object key the upload must be written to.
    #[serde(rename = "k")]
    pub object_key: String,
    /// Content type the client must send.
    #[serde(rename = "t")]
    pub content_type: String,
    /// Maximum body size in bytes.
    #[serde(rename = "s")]
    pub max_size: u64,
    /// Expiry as a unix timestamp.
    #[serde(rename = "e")]
    pub expires_at: i64,
}

impl UploadGrant {
    pub fn new(
        object_key: impl Into<String>,
        content_type: impl Into<String>,
        max_size: u64,
        expires_at: OffsetDateTime,
    ) -> Self {
        Self {
            object_key: object_key.into(),
            content_type: content_type.into(),
            max_size,
            expires_at: expires_at.unix_timestamp(),
        }
    }

    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now.unix_timestamp() >= self.expires_at
    }
}

/// Signs and verifies upload grants with one Ed25519 key.
#[derive(Debug)]
pub struct GrantSigner {
    key: SecretKey,
}

impl GrantSigner {
    pub fn new(key: SecretKey) -> Self {
        Self { key }
    }

    /// Signer with a freshly generated key.
    pub fn generate() -> Self {
        Self::new(SecretKey::generate())
    }

    pub fn public_key_base64(&self) -> String {
        self.key.public_key_base64()
    }

    /// Encode and sign a grant.
    pub fn sign(&self, grant: &UploadGrant) -> SignerResult<String> {
        let payload = serde_json::to_vec(grant)
            .map_err(|e| SignerError::Malformed(format!("failed to encode grant: {e}")))?;
        let signature = self.key.signing_key().sign(&payload);
        Ok(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode(signature.to_bytes())
        ))
    }

    /// Verify a token's signature and expiry, returning the grant.
    pub fn verify(&self, token: &str) -> SignerResult<UploadGrant> {
        self.verify_at(token, OffsetDateTime::now_utc())
    }

    /// Verify against an explicit clock.
    pub fn verify_at(&self, token: &str, now: OffsetDateTime) -> SignerResult<UploadGrant> {
        if token.len() > MAX_GRANT_LEN {
            return Err(SignerError::Malformed("grant too long".to_string()));
        }
        let (payload_b64, signature_b64) = token
            .split_once('.')
            .ok_or_else(|| SignerError::Malformed("missing signature".to_string()))?;

        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|e| SignerError::Malformed(format!("invalid payload encoding: {e}")))?;
        let signature_bytes: [u8; 64] = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|e| SignerError::Malformed(format!("invalid signature encoding: {e}")))?
            .try_into()
            .map_err(|_| SignerError::Malformed("signature must be 64 bytes".to_string()))?;

        self.key
            .verifying_key()
            .verify_strict(&payload, &Signature::from_bytes(&signature_bytes))
            .map_err(|_| SignerError::VerificationFailed)?;

        let grant: UploadGrant = serde_json::from_slice(&payload)
            .map_err(|e| SignerError::Malformed(format!("invalid grant payload: {e}")))?;
        if grant.is_expired_at(now) {
            return Err(SignerError::Expired);
        }
        Ok(grant)
    }
}

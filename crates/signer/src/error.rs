//! Errors from key loading and grant verification.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("invalid signing key: {0}")]
    KeyParsing(String),

    /// The grant is not `payload.signature` base64url, or the payload is not JSON.
    #[error("malformed grant: {0}")]
    Malformed(String),

    /// Signature does not match the payload under this server's key.
    #[error("grant signature verification failed")]
    VerificationFailed,

    #[error("grant expired")]
    Expired,

    #[error("failed to read signing key: {0}")]
    Io(#[from] std::io::Error),
}

pub type SignerResult<T> = std::result::Result<T, SignerError>;

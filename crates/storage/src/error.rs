//! Errors returned by object store backends.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    /// The key has no object. Purge counts this as already deleted.
    #[error("object not found: {0}")]
    NotFound(String),

    /// Rejected before touching the backend (traversal, empty segments).
    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("S3 error: {0}")]
    S3(#[from] Box<dyn std::error::Error + Send + Sync>),

    /// A presigned upload URL could not be produced.
    #[error("presign error: {0}")]
    Presign(String),

    #[error("storage configuration error: {0}")]
    Config(String),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

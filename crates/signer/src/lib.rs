//! Signed upload grants for fishlore.
//!
//! When the storage backend cannot presign uploads, the server hands out an
//! upload grant: a compact token naming one pending key, its content type,
//! a size limit and an expiry, signed with the server's Ed25519 key. The
//! grant itself is the capability for `PUT /v1/uploads/{grant}`.

pub mod error;
pub mod grant;
pub mod key;

pub use error::{SignerError, SignerResult};
pub use grant::{GrantSigner, UploadGrant};
pub use key::SecretKey;

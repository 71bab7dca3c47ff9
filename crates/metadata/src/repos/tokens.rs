//! API token storage. Only SHA-256 hashes of secrets are persisted.

use crate::error::MetadataResult;
use crate::models::TokenRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

#[async_trait]
pub trait TokenRepo: Send + Sync {
    async fn create_token(&self, token: &TokenRow) -> MetadataResult<()>;

    /// Lookup used by the bearer auth middleware.
    async fn get_token_by_hash(&self, token_hash: &str) -> MetadataResult<Option<TokenRow>>;

    async fn get_token(&self, token_id: Uuid) -> MetadataResult<Option<TokenRow>>;

    /// Record `last_used_at`. Called off the request path.
    async fn touch_token(&self, token_id: Uuid, used_at: OffsetDateTime) -> MetadataResult<()>;

    /// `NotFound` if no token has this id.
    async fn revoke_token(&self, token_id: Uuid, revoked_at: OffsetDateTime) -> MetadataResult<()>;

    /// Newest first, revoked tokens included.
    async fn list_tokens(&self) -> MetadataResult<Vec<TokenRow>>;
}

//! Bootstrap token marker repository.

use crate::error::MetadataResult;
use async_trait::async_trait;
use uuid::Uuid;

/// Tracks which token was minted from the configured bootstrap hash, so a
/// changed hash can revoke the previous one.
#[async_trait]
pub trait BootstrapRepo: Send + Sync {
    async fn get_bootstrap_token_id(&self) -> MetadataResult<Option<Uuid>>;

    async fn set_bootstrap_token_id(&self, token_id: Uuid) -> MetadataResult<()>;

    async fn clear_bootstrap_token_id(&self) -> MetadataResult<()>;
}

//! Tribal classification repository.

use crate::error::MetadataResult;
use crate::models::ClassificationRow;
use async_trait::async_trait;
use fishlore_core::catalog::{ClassificationDraft, ClassificationId, FishId};
use time::OffsetDateTime;

/// Repository for tribal classifications.
#[async_trait]
pub trait ClassificationRepo: Send + Sync {
    /// Record a classification for a fish. `NotFound` if the fish does not exist.
    async fn create_classification(
        &self,
        fish_id: FishId,
        draft: &ClassificationDraft,
        now: OffsetDateTime,
    ) -> MetadataResult<ClassificationRow>;

    async fn get_classification(
        &self,
        id: ClassificationId,
    ) -> MetadataResult<Option<ClassificationRow>>;

    /// Classifications of one fish, oldest first.
    async fn list_classifications(&self, fish_id: FishId)
    -> MetadataResult<Vec<ClassificationRow>>;

    async fn update_classification(
        &self,
        id: ClassificationId,
        draft: &ClassificationDraft,
        now: OffsetDateTime,
    ) -> MetadataResult<ClassificationRow>;

    async fn delete_classification(&self, id: ClassificationId) -> MetadataResult<()>;
}

//! Fish repository.

use crate::error::MetadataResult;
use crate::models::FishRow;
use async_trait::async_trait;
use fishlore_core::catalog::{FishDraft, FishId};
use fishlore_core::search::FishSearchParams;
use time::OffsetDateTime;

/// Repository for fish records.
#[async_trait]
pub trait FishRepo: Send + Sync {
    /// Insert a fish and return the stored row.
    async fn create_fish(&self, draft: &FishDraft, now: OffsetDateTime)
    -> MetadataResult<FishRow>;

    /// Get a fish that is not soft-deleted.
    async fn get_fish(&self, id: FishId) -> MetadataResult<Option<FishRow>>;

    /// Get a fish regardless of its deletion state.
    async fn get_fish_including_deleted(&self, id: FishId) -> MetadataResult<Option<FishRow>>;

    /// Replace a live fish's fields. `NotFound` if missing or soft-deleted.
    async fn update_fish(
        &self,
        id: FishId,
        draft: &FishDraft,
        now: OffsetDateTime,
    ) -> MetadataResult<FishRow>;

    /// Soft-delete a fish. `NotFound` if missing or already deleted.
    async fn soft_delete_fish(&self, id: FishId, now: OffsetDateTime) -> MetadataResult<()>;

    /// Clear a fish's deletion marker. Restoring a live fish is a no-op.
    async fn restore_fish(&self, id: FishId, now: OffsetDateTime) -> MetadataResult<FishRow>;

    /// Keyset search over live fish.
    ///
    /// Returns up to `params.fetch_limit()` rows with `id > cursor`, ordered by
    /// ascending id. The extra row tells the caller whether another page exists.
    async fn search_fish(&self, params: &FishSearchParams) -> MetadataResult<Vec<FishRow>>;
}

//! Capture record repository.

use crate::error::MetadataResult;
use crate::models::CaptureRow;
use async_trait::async_trait;
use fishlore_core::catalog::{CaptureDraft, CaptureId, FishId};
use time::OffsetDateTime;

/// Repository for capture events.
#[async_trait]
pub trait CaptureRepo: Send + Sync {
    /// Record a capture for a fish. `NotFound` if the fish does not exist.
    async fn create_capture(
        &self,
        fish_id: FishId,
        draft: &CaptureDraft,
        now: OffsetDateTime,
    ) -> MetadataResult<CaptureRow>;

    async fn get_capture(&self, id: CaptureId) -> MetadataResult<Option<CaptureRow>>;

    /// Captures of one fish, oldest first.
    async fn list_captures(&self, fish_id: FishId) -> MetadataResult<Vec<CaptureRow>>;

    async fn update_capture(
        &self,
        id: CaptureId,
        draft: &CaptureDraft,
        now: OffsetDateTime,
    ) -> MetadataResult<CaptureRow>;

    async fn delete_capture(&self, id: CaptureId) -> MetadataResult<()>;
}

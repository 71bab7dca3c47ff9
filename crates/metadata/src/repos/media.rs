//! Media record repository.

use crate::error::MetadataResult;
use crate::models::{MediaRow, NewMedia};
use async_trait::async_trait;
use fishlore_core::catalog::{FishId, MediaId};

/// Repository for confirmed media files.
#[async_trait]
pub trait MediaRepo: Send + Sync {
    async fn get_media(&self, id: MediaId) -> MetadataResult<Option<MediaRow>>;

    /// Look up the record created from a pending upload key.
    async fn get_media_by_pending_key(&self, pending_key: &str)
    -> MetadataResult<Option<MediaRow>>;

    /// Record a confirmed upload.
    ///
    /// Runs in one transaction keyed on the pending key: if a row for that
    /// key already exists it is returned unchanged. The flag is `true` when
    /// this call inserted the row.
    async fn record_media(&self, media: &NewMedia) -> MetadataResult<(MediaRow, bool)>;

    /// Media of one fish, oldest first.
    async fn list_media(&self, fish_id: FishId) -> MetadataResult<Vec<MediaRow>>;

    /// Page through all media rows by ascending id, starting after `after_id`.
    async fn list_media_after(&self, after_id: i64, limit: u32) -> MetadataResult<Vec<MediaRow>>;

    /// Delete a media row and return it. `NotFound` if missing.
    async fn delete_media(&self, id: MediaId) -> MetadataResult<MediaRow>;
}

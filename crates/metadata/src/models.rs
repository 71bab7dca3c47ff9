//! Database models mapping to the metadata schema.

use sqlx::FromRow;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

/// Fish species record.
#[derive(Debug, Clone, FromRow)]
pub struct FishRow {
    pub id: i64,
    /// Indigenous name.
    pub name: String,
    pub scientific_name: Option<String>,
    pub common_name: Option<String>,
    pub description: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    /// Set when the fish is soft-deleted; such rows are hidden from reads.
    pub deleted_at: Option<OffsetDateTime>,
}

/// Capture event record.
#[derive(Debug, Clone, FromRow)]
pub struct CaptureRow {
    pub id: i64,
    pub fish_id: i64,
    pub tribe: String,
    pub location: String,
    pub method: String,
    pub captured_on: Option<Date>,
    pub notes: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Tribal classification record.
#[derive(Debug, Clone, FromRow)]
pub struct ClassificationRow {
    pub id: i64,
    pub fish_id: i64,
    pub tribe: String,
    pub local_name: Option<String>,
    /// Food or taboo category.
    pub category: String,
    pub processing_method: Option<String>,
    pub notes: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Confirmed media file record.
#[derive(Debug, Clone, FromRow)]
pub struct MediaRow {
    pub id: i64,
    pub fish_id: i64,
    /// `audio` or `image`.
    pub kind: String,
    /// Pending key the object was uploaded to. Unique; makes confirm idempotent.
    pub pending_key: String,
    /// Permanent key the object lives under.
    pub object_key: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub title: Option<String>,
    pub duration_ms: Option<i64>,
    pub created_at: OffsetDateTime,
}

/// Media record to insert on confirm.
#[derive(Debug, Clone)]
pub struct NewMedia {
    pub fish_id: i64,
    pub kind: String,
    pub pending_key: String,
    pub object_key: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub title: Option<String>,
    pub duration_ms: Option<i64>,
    pub created_at: OffsetDateTime,
}

/// Token record.
#[derive(Debug, Clone, FromRow)]
pub struct TokenRow {
    pub token_id: Uuid,
    pub token_hash: String,
    pub scopes: String, // JSON array
    pub expires_at: Option<OffsetDateTime>,
    pub revoked_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub last_used_at: Option<OffsetDateTime>,
    pub description: Option<String>,
}

/// Purge job record.
#[derive(Debug, Clone, FromRow)]
pub struct PurgeJobRow {
    pub purge_job_id: Uuid,
    pub state: String,
    pub dry_run: bool,
    pub started_at: Option<OffsetDateTime>,
    pub finished_at: Option<OffsetDateTime>,
    pub stats_json: Option<String>,
    pub error: Option<String>,
}

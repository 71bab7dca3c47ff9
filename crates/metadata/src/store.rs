//! Metadata store trait and SQLite implementation.

use crate::error::MetadataResult;
use crate::repos::{
    BootstrapRepo, CaptureRepo, ClassificationRepo, FacetRepo, FishRepo, MediaRepo, PurgeJobRepo,
    TokenRepo,
};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore:
    FishRepo
    + CaptureRepo
    + ClassificationRepo
    + MediaRepo
    + FacetRepo
    + TokenRepo
    + BootstrapRepo
    + PurgeJobRepo
    + Send
    + Sync
{
    /// Create the schema if it does not exist.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and apply the schema.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();
        let query_timeout_secs = query_timeout_secs.unwrap_or(30);

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // A single writer connection avoids "database is locked" under axum concurrency.
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(query_timeout_secs))
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::info!(
            path = %path.display(),
            query_timeout_secs,
            "Opened SQLite metadata store"
        );

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Escape LIKE wildcards and wrap the text for a substring match.
fn like_pattern(text: &str) -> String {
    let mut pattern = String::with_capacity(text.len() + 2);
    pattern.push('%');
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Keyset search. Parameters: ?1 cursor, ?2 text pattern, ?3 tribe,
/// ?4 location, ?5 method, ?6 category, ?7 limit.
///
/// Location and method must match the same capture record.
const SEARCH_FISH_SQL: &str = r#"
SELECT f.* FROM fish f
WHERE f.deleted_at IS NULL
  AND f.id > ?1
  AND (?2 IS NULL
       OR f.name LIKE ?2 ESCAPE '\'
       OR f.scientific_name LIKE ?2 ESCAPE '\'
       OR f.common_name LIKE ?2 ESCAPE '\')
  AND (?3 IS NULL
       OR EXISTS (SELECT 1 FROM captures c
                  WHERE c.fish_id = f.id AND c.tribe = ?3 COLLATE NOCASE)
       OR EXISTS (SELECT 1 FROM classifications t
                  WHERE t.fish_id = f.id AND t.tribe = ?3 COLLATE NOCASE))
  AND ((?4 IS NULL AND ?5 IS NULL)
       OR EXISTS (SELECT 1 FROM captures c
                  WHERE c.fish_id = f.id
                    AND (?4 IS NULL OR c.location = ?4 COLLATE NOCASE)
                    AND (?5 IS NULL OR c.method = ?5 COLLATE NOCASE)))
  AND (?6 IS NULL
       OR EXISTS (SELECT 1 FROM classifications t
                  WHERE t.fish_id = f.id AND t.category = ?6 COLLATE NOCASE))
ORDER BY f.id ASC
LIMIT ?7
"#;

mod sqlite_impl {
    use super::*;
    use crate::error::{MetadataError, is_foreign_key_violation, is_unique_violation};
    use crate::models::*;
    use crate::repos::{Facets, PurgeJobState};
    use fishlore_core::catalog::{
        CaptureDraft, CaptureId, ClassificationDraft, ClassificationId, FishDraft, FishId, MediaId,
    };
    use fishlore_core::search::FishSearchParams;
    use time::OffsetDateTime;
    use uuid::Uuid;

    fn missing_fish(fish_id: FishId) -> impl FnOnce(sqlx::Error) -> MetadataError {
        move |e| {
            if is_foreign_key_violation(&e) {
                MetadataError::NotFound(format!("fish {fish_id}"))
            } else {
                e.into()
            }
        }
    }

    #[async_trait]
    impl FishRepo for SqliteStore {
        async fn create_fish(
            &self,
            draft: &FishDraft,
            now: OffsetDateTime,
        ) -> MetadataResult<FishRow> {
            let row = sqlx::query_as::<_, FishRow>(
                r#"
                INSERT INTO fish (name, scientific_name, common_name, description, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                RETURNING *
                "#,
            )
            .bind(&draft.name)
            .bind(&draft.scientific_name)
            .bind(&draft.common_name)
            .bind(&draft.description)
            .bind(now)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_fish(&self, id: FishId) -> MetadataResult<Option<FishRow>> {
            let row = sqlx::query_as::<_, FishRow>(
                "SELECT * FROM fish WHERE id = ? AND deleted_at IS NULL",
            )
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_fish_including_deleted(&self, id: FishId) -> MetadataResult<Option<FishRow>> {
            let row = sqlx::query_as::<_, FishRow>("SELECT * FROM fish WHERE id = ?")
                .bind(id.get())
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn update_fish(
            &self,
            id: FishId,
            draft: &FishDraft,
            now: OffsetDateTime,
        ) -> MetadataResult<FishRow> {
            sqlx::query_as::<_, FishRow>(
                r#"
                UPDATE fish
                SET name = ?, scientific_name = ?, common_name = ?, description = ?, updated_at = ?
                WHERE id = ? AND deleted_at IS NULL
                RETURNING *
                "#,
            )
            .bind(&draft.name)
            .bind(&draft.scientific_name)
            .bind(&draft.common_name)
            .bind(&draft.description)
            .bind(now)
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| MetadataError::NotFound(format!("fish {id}")))
        }

        async fn soft_delete_fish(&self, id: FishId, now: OffsetDateTime) -> MetadataResult<()> {
            let result = sqlx::query(
                "UPDATE fish SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
            )
            .bind(now)
            .bind(now)
            .bind(id.get())
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("fish {id}")));
            }
            Ok(())
        }

        async fn restore_fish(&self, id: FishId, now: OffsetDateTime) -> MetadataResult<FishRow> {
            sqlx::query(
                "UPDATE fish SET deleted_at = NULL, updated_at = ? WHERE id = ? AND deleted_at IS NOT NULL",
            )
            .bind(now)
            .bind(id.get())
            .execute(&self.pool)
            .await?;

            self.get_fish_including_deleted(id)
                .await?
                .ok_or_else(|| MetadataError::NotFound(format!("fish {id}")))
        }

        async fn search_fish(&self, params: &FishSearchParams) -> MetadataResult<Vec<FishRow>> {
            let cursor = params.cursor.map(FishId::get).unwrap_or(0);
            let rows = sqlx::query_as::<_, FishRow>(SEARCH_FISH_SQL)
                .bind(cursor)
                .bind(params.text.as_deref().map(like_pattern))
                .bind(params.tribe.as_deref())
                .bind(params.location.as_deref())
                .bind(params.method.as_deref())
                .bind(params.category.as_deref())
                .bind(i64::from(params.fetch_limit()))
                .fetch_all(&self.pool)
                .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl CaptureRepo for SqliteStore {
        async fn create_capture(
            &self,
            fish_id: FishId,
            draft: &CaptureDraft,
            now: OffsetDateTime,
        ) -> MetadataResult<CaptureRow> {
            let row = sqlx::query_as::<_, CaptureRow>(
                r#"
                INSERT INTO captures (fish_id, tribe, location, method, captured_on, notes, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                RETURNING *
                "#,
            )
            .bind(fish_id.get())
            .bind(&draft.tribe)
            .bind(&draft.location)
            .bind(&draft.method)
            .bind(draft.captured_on)
            .bind(&draft.notes)
            .bind(now)
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(missing_fish(fish_id))?;
            Ok(row)
        }

        async fn get_capture(&self, id: CaptureId) -> MetadataResult<Option<CaptureRow>> {
            let row = sqlx::query_as::<_, CaptureRow>("SELECT * FROM captures WHERE id = ?")
                .bind(id.get())
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn list_captures(&self, fish_id: FishId) -> MetadataResult<Vec<CaptureRow>> {
            let rows = sqlx::query_as::<_, CaptureRow>(
                "SELECT * FROM captures WHERE fish_id = ? ORDER BY id",
            )
            .bind(fish_id.get())
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn update_capture(
            &self,
            id: CaptureId,
            draft: &CaptureDraft,
            now: OffsetDateTime,
        ) -> MetadataResult<CaptureRow> {
            sqlx::query_as::<_, CaptureRow>(
                r#"
                UPDATE captures
                SET tribe = ?, location = ?, method = ?, captured_on = ?, notes = ?, updated_at = ?
                WHERE id = ?
                RETURNING *
                "#,
            )
            .bind(&draft.tribe)
            .bind(&draft.location)
            .bind(&draft.method)
            .bind(draft.captured_on)
            .bind(&draft.notes)
            .bind(now)
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| MetadataError::NotFound(format!("capture {id}")))
        }

        async fn delete_capture(&self, id: CaptureId) -> MetadataResult<()> {
            let result = sqlx::query("DELETE FROM captures WHERE id = ?")
                .bind(id.get())
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("capture {id}")));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ClassificationRepo for SqliteStore {
        async fn create_classification(
            &self,
            fish_id: FishId,
            draft: &ClassificationDraft,
            now: OffsetDateTime,
        ) -> MetadataResult<ClassificationRow> {
            let row = sqlx::query_as::<_, ClassificationRow>(
                r#"
                INSERT INTO classifications
                    (fish_id, tribe, local_name, category, processing_method, notes, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                RETURNING *
                "#,
            )
            .bind(fish_id.get())
            .bind(&draft.tribe)
            .bind(&draft.local_name)
            .bind(&draft.category)
            .bind(&draft.processing_method)
            .bind(&draft.notes)
            .bind(now)
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(missing_fish(fish_id))?;
            Ok(row)
        }

        async fn get_classification(
            &self,
            id: ClassificationId,
        ) -> MetadataResult<Option<ClassificationRow>> {
            let row = sqlx::query_as::<_, ClassificationRow>(
                "SELECT * FROM classifications WHERE id = ?",
            )
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_classifications(
            &self,
            fish_id: FishId,
        ) -> MetadataResult<Vec<ClassificationRow>> {
            let rows = sqlx::query_as::<_, ClassificationRow>(
                "SELECT * FROM classifications WHERE fish_id = ? ORDER BY id",
            )
            .bind(fish_id.get())
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn update_classification(
            &self,
            id: ClassificationId,
            draft: &ClassificationDraft,
            now: OffsetDateTime,
        ) -> MetadataResult<ClassificationRow> {
            sqlx::query_as::<_, ClassificationRow>(
                r#"
                UPDATE classifications
                SET tribe = ?, local_name = ?, category = ?, processing_method = ?, notes = ?, updated_at = ?
                WHERE id = ?
                RETURNING *
                "#,
            )
            .bind(&draft.tribe)
            .bind(&draft.local_name)
            .bind(&draft.category)
            .bind(&draft.processing_method)
            .bind(&draft.notes)
            .bind(now)
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| MetadataError::NotFound(format!("classification {id}")))
        }

        async fn delete_classification(&self, id: ClassificationId) -> MetadataResult<()> {
            let result = sqlx::query("DELETE FROM classifications WHERE id = ?")
                .bind(id.get())
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("classification {id}")));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl MediaRepo for SqliteStore {
        async fn get_media(&self, id: MediaId) -> MetadataResult<Option<MediaRow>> {
            let row = sqlx::query_as::<_, MediaRow>("SELECT * FROM media WHERE id = ?")
                .bind(id.get())
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn get_media_by_pending_key(
            &self,
            pending_key: &str,
        ) -> MetadataResult<Option<MediaRow>> {
            let row = sqlx::query_as::<_, MediaRow>("SELECT * FROM media WHERE pending_key = ?")
                .bind(pending_key)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn record_media(&self, media: &NewMedia) -> MetadataResult<(MediaRow, bool)> {
            let mut tx = self.pool.begin().await?;

            let result = sqlx::query(
                r#"
                INSERT INTO media (
                    fish_id, kind, pending_key, object_key, content_type,
                    size_bytes, title, duration_ms, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(pending_key) DO NOTHING
                "#,
            )
            .bind(media.fish_id)
            .bind(&media.kind)
            .bind(&media.pending_key)
            .bind(&media.object_key)
            .bind(&media.content_type)
            .bind(media.size_bytes)
            .bind(&media.title)
            .bind(media.duration_ms)
            .bind(media.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_foreign_key_violation(&e) {
                    MetadataError::NotFound(format!("fish {}", media.fish_id))
                } else if is_unique_violation(&e) {
                    MetadataError::Constraint(format!(
                        "object key {} is already recorded",
                        media.object_key
                    ))
                } else {
                    e.into()
                }
            })?;

            let row = sqlx::query_as::<_, MediaRow>("SELECT * FROM media WHERE pending_key = ?")
                .bind(&media.pending_key)
                .fetch_one(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok((row, result.rows_affected() == 1))
        }

        async fn list_media(&self, fish_id: FishId) -> MetadataResult<Vec<MediaRow>> {
            let rows =
                sqlx::query_as::<_, MediaRow>("SELECT * FROM media WHERE fish_id = ? ORDER BY id")
                    .bind(fish_id.get())
                    .fetch_all(&self.pool)
                    .await?;
            Ok(rows)
        }

        async fn list_media_after(
            &self,
            after_id: i64,
            limit: u32,
        ) -> MetadataResult<Vec<MediaRow>> {
            let rows = sqlx::query_as::<_, MediaRow>(
                "SELECT * FROM media WHERE id > ? ORDER BY id LIMIT ?",
            )
            .bind(after_id)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn delete_media(&self, id: MediaId) -> MetadataResult<MediaRow> {
            let mut tx = self.pool.begin().await?;

            let row = sqlx::query_as::<_, MediaRow>("SELECT * FROM media WHERE id = ?")
                .bind(id.get())
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| MetadataError::NotFound(format!("media {id}")))?;

            sqlx::query("DELETE FROM media WHERE id = ?")
                .bind(id.get())
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok(row)
        }
    }

    #[async_trait]
    impl FacetRepo for SqliteStore {
        async fn get_facets(&self) -> MetadataResult<Facets> {
            let tribes: Vec<String> = sqlx::query_scalar(
                r#"
                SELECT c.tribe AS value FROM captures c
                JOIN fish f ON f.id = c.fish_id WHERE f.deleted_at IS NULL
                UNION
                SELECT t.tribe AS value FROM classifications t
                JOIN fish f ON f.id = t.fish_id WHERE f.deleted_at IS NULL
                ORDER BY value
                "#,
            )
            .fetch_all(&self.pool)
            .await?;

            let locations: Vec<String> = sqlx::query_scalar(
                r#"
                SELECT DISTINCT c.location FROM captures c
                JOIN fish f ON f.id = c.fish_id WHERE f.deleted_at IS NULL
                ORDER BY c.location
                "#,
            )
            .fetch_all(&self.pool)
            .await?;

            let methods: Vec<String> = sqlx::query_scalar(
                r#"
                SELECT DISTINCT c.method FROM captures c
                JOIN fish f ON f.id = c.fish_id WHERE f.deleted_at IS NULL
                ORDER BY c.method
                "#,
            )
            .fetch_all(&self.pool)
            .await?;

            let categories: Vec<String> = sqlx::query_scalar(
                r#"
                SELECT DISTINCT t.category FROM classifications t
                JOIN fish f ON f.id = t.fish_id WHERE f.deleted_at IS NULL
                ORDER BY t.category
                "#,
            )
            .fetch_all(&self.pool)
            .await?;

            Ok(Facets {
                tribes,
                locations,
                methods,
                categories,
            })
        }
    }

    #[async_trait]
    impl TokenRepo for SqliteStore {
        async fn create_token(&self, token: &TokenRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO tokens (
                    token_id, token_hash, scopes, expires_at,
                    revoked_at, created_at, last_used_at, description
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(token.token_id)
            .bind(&token.token_hash)
            .bind(&token.scopes)
            .bind(token.expires_at)
            .bind(token.revoked_at)
            .bind(token.created_at)
            .bind(token.last_used_at)
            .bind(&token.description)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    MetadataError::AlreadyExists(format!("token {}", token.token_id))
                } else {
                    e.into()
                }
            })?;
            Ok(())
        }

        async fn get_token_by_hash(&self, token_hash: &str) -> MetadataResult<Option<TokenRow>> {
            let row = sqlx::query_as::<_, TokenRow>("SELECT * FROM tokens WHERE token_hash = ?")
                .bind(token_hash)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn get_token(&self, token_id: Uuid) -> MetadataResult<Option<TokenRow>> {
            let row = sqlx::query_as::<_, TokenRow>("SELECT * FROM tokens WHERE token_id = ?")
                .bind(token_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn touch_token(&self, token_id: Uuid, used_at: OffsetDateTime) -> MetadataResult<()> {
            sqlx::query("UPDATE tokens SET last_used_at = ? WHERE token_id = ?")
                .bind(used_at)
                .bind(token_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn revoke_token(
            &self,
            token_id: Uuid,
            revoked_at: OffsetDateTime,
        ) -> MetadataResult<()> {
            let result = sqlx::query(
                "UPDATE tokens SET revoked_at = COALESCE(revoked_at, ?) WHERE token_id = ?",
            )
            .bind(revoked_at)
            .bind(token_id)
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("token {token_id}")));
            }
            Ok(())
        }

        async fn list_tokens(&self) -> MetadataResult<Vec<TokenRow>> {
            let rows =
                sqlx::query_as::<_, TokenRow>("SELECT * FROM tokens ORDER BY created_at DESC")
                    .fetch_all(&self.pool)
                    .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl BootstrapRepo for SqliteStore {
        async fn get_bootstrap_token_id(&self) -> MetadataResult<Option<Uuid>> {
            let value: Option<Option<String>> =
                sqlx::query_scalar("SELECT bootstrap_token_id FROM bootstrap_state WHERE id = 1")
                    .fetch_optional(&self.pool)
                    .await?;
            value
                .flatten()
                .filter(|id| !id.is_empty())
                .map(|id| {
                    Uuid::parse_str(&id).map_err(|e| {
                        MetadataError::Internal(format!(
                            "invalid bootstrap_token_id uuid '{id}': {e}"
                        ))
                    })
                })
                .transpose()
        }

        async fn set_bootstrap_token_id(&self, token_id: Uuid) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO bootstrap_state (id, bootstrap_token_id)
                VALUES (1, ?)
                ON CONFLICT(id) DO UPDATE
                SET bootstrap_token_id = excluded.bootstrap_token_id
                "#,
            )
            .bind(token_id.to_string())
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn clear_bootstrap_token_id(&self) -> MetadataResult<()> {
            sqlx::query("UPDATE bootstrap_state SET bootstrap_token_id = NULL WHERE id = 1")
                .execute(&self.pool)
                .await?;
            Ok(())
        }
    }

    #[async_trait]
    impl PurgeJobRepo for SqliteStore {
        async fn create_purge_job(&self, job: &PurgeJobRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO purge_jobs (purge_job_id, state, dry_run, started_at, finished_at, stats_json, error)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(job.purge_job_id)
            .bind(&job.state)
            .bind(job.dry_run)
            .bind(job.started_at)
            .bind(job.finished_at)
            .bind(&job.stats_json)
            .bind(&job.error)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                // The partial unique index admits one queued or running job.
                if is_unique_violation(&e) {
                    MetadataError::Constraint("another purge job is already active".to_string())
                } else {
                    e.into()
                }
            })?;
            Ok(())
        }

        async fn get_purge_job(&self, job_id: Uuid) -> MetadataResult<Option<PurgeJobRow>> {
            let row = sqlx::query_as::<_, PurgeJobRow>(
                "SELECT * FROM purge_jobs WHERE purge_job_id = ?",
            )
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn update_purge_job_state(
            &self,
            job_id: Uuid,
            state: PurgeJobState,
            finished_at: Option<OffsetDateTime>,
            stats_json: Option<&str>,
            error: Option<&str>,
        ) -> MetadataResult<()> {
            let result = sqlx::query(
                r#"
                UPDATE purge_jobs
                SET state = ?, finished_at = ?, stats_json = COALESCE(?, stats_json), error = ?
                WHERE purge_job_id = ?
                "#,
            )
            .bind(state.as_str())
            .bind(finished_at)
            .bind(stats_json)
            .bind(error)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("purge job {job_id}")));
            }
            Ok(())
        }

        async fn get_recent_purge_jobs(&self, limit: u32) -> MetadataResult<Vec<PurgeJobRow>> {
            let rows = sqlx::query_as::<_, PurgeJobRow>(
                "SELECT * FROM purge_jobs ORDER BY started_at DESC LIMIT ?",
            )
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn get_active_purge_jobs(&self) -> MetadataResult<Vec<PurgeJobRow>> {
            let rows = sqlx::query_as::<_, PurgeJobRow>(
                "SELECT * FROM purge_jobs WHERE state IN ('queued', 'running') ORDER BY started_at DESC",
            )
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }
}

/// SQL schema for SQLite.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS fish (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    scientific_name TEXT,
    common_name TEXT,
    description TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_fish_live ON fish(id) WHERE deleted_at IS NULL;

CREATE TABLE IF NOT EXISTS captures (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    fish_id INTEGER NOT NULL REFERENCES fish(id),
    tribe TEXT NOT NULL,
    location TEXT NOT NULL,
    method TEXT NOT NULL,
    captured_on TEXT,
    notes TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_captures_fish ON captures(fish_id);
CREATE INDEX IF NOT EXISTS idx_captures_tribe ON captures(tribe COLLATE NOCASE, fish_id);

CREATE TABLE IF NOT EXISTS classifications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    fish_id INTEGER NOT NULL REFERENCES fish(id),
    tribe TEXT NOT NULL,
    local_name TEXT,
    category TEXT NOT NULL,
    processing_method TEXT,
    notes TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_classifications_fish ON classifications(fish_id);
CREATE INDEX IF NOT EXISTS idx_classifications_tribe ON classifications(tribe COLLATE NOCASE, fish_id);

CREATE TABLE IF NOT EXISTS media (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    fish_id INTEGER NOT NULL REFERENCES fish(id),
    kind TEXT NOT NULL,
    pending_key TEXT NOT NULL UNIQUE,
    object_key TEXT NOT NULL UNIQUE,
    content_type TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    title TEXT,
    duration_ms INTEGER,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_media_fish ON media(fish_id);

CREATE TABLE IF NOT EXISTS tokens (
    token_id BLOB PRIMARY KEY,
    token_hash TEXT NOT NULL UNIQUE,
    scopes TEXT NOT NULL,
    expires_at TEXT,
    revoked_at TEXT,
    created_at TEXT NOT NULL,
    last_used_at TEXT,
    description TEXT
);

CREATE TABLE IF NOT EXISTS bootstrap_state (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    bootstrap_token_id TEXT
);
INSERT OR IGNORE INTO bootstrap_state (id, bootstrap_token_id) VALUES (1, NULL);

CREATE TABLE IF NOT EXISTS purge_jobs (
    purge_job_id BLOB PRIMARY KEY,
    state TEXT NOT NULL DEFAULT 'queued',
    dry_run INTEGER NOT NULL DEFAULT 0,
    started_at TEXT,
    finished_at TEXT,
    stats_json TEXT,
    error TEXT
);
CREATE INDEX IF NOT EXISTS idx_purge_jobs_started ON purge_jobs(started_at);
-- At most one queued or running job at a time.
CREATE UNIQUE INDEX IF NOT EXISTS idx_purge_jobs_active
    ON purge_jobs((state IN ('queued', 'running')))
    WHERE state IN ('queued', 'running');
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("salmon"), "%salmon%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
        assert_eq!(like_pattern("a\\b"), "%a\\\\b%");
    }
}

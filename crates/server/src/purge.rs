//! Purge of stale pending uploads.
//!
//! Uploads that were signed but never confirmed stay in the pending
//! namespace. A purge run lists `pending/` and deletes every object whose
//! last-modified time is older than `purge.pending_ttl_secs`. Each run is a
//! purge job row; the metadata store admits one active job at a time.

use crate::metrics;
use crate::state::AppState;
use fishlore_core::config::PurgeConfig;
use fishlore_core::media::PENDING_PREFIX;
use fishlore_metadata::models::PurgeJobRow;
use fishlore_metadata::repos::{PurgeJobRepo, PurgeJobState, PurgeStats};
use fishlore_metadata::{MetadataError, MetadataResult, MetadataStore};
use fishlore_storage::{ListingOptions, ObjectStore, StorageError};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Sweep the pending namespace once.
///
/// `now` is the reference time for the TTL cutoff. Listing failures stop the
/// run and are counted in `errors`, like failed deletes.
pub async fn run_purge(
    job_id: Uuid,
    storage: &dyn ObjectStore,
    config: &PurgeConfig,
    dry_run: bool,
    now: OffsetDateTime,
) -> PurgeStats {
    // `None` when the TTL reaches past the representable range: nothing is stale.
    let cutoff = now.checked_sub(config.pending_ttl());
    let mut stats = PurgeStats::default();

    tracing::info!(
        job_id = %job_id,
        dry_run,
        cutoff = ?cutoff,
        max_objects = config.max_objects,
        "starting purge of stale pending uploads"
    );

    let mut pages = storage.list_pages(PENDING_PREFIX, ListingOptions::default());
    'pages: while let Some(page) = pages.next().await {
        let page = match page {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "failed to list pending objects, stopping purge");
                stats.errors += 1;
                break;
            }
        };
        metrics::STORAGE_LISTING_PAGES_FETCHED
            .with_label_values(&[storage.backend_name()])
            .inc();

        for entry in page.entries {
            if stats.scanned >= config.max_objects {
                tracing::info!(
                    job_id = %job_id,
                    scanned = stats.scanned,
                    "purge reached max_objects, remaining objects are left for the next run"
                );
                break 'pages;
            }
            stats.scanned += 1;

            let Some(modified) = entry.last_modified else {
                tracing::debug!(key = %entry.key, "pending object has no modification time, skipping");
                stats.skipped_fresh += 1;
                continue;
            };
            if cutoff.is_none_or(|cutoff| modified >= cutoff) {
                stats.skipped_fresh += 1;
                continue;
            }

            if dry_run {
                tracing::info!(job_id = %job_id, key = %entry.key, size = entry.size, "would delete stale pending object");
                stats.deleted += 1;
                stats.bytes_reclaimed += entry.size;
                continue;
            }

            match storage.delete(&entry.key).await {
                Ok(()) => {
                    tracing::debug!(key = %entry.key, size = entry.size, "deleted stale pending object");
                    stats.deleted += 1;
                    stats.bytes_reclaimed += entry.size;
                    metrics::PURGE_OBJECTS_DELETED.inc();
                    metrics::PURGE_BYTES_RECLAIMED.inc_by(entry.size);
                }
                // Gone already: a concurrent confirm or purge got there first.
                Err(StorageError::NotFound(_)) => {
                    stats.deleted += 1;
                }
                Err(e) => {
                    tracing::warn!(job_id = %job_id, key = %entry.key, error = %e, "failed to delete pending object");
                    stats.errors += 1;
                }
            }
        }
    }

    tracing::info!(
        job_id = %job_id,
        dry_run,
        scanned = stats.scanned,
        deleted = stats.deleted,
        bytes_reclaimed = stats.bytes_reclaimed,
        skipped_fresh = stats.skipped_fresh,
        errors = stats.errors,
        "purge finished"
    );
    stats
}

/// Create a purge job and run it in the background.
///
/// Returns `MetadataError::Constraint` when another job is already active.
pub async fn spawn_purge_job(state: &AppState, dry_run: bool) -> MetadataResult<Uuid> {
    let job_id = Uuid::new_v4();
    let job = PurgeJobRow {
        purge_job_id: job_id,
        state: PurgeJobState::Queued.as_str().to_string(),
        dry_run,
        started_at: Some(OffsetDateTime::now_utc()),
        finished_at: None,
        stats_json: None,
        error: None,
    };
    state.metadata.create_purge_job(&job).await?;
    metrics::PURGE_JOBS_ACTIVE.inc();
    tracing::info!(job_id = %job_id, dry_run, "purge job queued");

    let metadata = state.metadata.clone();
    let storage = state.storage.clone();
    let config = state.config.purge.clone();

    let handle = tokio::spawn(async move {
        let started = Instant::now();
        if let Err(e) = metadata
            .update_purge_job_state(job_id, PurgeJobState::Running, None, None, None)
            .await
        {
            tracing::warn!(job_id = %job_id, error = %e, "failed to mark purge job running");
        }

        let stats = run_purge(
            job_id,
            storage.as_ref(),
            &config,
            dry_run,
            OffsetDateTime::now_utc(),
        )
        .await;

        let (final_state, error) = if stats.errors > 0 {
            (
                PurgeJobState::Failed,
                Some(format!("{} errors during purge", stats.errors)),
            )
        } else {
            (PurgeJobState::Finished, None)
        };

        metrics::PURGE_JOBS_ACTIVE.dec();
        metrics::PURGE_JOB_DURATION
            .with_label_values(&[final_state.as_str()])
            .observe(started.elapsed().as_secs_f64());

        let stats_json = serde_json::to_string(&stats).ok();
        if let Err(e) = metadata
            .update_purge_job_state(
                job_id,
                final_state,
                Some(OffsetDateTime::now_utc()),
                stats_json.as_deref(),
                error.as_deref(),
            )
            .await
        {
            tracing::error!(job_id = %job_id, error = %e, "failed to record purge job result");
        }
    });

    state.purge_tasks.register(job_id, handle).await;
    Ok(job_id)
}

/// Run purge every `purge.interval_secs`. Skips a tick while a job is active.
pub fn spawn_scheduler(state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = state.config.purge.interval();
        let dry_run = state.config.purge.dry_run;
        tracing::info!(interval_secs = interval.as_secs(), dry_run, "purge scheduler started");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately; wait a full interval after startup.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match spawn_purge_job(&state, dry_run).await {
                Ok(job_id) => tracing::info!(job_id = %job_id, "scheduled purge job started"),
                Err(MetadataError::Constraint(_)) => {
                    tracing::debug!("purge job already active, skipping scheduled run");
                }
                Err(e) => tracing::error!(error = %e, "failed to start scheduled purge job"),
            }
        }
    })
}

/// Mark jobs left `queued` or `running` by a previous process as failed.
///
/// Returns how many jobs were recovered.
pub async fn recover_orphaned_purge_jobs(
    metadata: &Arc<dyn MetadataStore>,
) -> MetadataResult<usize> {
    let orphaned = metadata.get_active_purge_jobs().await?;
    if orphaned.is_empty() {
        return Ok(0);
    }

    tracing::warn!(
        count = orphaned.len(),
        "found purge jobs from a previous server instance, marking failed"
    );

    let stats_json = serde_json::to_string(&PurgeStats {
        errors: 1,
        ..PurgeStats::default()
    })
    .ok();
    for job in &orphaned {
        metadata
            .update_purge_job_state(
                job.purge_job_id,
                PurgeJobState::Failed,
                Some(OffsetDateTime::now_utc()),
                stats_json.as_deref(),
                Some("server restarted while job was active"),
            )
            .await?;
        tracing::warn!(job_id = %job.purge_job_id, state = %job.state, "marked orphaned purge job failed");
    }
    Ok(orphaned.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use fishlore_storage::FilesystemBackend;
    use time::Duration;

    async fn store_with_pending() -> (tempfile::TempDir, FilesystemBackend) {
        let temp = tempfile::tempdir().unwrap();
        let storage = FilesystemBackend::new(temp.path()).await.unwrap();
        storage
            .put(
                "pending/audio/1/4b1d3a8e-0f3c-4f3e-9a55-1c2b3d4e5f60.mp3",
                Bytes::from_static(b"abcd"),
            )
            .await
            .unwrap();
        storage
            .put(
                "pending/image/2/9c0e7f1a-2b3c-4d5e-8f90-a1b2c3d4e5f6.png",
                Bytes::from_static(b"123456"),
            )
            .await
            .unwrap();
        storage
            .put(
                "audio/1/4b1d3a8e-0f3c-4f3e-9a55-1c2b3d4e5f60.mp3",
                Bytes::from_static(b"permanent"),
            )
            .await
            .unwrap();
        (temp, storage)
    }

    #[tokio::test]
    async fn fresh_objects_are_kept() {
        let (_temp, storage) = store_with_pending().await;
        let stats = run_purge(
            Uuid::new_v4(),
            &storage,
            &PurgeConfig::default(),
            false,
            OffsetDateTime::now_utc(),
        )
        .await;

        assert_eq!(stats.scanned, 2);
        assert_eq!(stats.skipped_fresh, 2);
        assert_eq!(stats.deleted, 0);
    }

    #[tokio::test]
    async fn unrepresentable_ttl_keeps_everything() {
        let (_temp, storage) = store_with_pending().await;
        let config = PurgeConfig {
            pending_ttl_secs: i64::MAX as u64,
            ..PurgeConfig::default()
        };
        let stats = run_purge(
            Uuid::new_v4(),
            &storage,
            &config,
            false,
            OffsetDateTime::now_utc(),
        )
        .await;

        assert_eq!(stats.scanned, 2);
        assert_eq!(stats.skipped_fresh, 2);
        assert_eq!(stats.deleted, 0);
        assert_eq!(stats.errors, 0);
    }

    #[tokio::test]
    async fn stale_objects_are_deleted() {
        let (_temp, storage) = store_with_pending().await;
        let later = OffsetDateTime::now_utc() + Duration::days(2);
        let stats =
            run_purge(Uuid::new_v4(), &storage, &PurgeConfig::default(), false, later).await;

        assert_eq!(stats.deleted, 2);
        assert_eq!(stats.bytes_reclaimed, 10);
        assert_eq!(stats.errors, 0);
        assert!(
            !storage
                .exists("pending/audio/1/4b1d3a8e-0f3c-4f3e-9a55-1c2b3d4e5f60.mp3")
                .await
                .unwrap()
        );
        // Permanent objects are outside the sweep.
        assert!(
            storage
                .exists("audio/1/4b1d3a8e-0f3c-4f3e-9a55-1c2b3d4e5f60.mp3")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn dry_run_reports_without_deleting() {
        let (_temp, storage) = store_with_pending().await;
        let later = OffsetDateTime::now_utc() + Duration::days(2);
        let stats = run_purge(Uuid::new_v4(), &storage, &PurgeConfig::default(), true, later).await;

        assert_eq!(stats.deleted, 2);
        assert!(
            storage
                .exists("pending/image/2/9c0e7f1a-2b3c-4d5e-8f90-a1b2c3d4e5f6.png")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn max_objects_bounds_a_run() {
        let (_temp, storage) = store_with_pending().await;
        let config = PurgeConfig {
            max_objects: 1,
            ..PurgeConfig::default()
        };
        let later = OffsetDateTime::now_utc() + Duration::days(2);
        let stats = run_purge(Uuid::new_v4(), &storage, &config, false, later).await;

        assert_eq!(stats.scanned, 1);
        assert_eq!(stats.deleted, 1);
    }
}

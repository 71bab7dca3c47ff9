//! Purge job repository.

use crate::error::MetadataResult;
use crate::models::PurgeJobRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for pending-object purge jobs.
#[async_trait]
pub trait PurgeJobRepo: Send + Sync {
    /// Create a purge job.
    ///
    /// Returns `Constraint` when another job is already queued or running.
    async fn create_purge_job(&self, job: &PurgeJobRow) -> MetadataResult<()>;

    async fn get_purge_job(&self, job_id: Uuid) -> MetadataResult<Option<PurgeJobRow>>;

    /// Update a job's state, finish time, stats and error.
    async fn update_purge_job_state(
        &self,
        job_id: Uuid,
        state: PurgeJobState,
        finished_at: Option<OffsetDateTime>,
        stats_json: Option<&str>,
        error: Option<&str>,
    ) -> MetadataResult<()>;

    /// Most recent jobs, newest first.
    async fn get_recent_purge_jobs(&self, limit: u32) -> MetadataResult<Vec<PurgeJobRow>>;

    /// Jobs in `queued` or `running` state.
    ///
    /// At startup these were left behind by a previous process and need to be
    /// marked failed.
    async fn get_active_purge_jobs(&self) -> MetadataResult<Vec<PurgeJobRow>>;
}

/// Purge job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeJobState {
    Queued,
    Running,
    Finished,
    Failed,
}

impl PurgeJobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Queued | Self::Running)
    }
}

impl std::str::FromStr for PurgeJobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "finished" => Ok(Self::Finished),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown purge job state: {other}")),
        }
    }
}

/// Purge run statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PurgeStats {
    /// Pending objects listed.
    pub scanned: u64,
    /// Objects deleted, or that would be deleted in a dry run.
    pub deleted: u64,
    /// Bytes freed by deletions.
    pub bytes_reclaimed: u64,
    /// Objects younger than the TTL, or without a modification time.
    pub skipped_fresh: u64,
    pub errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_roundtrip() {
        for state in [
            PurgeJobState::Queued,
            PurgeJobState::Running,
            PurgeJobState::Finished,
            PurgeJobState::Failed,
        ] {
            assert_eq!(state.as_str().parse::<PurgeJobState>().unwrap(), state);
        }
        assert!("paused".parse::<PurgeJobState>().is_err());
        assert!(PurgeJobState::Running.is_active());
        assert!(!PurgeJobState::Failed.is_active());
    }

    #[test]
    fn test_stats_json_shape() {
        let stats = PurgeStats {
            scanned: 3,
            deleted: 1,
            bytes_reclaimed: 42,
            skipped_fresh: 2,
            errors: 0,
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["bytes_reclaimed"], 42);
        assert_eq!(json["skipped_fresh"], 2);
    }
}

//! Application state shared across handlers.

use crate::ratelimit::RateLimitState;
use fishlore_core::config::AppConfig;
use fishlore_metadata::MetadataStore;
use fishlore_metadata::repos::{PurgeJobRepo, PurgeJobState, PurgeStats};
use fishlore_signer::GrantSigner;
use fishlore_storage::ObjectStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// How often the watchdog looks at tracked purge tasks.
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(10);

/// Tracks spawned purge tasks so a panicked one does not stay `running`.
///
/// A panicking task never reaches its own state update, and the active-job
/// index would then block every later purge until restart. The watchdog
/// marks such jobs `failed`.
pub struct PurgeTaskRegistry {
    tasks: Mutex<HashMap<Uuid, JoinHandle<()>>>,
    metadata: Arc<dyn MetadataStore>,
}

impl PurgeTaskRegistry {
    pub fn new(metadata: Arc<dyn MetadataStore>) -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            metadata,
        }
    }

    /// Track a spawned purge task.
    pub async fn register(&self, job_id: Uuid, handle: JoinHandle<()>) {
        self.tasks.lock().await.insert(job_id, handle);
    }

    /// Number of tracked tasks that have not been reaped yet.
    pub async fn tracked(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Spawn the watchdog loop. Keep the handle alive for the server's lifetime.
    pub fn spawn_watchdog(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(WATCHDOG_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.check_tasks().await;
            }
        })
    }

    /// Reap finished tasks and fail the jobs of any that panicked.
    pub async fn check_tasks(&self) {
        // Take the finished handles out first so the lock is not held across awaits.
        let finished: Vec<(Uuid, JoinHandle<()>)> = {
            let mut tasks = self.tasks.lock().await;
            let done: Vec<Uuid> = tasks
                .iter()
                .filter(|(_, handle)| handle.is_finished())
                .map(|(job_id, _)| *job_id)
                .collect();
            done.into_iter()
                .filter_map(|job_id| tasks.remove(&job_id).map(|h| (job_id, h)))
                .collect()
        };

        for (job_id, handle) in finished {
            match handle.await {
                Ok(()) => {
                    tracing::debug!(job_id = %job_id, "purge task completed");
                }
                Err(join_err) => {
                    crate::metrics::PURGE_JOBS_ACTIVE.dec();
                    if join_err.is_panic() {
                        crate::metrics::PURGE_JOBS_PANICKED.inc();
                        tracing::error!(job_id = %job_id, "purge task panicked, marking job failed");
                    } else {
                        tracing::warn!(job_id = %job_id, "purge task was cancelled, marking job failed");
                    }
                    self.mark_failed(job_id, "purge task terminated abnormally")
                        .await;
                }
            }
        }
    }

    async fn mark_failed(&self, job_id: Uuid, reason: &str) {
        let stats = PurgeStats {
            errors: 1,
            ..PurgeStats::default()
        };
        let stats_json = serde_json::to_string(&stats).ok();
        if let Err(e) = self
            .metadata
            .update_purge_job_state(
                job_id,
                PurgeJobState::Failed,
                Some(time::OffsetDateTime::now_utc()),
                stats_json.as_deref(),
                Some(reason),
            )
            .await
        {
            tracing::error!(job_id = %job_id, error = %e, "failed to mark purge job failed");
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn ObjectStore>,
    pub metadata: Arc<dyn MetadataStore>,
    /// Signs grants for server-hosted upload targets.
    pub grant_signer: Arc<GrantSigner>,
    pub rate_limit: RateLimitState,
    pub purge_tasks: Arc<PurgeTaskRegistry>,
}

impl AppState {
    /// Build application state. The config is expected to have passed
    /// [`AppConfig::validate`].
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        grant_signer: GrantSigner,
        purge_tasks: Arc<PurgeTaskRegistry>,
    ) -> Self {
        let rate_limit = RateLimitState::new(&config.rate_limit);
        Self {
            config: Arc::new(config),
            storage,
            metadata,
            grant_signer: Arc::new(grant_signer),
            rate_limit,
            purge_tasks,
        }
    }

    /// Interval for the rate limiter cleanup task, or `None` when rate limiting is off.
    pub fn rate_limit_cleanup_interval(&self) -> Option<Duration> {
        if !self.rate_limit.is_enabled() {
            return None;
        }
        // tokio::time::interval panics on zero.
        let secs = self.config.rate_limit.cleanup_interval_secs.max(1);
        Some(Duration::from_secs(secs))
    }
}

//! Prometheus metrics for the fishlore server.
//!
//! Covers the upload workflow, search latency and purge jobs.
//!
//! The `/metrics` endpoint is unauthenticated so Prometheus can scrape it.
//! Metrics carry no catalog content, only aggregate counts, but the endpoint
//! should still be restricted to the scraper at the network level or turned
//! off with `server.metrics_enabled = false`.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::core::Collector;
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Upload workflow metrics
pub static UPLOADS_SIGNED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "fishlore_uploads_signed_total",
            "Total signed upload destinations issued, by media kind",
        ),
        &["kind"],
    )
    .expect("metric creation failed")
});

pub static UPLOADS_CONFIRMED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "fishlore_uploads_confirmed_total",
            "Total uploads confirmed into permanent storage, by media kind",
        ),
        &["kind"],
    )
    .expect("metric creation failed")
});

pub static UPLOADS_ALREADY_CONFIRMED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "fishlore_uploads_already_confirmed_total",
        "Total confirm retries answered from an existing media record",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_BYTES_RECEIVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "fishlore_upload_bytes_received_total",
        "Total bytes received through server-hosted upload targets",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "fishlore_upload_errors_total",
            "Total upload errors by error type",
        ),
        &["error_type"],
    )
    .expect("metric creation failed")
});

pub static CONFIRM_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "fishlore_upload_confirm_duration_seconds",
            "Time taken to confirm an upload",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
    )
    .expect("metric creation failed")
});

pub static MEDIA_DELETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "fishlore_media_deleted_total",
        "Total media records deleted",
    )
    .expect("metric creation failed")
});

// Catalog metrics
pub static SEARCH_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "fishlore_search_duration_seconds",
            "Time taken to run a fish search query",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
    )
    .expect("metric creation failed")
});

// Purge metrics
pub static PURGE_JOBS_ACTIVE: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "fishlore_purge_jobs_active",
        "Number of currently active purge jobs (queued + running)",
    )
    .expect("metric creation failed")
});

pub static PURGE_JOBS_PANICKED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "fishlore_purge_jobs_panicked_total",
        "Total number of purge jobs that panicked",
    )
    .expect("metric creation failed")
});

pub static PURGE_JOB_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "fishlore_purge_job_duration_seconds",
            "Purge job duration by final state",
        )
        .buckets(vec![0.1, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 600.0, 1800.0]),
        &["state"],
    )
    .expect("metric creation failed")
});

pub static PURGE_OBJECTS_DELETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "fishlore_purge_objects_deleted_total",
        "Total stale pending objects deleted by purge",
    )
    .expect("metric creation failed")
});

pub static PURGE_BYTES_RECLAIMED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "fishlore_purge_bytes_reclaimed_total",
        "Total bytes reclaimed by purge",
    )
    .expect("metric creation failed")
});

pub static STORAGE_LISTING_PAGES_FETCHED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "fishlore_storage_listing_pages_fetched_total",
            "Total listing pages fetched from storage, by backend",
        ),
        &["backend"],
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent, so integration tests can build many routers.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        let collectors: Vec<Box<dyn Collector>> = vec![
            Box::new(UPLOADS_SIGNED.clone()),
            Box::new(UPLOADS_CONFIRMED.clone()),
            Box::new(UPLOADS_ALREADY_CONFIRMED.clone()),
            Box::new(UPLOAD_BYTES_RECEIVED.clone()),
            Box::new(UPLOAD_ERRORS.clone()),
            Box::new(CONFIRM_DURATION.clone()),
            Box::new(MEDIA_DELETED.clone()),
            Box::new(SEARCH_DURATION.clone()),
            Box::new(PURGE_JOBS_ACTIVE.clone()),
            Box::new(PURGE_JOBS_PANICKED.clone()),
            Box::new(PURGE_JOB_DURATION.clone()),
            Box::new(PURGE_OBJECTS_DELETED.clone()),
            Box::new(PURGE_BYTES_RECLAIMED.clone()),
            Box::new(STORAGE_LISTING_PAGES_FETCHED.clone()),
        ];
        for collector in collectors {
            if let Err(e) = REGISTRY.register(collector) {
                tracing::error!(error = %e, "metric registration failed");
            }
        }
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Helper to record upload errors by type.
pub fn record_upload_error(error_type: &str) {
    UPLOAD_ERRORS.with_label_values(&[error_type]).inc();
}

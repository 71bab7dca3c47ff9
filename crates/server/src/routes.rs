//! Route configuration.

use crate::auth::auth_middleware;
use crate::handlers;
use crate::metrics::metrics_handler;
use crate::ratelimit::ip_rate_limit_middleware;
use crate::state::AppState;
use axum::Router;
use axum::middleware;
use axum::routing::{get, post, put};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/v1/auth/whoami", get(handlers::whoami))
        // Unauthenticated for load balancer and orchestrator probes.
        .route("/v1/health", get(handlers::health_check))
        // Catalog
        .route(
            "/v1/fish",
            get(handlers::search_fish).post(handlers::create_fish),
        )
        .route(
            "/v1/fish/{fish_id}",
            get(handlers::get_fish)
                .put(handlers::update_fish)
                .delete(handlers::delete_fish),
        )
        .route("/v1/fish/{fish_id}/restore", post(handlers::restore_fish))
        .route(
            "/v1/fish/{fish_id}/captures",
            get(handlers::list_captures).post(handlers::create_capture),
        )
        .route(
            "/v1/captures/{capture_id}",
            put(handlers::update_capture).delete(handlers::delete_capture),
        )
        .route(
            "/v1/fish/{fish_id}/classifications",
            get(handlers::list_classifications).post(handlers::create_classification),
        )
        .route(
            "/v1/classifications/{classification_id}",
            put(handlers::update_classification).delete(handlers::delete_classification),
        )
        .route("/v1/facets", get(handlers::get_facets))
        // Media workflow
        .route("/v1/fish/{fish_id}/media", get(handlers::list_media))
        .route(
            "/v1/fish/{fish_id}/media/{kind}/sign",
            post(handlers::sign_upload),
        )
        .route(
            "/v1/fish/{fish_id}/media/{kind}/confirm",
            post(handlers::confirm_upload),
        )
        .route(
            "/v1/media/{media_id}",
            get(handlers::get_media).delete(handlers::delete_media),
        )
        // Server-hosted upload target; the grant in the path is the credential.
        .route("/v1/uploads/{grant}", put(handlers::put_upload))
        .route("/media/{*key}", get(handlers::serve_media))
        // Admin endpoints (all require CatalogAdmin scope)
        .route(
            "/v1/admin/tokens",
            post(handlers::create_token).get(handlers::list_tokens),
        )
        .route(
            "/v1/admin/tokens/{token_id}",
            axum::routing::delete(handlers::revoke_token),
        )
        .route(
            "/v1/admin/purge",
            get(handlers::list_purge_jobs).post(handlers::trigger_purge),
        )
        .route("/v1/admin/purge/{job_id}", get(handlers::get_purge_job))
        .route("/v1/admin/audit/media", get(handlers::audit_media));

    let mut router = api_routes;

    // When enabled, /metrics must be network-restricted to the scraper.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    let rate_limit_state = state.rate_limit.clone();

    // Layers run outermost first: TraceLayer -> IP rate limit -> Auth -> Handler
    router
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        // Runs before auth, so unauthenticated abuse is limited too.
        .layer(middleware::from_fn_with_state(
            rate_limit_state,
            ip_rate_limit_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

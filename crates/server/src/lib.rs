//! HTTP API server for the fishlore catalog.
//!
//! This crate provides:
//! - Catalog endpoints for fish, capture records and tribal classifications
//! - Keyset-paginated search and facet lookups
//! - The media upload workflow (sign, upload target, confirm, serve)
//! - Purge of stale pending uploads, scheduled and on demand
//! - Admin endpoints (tokens, purge jobs, media audit)

pub mod auth;
pub mod bootstrap;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod purge;
pub mod ratelimit;
pub mod routes;
pub mod state;

pub use auth::TraceId;
pub use error::ApiError;
pub use ratelimit::RateLimitState;
pub use routes::create_router;
pub use state::{AppState, PurgeTaskRegistry};

//! Shared handler helpers.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::Request;
use axum::http::header::CONTENT_LENGTH;
use fishlore_core::catalog::FishId;
use fishlore_metadata::models::FishRow;
use fishlore_metadata::repos::FishRepo;
use serde::de::DeserializeOwned;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Read and parse a JSON request body, capped at `server.max_body_bytes`.
pub async fn read_json<T: DeserializeOwned>(state: &AppState, req: Request) -> ApiResult<T> {
    let limit = state.config.server.max_body_bytes;
    check_content_length(&req, limit as u64)?;

    let bytes = axum::body::to_bytes(req.into_body(), limit)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))
}

/// Like [`read_json`], but an empty body yields `T::default()`.
pub async fn read_optional_json<T: DeserializeOwned + Default>(
    state: &AppState,
    req: Request,
) -> ApiResult<T> {
    let limit = state.config.server.max_body_bytes;
    check_content_length(&req, limit as u64)?;

    let bytes = axum::body::to_bytes(req.into_body(), limit)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(&bytes).map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))
}

/// Reject a declared `Content-Length` above `limit` before reading the body.
pub fn check_content_length(req: &Request, limit: u64) -> ApiResult<()> {
    let declared = req
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    match declared {
        Some(len) if len > limit => Err(ApiError::PayloadTooLarge(format!(
            "body of {len} bytes exceeds limit of {limit} bytes"
        ))),
        _ => Ok(()),
    }
}

pub fn format_timestamp(ts: OffsetDateTime, field: &str) -> ApiResult<String> {
    ts.format(&Rfc3339)
        .map_err(|e| ApiError::Internal(format!("failed to format {field}: {e}")))
}

pub fn format_optional_timestamp(
    ts: Option<OffsetDateTime>,
    field: &str,
) -> ApiResult<Option<String>> {
    ts.map(|t| format_timestamp(t, field)).transpose()
}

/// Parse an integer id path segment.
pub fn parse_path_id<T>(raw: &str, what: &str) -> ApiResult<T>
where
    T: std::str::FromStr<Err = fishlore_core::Error>,
{
    raw.parse::<T>()
        .map_err(|_| ApiError::BadRequest(format!("invalid {what} id: {raw}")))
}

/// Stored ids are always positive; anything else means a corrupt row.
pub fn fish_id_of(id: i64) -> ApiResult<FishId> {
    FishId::new(id).map_err(|e| ApiError::Internal(format!("invalid stored fish id {id}: {e}")))
}

/// Load a fish that is not soft-deleted, or 404.
pub async fn require_live_fish(state: &AppState, id: FishId) -> ApiResult<FishRow> {
    state
        .metadata
        .get_fish(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("fish not found: {id}")))
}

/// Public URL of a permanent media object.
///
/// Uses the storage backend's public URL when one is configured, else the
/// server's own streaming route.
pub fn media_url(state: &AppState, object_key: &str) -> String {
    state
        .storage
        .public_url(object_key)
        .unwrap_or_else(|| format!("{}/media/{object_key}", state.config.server.base_url()))
}

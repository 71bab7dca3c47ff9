//! Capture record endpoints.

use crate::auth::require_scope;
use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{
    fish_id_of, format_timestamp, parse_path_id, read_json, require_live_fish,
};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use fishlore_core::catalog::{CaptureId, CaptureInput, FishId, format_date};
use fishlore_core::token::TokenScope;
use fishlore_metadata::models::CaptureRow;
use fishlore_metadata::repos::CaptureRepo;
use serde::Serialize;
use time::OffsetDateTime;

/// A capture event.
#[derive(Debug, Serialize)]
pub struct CaptureResponse {
    pub id: i64,
    pub fish_id: FishId,
    pub tribe: String,
    pub location: String,
    pub method: String,
    /// `YYYY-MM-DD`.
    pub captured_on: Option<String>,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl CaptureResponse {
    pub fn from_row(row: CaptureRow) -> ApiResult<Self> {
        Ok(Self {
            id: row.id,
            fish_id: fish_id_of(row.fish_id)?,
            captured_on: row.captured_on.map(format_date),
            created_at: format_timestamp(row.created_at, "created_at")?,
            updated_at: format_timestamp(row.updated_at, "updated_at")?,
            tribe: row.tribe,
            location: row.location,
            method: row.method,
            notes: row.notes,
        })
    }
}

/// Load a capture whose fish is live.
async fn load_capture(state: &AppState, id: CaptureId) -> ApiResult<CaptureRow> {
    let capture = state
        .metadata
        .get_capture(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("capture not found: {id}")))?;
    require_live_fish(state, fish_id_of(capture.fish_id)?).await?;
    Ok(capture)
}

/// GET /v1/fish/{fish_id}/captures - List a fish's captures.
pub async fn list_captures(
    State(state): State<AppState>,
    Path(fish_id): Path<String>,
) -> ApiResult<Json<Vec<CaptureResponse>>> {
    let fish_id: FishId = parse_path_id(&fish_id, "fish")?;
    require_live_fish(&state, fish_id).await?;

    let captures = state
        .metadata
        .list_captures(fish_id)
        .await?
        .into_iter()
        .map(CaptureResponse::from_row)
        .collect::<ApiResult<Vec<_>>>()?;
    Ok(Json(captures))
}

/// POST /v1/fish/{fish_id}/captures - Record a capture.
pub async fn create_capture(
    State(state): State<AppState>,
    Path(fish_id): Path<String>,
    req: Request,
) -> ApiResult<(StatusCode, Json<CaptureResponse>)> {
    let token_id = require_scope(&req, TokenScope::CatalogWrite)?.token.id;
    let fish_id: FishId = parse_path_id(&fish_id, "fish")?;
    let input: CaptureInput = read_json(&state, req).await?;
    let draft = input.validate()?;

    require_live_fish(&state, fish_id).await?;
    let row = state
        .metadata
        .create_capture(fish_id, &draft, OffsetDateTime::now_utc())
        .await?;
    tracing::info!(capture_id = row.id, fish_id = %fish_id, token_id = %token_id, "capture recorded");

    Ok((StatusCode::CREATED, Json(CaptureResponse::from_row(row)?)))
}

/// PUT /v1/captures/{capture_id} - Replace a capture's fields.
pub async fn update_capture(
    State(state): State<AppState>,
    Path(capture_id): Path<String>,
    req: Request,
) -> ApiResult<Json<CaptureResponse>> {
    let token_id = require_scope(&req, TokenScope::CatalogWrite)?.token.id;
    let capture_id: CaptureId = parse_path_id(&capture_id, "capture")?;
    let input: CaptureInput = read_json(&state, req).await?;
    let draft = input.validate()?;

    load_capture(&state, capture_id).await?;
    let row = state
        .metadata
        .update_capture(capture_id, &draft, OffsetDateTime::now_utc())
        .await?;
    tracing::info!(capture_id = row.id, token_id = %token_id, "capture updated");

    Ok(Json(CaptureResponse::from_row(row)?))
}

/// DELETE /v1/captures/{capture_id} - Delete a capture.
pub async fn delete_capture(
    State(state): State<AppState>,
    Path(capture_id): Path<String>,
    req: Request,
) -> ApiResult<StatusCode> {
    let token_id = require_scope(&req, TokenScope::CatalogWrite)?.token.id;
    let capture_id: CaptureId = parse_path_id(&capture_id, "capture")?;

    load_capture(&state, capture_id).await?;
    state.metadata.delete_capture(capture_id).await?;
    tracing::info!(capture_id = %capture_id, token_id = %token_id, "capture deleted");

    Ok(StatusCode::NO_CONTENT)
}

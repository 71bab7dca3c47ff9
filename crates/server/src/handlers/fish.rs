//! Fish endpoints: search, CRUD and soft delete.

use crate::auth::require_scope;
use crate::error::{ApiError, ApiResult};
use crate::handlers::captures::CaptureResponse;
use crate::handlers::classifications::ClassificationResponse;
use crate::handlers::common::{
    fish_id_of, format_optional_timestamp, format_timestamp, parse_path_id, read_json,
    require_live_fish,
};
use crate::handlers::media::MediaResponse;
use crate::metrics;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use fishlore_core::catalog::{FishId, FishInput};
use fishlore_core::search::{FishSearchPage, FishSearchRequest};
use fishlore_core::token::TokenScope;
use fishlore_metadata::models::FishRow;
use fishlore_metadata::repos::{
    CaptureRepo, ClassificationRepo, FacetRepo, Facets, FishRepo, MediaRepo,
};
use serde::Serialize;
use std::time::Instant;
use time::OffsetDateTime;

/// A fish record.
#[derive(Debug, Serialize)]
pub struct FishResponse {
    pub id: FishId,
    pub name: String,
    pub scientific_name: Option<String>,
    pub common_name: Option<String>,
    pub description: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<String>,
}

impl FishResponse {
    pub fn from_row(row: FishRow) -> ApiResult<Self> {
        Ok(Self {
            id: fish_id_of(row.id)?,
            created_at: format_timestamp(row.created_at, "created_at")?,
            updated_at: format_timestamp(row.updated_at, "updated_at")?,
            deleted_at: format_optional_timestamp(row.deleted_at, "deleted_at")?,
            name: row.name,
            scientific_name: row.scientific_name,
            common_name: row.common_name,
            description: row.description,
        })
    }
}

/// A fish with everything recorded about it.
#[derive(Debug, Serialize)]
pub struct FishDetailResponse {
    #[serde(flatten)]
    pub fish: FishResponse,
    pub captures: Vec<CaptureResponse>,
    pub classifications: Vec<ClassificationResponse>,
    pub media: Vec<MediaResponse>,
}

/// GET /v1/fish - Search live fish with keyset pagination.
pub async fn search_fish(
    State(state): State<AppState>,
    Query(request): Query<FishSearchRequest>,
) -> ApiResult<Json<FishSearchPage<FishResponse>>> {
    let params = request.normalize(&state.config.search.limits())?;

    let started = Instant::now();
    let rows = state.metadata.search_fish(&params).await?;
    metrics::SEARCH_DURATION.observe(started.elapsed().as_secs_f64());

    let items = rows
        .into_iter()
        .map(FishResponse::from_row)
        .collect::<ApiResult<Vec<_>>>()?;

    Ok(Json(FishSearchPage::from_lookahead(
        items,
        params.per_page,
        |fish| fish.id,
    )))
}

/// POST /v1/fish - Create a fish.
pub async fn create_fish(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<FishResponse>)> {
    let token_id = require_scope(&req, TokenScope::CatalogWrite)?.token.id;
    let input: FishInput = read_json(&state, req).await?;
    let draft = input.validate()?;

    let row = state
        .metadata
        .create_fish(&draft, OffsetDateTime::now_utc())
        .await?;
    tracing::info!(fish_id = row.id, token_id = %token_id, "fish created");

    Ok((StatusCode::CREATED, Json(FishResponse::from_row(row)?)))
}

/// GET /v1/fish/{fish_id} - Fish with captures, classifications and media.
pub async fn get_fish(
    State(state): State<AppState>,
    Path(fish_id): Path<String>,
) -> ApiResult<Json<FishDetailResponse>> {
    let fish_id: FishId = parse_path_id(&fish_id, "fish")?;
    let fish = require_live_fish(&state, fish_id).await?;

    let captures = state
        .metadata
        .list_captures(fish_id)
        .await?
        .into_iter()
        .map(CaptureResponse::from_row)
        .collect::<ApiResult<Vec<_>>>()?;
    let classifications = state
        .metadata
        .list_classifications(fish_id)
        .await?
        .into_iter()
        .map(ClassificationResponse::from_row)
        .collect::<ApiResult<Vec<_>>>()?;
    let media = state
        .metadata
        .list_media(fish_id)
        .await?
        .into_iter()
        .map(|row| MediaResponse::from_row(&state, row))
        .collect::<ApiResult<Vec<_>>>()?;

    Ok(Json(FishDetailResponse {
        fish: FishResponse::from_row(fish)?,
        captures,
        classifications,
        media,
    }))
}

/// PUT /v1/fish/{fish_id} - Replace a fish's fields.
pub async fn update_fish(
    State(state): State<AppState>,
    Path(fish_id): Path<String>,
    req: Request,
) -> ApiResult<Json<FishResponse>> {
    let token_id = require_scope(&req, TokenScope::CatalogWrite)?.token.id;
    let fish_id: FishId = parse_path_id(&fish_id, "fish")?;
    let input: FishInput = read_json(&state, req).await?;
    let draft = input.validate()?;

    let row = state
        .metadata
        .update_fish(fish_id, &draft, OffsetDateTime::now_utc())
        .await?;
    tracing::info!(fish_id = row.id, token_id = %token_id, "fish updated");

    Ok(Json(FishResponse::from_row(row)?))
}

/// DELETE /v1/fish/{fish_id} - Soft-delete a fish.
///
/// Captures, classifications and media stay in place and reappear on restore.
pub async fn delete_fish(
    State(state): State<AppState>,
    Path(fish_id): Path<String>,
    req: Request,
) -> ApiResult<StatusCode> {
    let token_id = require_scope(&req, TokenScope::CatalogWrite)?.token.id;
    let fish_id: FishId = parse_path_id(&fish_id, "fish")?;

    state
        .metadata
        .soft_delete_fish(fish_id, OffsetDateTime::now_utc())
        .await?;
    tracing::info!(fish_id = %fish_id, token_id = %token_id, "fish soft-deleted");

    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/fish/{fish_id}/restore - Undo a soft delete (admin).
pub async fn restore_fish(
    State(state): State<AppState>,
    Path(fish_id): Path<String>,
    req: Request,
) -> ApiResult<Json<FishResponse>> {
    let token_id = require_scope(&req, TokenScope::CatalogAdmin)?.token.id;
    let fish_id: FishId = parse_path_id(&fish_id, "fish")?;

    if state
        .metadata
        .get_fish_including_deleted(fish_id)
        .await?
        .is_none()
    {
        return Err(ApiError::NotFound(format!("fish not found: {fish_id}")));
    }

    let row = state
        .metadata
        .restore_fish(fish_id, OffsetDateTime::now_utc())
        .await?;
    tracing::info!(fish_id = %fish_id, token_id = %token_id, "fish restored");

    Ok(Json(FishResponse::from_row(row)?))
}

/// GET /v1/facets - Distinct filter values for the browse drop-downs.
pub async fn get_facets(State(state): State<AppState>) -> ApiResult<Json<Facets>> {
    Ok(Json(state.metadata.get_facets().await?))
}

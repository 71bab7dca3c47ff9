//! Tribal classification endpoints.

use crate::auth::require_scope;
use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{
    fish_id_of, format_timestamp, parse_path_id, read_json, require_live_fish,
};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use fishlore_core::catalog::{ClassificationId, ClassificationInput, FishId};
use fishlore_core::token::TokenScope;
use fishlore_metadata::models::ClassificationRow;
use fishlore_metadata::repos::ClassificationRepo;
use serde::Serialize;
use time::OffsetDateTime;

/// How one tribe names, categorizes and prepares a fish.
#[derive(Debug, Serialize)]
pub struct ClassificationResponse {
    pub id: i64,
    pub fish_id: FishId,
    pub tribe: String,
    pub local_name: Option<String>,
    pub category: String,
    pub processing_method: Option<String>,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ClassificationResponse {
    pub fn from_row(row: ClassificationRow) -> ApiResult<Self> {
        Ok(Self {
            id: row.id,
            fish_id: fish_id_of(row.fish_id)?,
            created_at: format_timestamp(row.created_at, "created_at")?,
            updated_at: format_timestamp(row.updated_at, "updated_at")?,
            tribe: row.tribe,
            local_name: row.local_name,
            category: row.category,
            processing_method: row.processing_method,
            notes: row.notes,
        })
    }
}

async fn load_classification(
    state: &AppState,
    id: ClassificationId,
) -> ApiResult<ClassificationRow> {
    let classification = state
        .metadata
        .get_classification(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("classification not found: {id}")))?;
    require_live_fish(state, fish_id_of(classification.fish_id)?).await?;
    Ok(classification)
}

/// GET /v1/fish/{fish_id}/classifications
pub async fn list_classifications(
    State(state): State<AppState>,
    Path(fish_id): Path<String>,
) -> ApiResult<Json<Vec<ClassificationResponse>>> {
    let fish_id: FishId = parse_path_id(&fish_id, "fish")?;
    require_live_fish(&state, fish_id).await?;

    let classifications = state
        .metadata
        .list_classifications(fish_id)
        .await?
        .into_iter()
        .map(ClassificationResponse::from_row)
        .collect::<ApiResult<Vec<_>>>()?;
    Ok(Json(classifications))
}

/// POST /v1/fish/{fish_id}/classifications
pub async fn create_classification(
    State(state): State<AppState>,
    Path(fish_id): Path<String>,
    req: Request,
) -> ApiResult<(StatusCode, Json<ClassificationResponse>)> {
    let token_id = require_scope(&req, TokenScope::CatalogWrite)?.token.id;
    let fish_id: FishId = parse_path_id(&fish_id, "fish")?;
    let input: ClassificationInput = read_json(&state, req).await?;
    let draft = input.validate()?;

    require_live_fish(&state, fish_id).await?;
    let row = state
        .metadata
        .create_classification(fish_id, &draft, OffsetDateTime::now_utc())
        .await?;
    tracing::info!(
        classification_id = row.id,
        fish_id = %fish_id,
        tribe = %row.tribe,
        token_id = %token_id,
        "classification recorded"
    );

    Ok((
        StatusCode::CREATED,
        Json(ClassificationResponse::from_row(row)?),
    ))
}

/// PUT /v1/classifications/{classification_id}
pub async fn update_classification(
    State(state): State<AppState>,
    Path(classification_id): Path<String>,
    req: Request,
) -> ApiResult<Json<ClassificationResponse>> {
    let token_id = require_scope(&req, TokenScope::CatalogWrite)?.token.id;
    let classification_id: ClassificationId =
        parse_path_id(&classification_id, "classification")?;
    let input: ClassificationInput = read_json(&state, req).await?;
    let draft = input.validate()?;

    load_classification(&state, classification_id).await?;
    let row = state
        .metadata
        .update_classification(classification_id, &draft, OffsetDateTime::now_utc())
        .await?;
    tracing::info!(classification_id = row.id, token_id = %token_id, "classification updated");

    Ok(Json(ClassificationResponse::from_row(row)?))
}

/// DELETE /v1/classifications/{classification_id}
pub async fn delete_classification(
    State(state): State<AppState>,
    Path(classification_id): Path<String>,
    req: Request,
) -> ApiResult<StatusCode> {
    let token_id = require_scope(&req, TokenScope::CatalogWrite)?.token.id;
    let classification_id: ClassificationId =
        parse_path_id(&classification_id, "classification")?;

    load_classification(&state, classification_id).await?;
    state
        .metadata
        .delete_classification(classification_id)
        .await?;
    tracing::info!(classification_id = %classification_id, token_id = %token_id, "classification deleted");

    Ok(StatusCode::NO_CONTENT)
}

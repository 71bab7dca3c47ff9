//! Media upload workflow: sign, confirm, list, delete and serve.
//!
//! A client first asks for a signed upload destination in the pending
//! namespace, PUTs the file there, then confirms. Confirm moves the object to
//! its permanent key and records the media row keyed by the pending key, so
//! retried confirms converge on one row and one object.

use crate::auth::require_scope;
use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{
    fish_id_of, format_timestamp, media_url, parse_path_id, read_json, require_live_fish,
};
use crate::metrics::{self, record_upload_error};
use crate::state::AppState;
use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use fishlore_core::catalog::{FishId, MediaId};
use fishlore_core::media::{MediaKey, MediaKind, content_type_essence};
use fishlore_core::token::TokenScope;
use fishlore_metadata::models::{MediaRow, NewMedia};
use fishlore_metadata::repos::MediaRepo;
use fishlore_signer::UploadGrant;
use fishlore_storage::{ObjectStore, StorageError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use time::OffsetDateTime;

/// Longest accepted original file name.
const MAX_FILE_NAME_LEN: usize = 255;

/// Longest accepted media title.
const MAX_TITLE_LEN: usize = 200;

/// Permanent keys embed a random UUID, so served objects never change.
const IMMUTABLE_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

/// A confirmed media file.
#[derive(Debug, Serialize)]
pub struct MediaResponse {
    pub id: i64,
    pub fish_id: FishId,
    pub kind: String,
    pub object_key: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub title: Option<String>,
    pub duration_ms: Option<i64>,
    pub url: String,
    pub created_at: String,
}

impl MediaResponse {
    pub fn from_row(state: &AppState, row: MediaRow) -> ApiResult<Self> {
        Ok(Self {
            id: row.id,
            fish_id: fish_id_of(row.fish_id)?,
            url: media_url(state, &row.object_key),
            created_at: format_timestamp(row.created_at, "created_at")?,
            kind: row.kind,
            object_key: row.object_key,
            content_type: row.content_type,
            size_bytes: row.size_bytes,
            title: row.title,
            duration_ms: row.duration_ms,
        })
    }
}

/// Sign upload request.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignUploadRequest {
    /// Original file name, for logs only. The stored key is generated.
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: u64,
}

/// Where and how to PUT the file.
#[derive(Debug, Serialize)]
pub struct SignUploadResponse {
    /// Pending key to pass back to confirm.
    pub object_key: String,
    pub upload_url: String,
    pub method: String,
    /// Headers the client must send with the PUT.
    pub headers: BTreeMap<String, String>,
    pub expires_at: String,
    pub max_bytes: u64,
}

/// Confirm upload request.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfirmUploadRequest {
    pub object_key: String,
    pub title: Option<String>,
    /// Playback length, audio only.
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ConfirmUploadResponse {
    #[serde(flatten)]
    pub media: MediaResponse,
    pub already_confirmed: bool,
}

fn parse_kind(kind: &str) -> ApiResult<MediaKind> {
    kind.parse::<MediaKind>()
        .map_err(|_| ApiError::BadRequest(format!("unknown media kind: {kind}")))
}

/// POST /v1/fish/{fish_id}/media/{kind}/sign - Issue a signed upload destination.
#[tracing::instrument(skip(state, req), fields(fish_id = %fish_id, kind = %kind))]
pub async fn sign_upload(
    State(state): State<AppState>,
    Path((fish_id, kind)): Path<(String, String)>,
    req: Request,
) -> ApiResult<Json<SignUploadResponse>> {
    let token_id = require_scope(&req, TokenScope::CatalogWrite)?.token.id;
    let fish_id: FishId = parse_path_id(&fish_id, "fish")?;
    let kind = parse_kind(&kind)?;
    let body: SignUploadRequest = read_json(&state, req).await?;

    let file_name = body.file_name.trim();
    if file_name.is_empty() || file_name.chars().count() > MAX_FILE_NAME_LEN {
        return Err(ApiError::BadRequest(format!(
            "file_name must be 1 to {MAX_FILE_NAME_LEN} characters"
        )));
    }

    require_live_fish(&state, fish_id).await?;

    let key = MediaKey::generate(kind, fish_id, &body.content_type).inspect_err(|_| {
        record_upload_error("unsupported_content_type");
    })?;

    let max_bytes = state.config.uploads.max_bytes(kind);
    if body.size_bytes == 0 {
        return Err(ApiError::BadRequest("size_bytes must be at least 1".to_string()));
    }
    if body.size_bytes > max_bytes {
        record_upload_error("too_large");
        return Err(ApiError::PayloadTooLarge(format!(
            "{kind} uploads are limited to {max_bytes} bytes"
        )));
    }

    // The client sends exactly this value, and S3 signs it into the URL.
    let content_type = content_type_essence(&body.content_type);
    let pending_key = key.pending_key();
    let ttl = state.config.uploads.signed_url_ttl();
    let expires_at = OffsetDateTime::now_utc() + ttl;

    let presigned = state
        .storage
        .presign_put(
            &pending_key,
            &content_type,
            std::time::Duration::from_secs(state.config.uploads.signed_url_ttl_secs),
        )
        .await?;

    let (upload_url, method, headers) = match presigned {
        Some(request) => (request.url, request.method, request.headers),
        None => {
            let grant = UploadGrant::new(&pending_key, &content_type, max_bytes, expires_at);
            let token = state.grant_signer.sign(&grant)?;
            (
                format!("{}/v1/uploads/{token}", state.config.server.base_url()),
                "PUT".to_string(),
                vec![("Content-Type".to_string(), content_type.clone())],
            )
        }
    };

    metrics::UPLOADS_SIGNED
        .with_label_values(&[kind.as_str()])
        .inc();
    tracing::info!(
        object_key = %pending_key,
        file_name = %file_name,
        size_bytes = body.size_bytes,
        token_id = %token_id,
        "upload signed"
    );

    Ok(Json(SignUploadResponse {
        object_key: pending_key,
        upload_url,
        method,
        headers: headers.into_iter().collect(),
        expires_at: format_timestamp(expires_at, "expires_at")?,
        max_bytes,
    }))
}

/// Move the pending object to its permanent key and return its size.
///
/// Succeeds when only the permanent object exists: a previous confirm moved
/// it and failed before recording the row.
async fn promote_pending(
    storage: &dyn ObjectStore,
    pending_key: &str,
    permanent_key: &str,
    max_bytes: u64,
) -> ApiResult<u64> {
    match storage.head(pending_key).await {
        Ok(meta) => {
            if meta.size > max_bytes {
                record_upload_error("too_large");
                if let Err(e) = storage.delete(pending_key).await {
                    tracing::warn!(key = %pending_key, error = %e, "failed to delete oversized upload");
                }
                return Err(ApiError::PayloadTooLarge(format!(
                    "uploaded object is {} bytes, limit is {max_bytes}",
                    meta.size
                )));
            }
            if meta.size == 0 {
                return Err(ApiError::BadRequest("uploaded object is empty".to_string()));
            }
            match storage.move_object(pending_key, permanent_key).await {
                Ok(()) => Ok(meta.size),
                // A concurrent confirm moved it first.
                Err(StorageError::NotFound(_)) => permanent_size(storage, permanent_key).await,
                Err(e) => Err(e.into()),
            }
        }
        Err(StorageError::NotFound(_)) => permanent_size(storage, permanent_key).await,
        Err(e) => Err(e.into()),
    }
}

async fn permanent_size(storage: &dyn ObjectStore, permanent_key: &str) -> ApiResult<u64> {
    match storage.head(permanent_key).await {
        Ok(meta) => Ok(meta.size),
        Err(StorageError::NotFound(_)) => {
            record_upload_error("upload_not_found");
            Err(ApiError::UploadNotFound(
                "no uploaded object for this key; upload the file before confirming".to_string(),
            ))
        }
        Err(e) => Err(e.into()),
    }
}

/// POST /v1/fish/{fish_id}/media/{kind}/confirm - Record an uploaded file.
#[tracing::instrument(skip(state, req), fields(fish_id = %fish_id, kind = %kind))]
pub async fn confirm_upload(
    State(state): State<AppState>,
    Path((fish_id, kind)): Path<(String, String)>,
    req: Request,
) -> ApiResult<(StatusCode, Json<ConfirmUploadResponse>)> {
    let started = Instant::now();
    let token_id = require_scope(&req, TokenScope::CatalogWrite)?.token.id;
    let fish_id: FishId = parse_path_id(&fish_id, "fish")?;
    let kind = parse_kind(&kind)?;
    let body: ConfirmUploadRequest = read_json(&state, req).await?;

    let key = MediaKey::parse_pending(&body.object_key)?;
    if key.kind != kind || key.fish_id != fish_id {
        return Err(ApiError::BadRequest(
            "object_key does not belong to this fish and media kind".to_string(),
        ));
    }

    let title = match body.title.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(t) if t.chars().count() > MAX_TITLE_LEN => {
            return Err(ApiError::BadRequest(format!(
                "title must be at most {MAX_TITLE_LEN} characters"
            )));
        }
        Some(t) => Some(t.to_string()),
    };
    let duration_ms = match (kind, body.duration_ms) {
        (MediaKind::Image, Some(_)) => {
            return Err(ApiError::BadRequest(
                "duration_ms only applies to audio".to_string(),
            ));
        }
        (_, Some(ms)) => Some(
            i64::try_from(ms)
                .map_err(|_| ApiError::BadRequest(format!("duration_ms too large: {ms}")))?,
        ),
        (_, None) => None,
    };

    let pending_key = key.pending_key();
    if let Some(existing) = state
        .metadata
        .get_media_by_pending_key(&pending_key)
        .await?
    {
        metrics::UPLOADS_ALREADY_CONFIRMED.inc();
        tracing::debug!(media_id = existing.id, "upload already confirmed");
        return Ok((
            StatusCode::OK,
            Json(ConfirmUploadResponse {
                media: MediaResponse::from_row(&state, existing)?,
                already_confirmed: true,
            }),
        ));
    }

    require_live_fish(&state, fish_id).await?;

    let permanent_key = key.permanent_key();
    let size = promote_pending(
        state.storage.as_ref(),
        &pending_key,
        &permanent_key,
        state.config.uploads.max_bytes(kind),
    )
    .await?;

    let media = NewMedia {
        fish_id: fish_id.get(),
        kind: kind.as_str().to_string(),
        pending_key,
        object_key: permanent_key,
        content_type: key.content_type().to_string(),
        size_bytes: i64::try_from(size)
            .map_err(|_| ApiError::Internal(format!("object size out of range: {size}")))?,
        title,
        duration_ms,
        created_at: OffsetDateTime::now_utc(),
    };
    let (row, created) = state.metadata.record_media(&media).await?;

    if created {
        metrics::UPLOADS_CONFIRMED
            .with_label_values(&[kind.as_str()])
            .inc();
        tracing::info!(media_id = row.id, object_key = %row.object_key, size, token_id = %token_id, "upload confirmed");
    } else {
        metrics::UPLOADS_ALREADY_CONFIRMED.inc();
    }
    metrics::CONFIRM_DURATION.observe(started.elapsed().as_secs_f64());

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(ConfirmUploadResponse {
            media: MediaResponse::from_row(&state, row)?,
            already_confirmed: !created,
        }),
    ))
}

/// GET /v1/fish/{fish_id}/media - List a fish's media.
pub async fn list_media(
    State(state): State<AppState>,
    Path(fish_id): Path<String>,
) -> ApiResult<Json<Vec<MediaResponse>>> {
    let fish_id: FishId = parse_path_id(&fish_id, "fish")?;
    require_live_fish(&state, fish_id).await?;

    let media = state
        .metadata
        .list_media(fish_id)
        .await?
        .into_iter()
        .map(|row| MediaResponse::from_row(&state, row))
        .collect::<ApiResult<Vec<_>>>()?;
    Ok(Json(media))
}

/// GET /v1/media/{media_id}
pub async fn get_media(
    State(state): State<AppState>,
    Path(media_id): Path<String>,
) -> ApiResult<Json<MediaResponse>> {
    let media_id: MediaId = parse_path_id(&media_id, "media")?;
    let row = state
        .metadata
        .get_media(media_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("media not found: {media_id}")))?;
    Ok(Json(MediaResponse::from_row(&state, row)?))
}

/// DELETE /v1/media/{media_id} - Delete a media row and its object.
pub async fn delete_media(
    State(state): State<AppState>,
    Path(media_id): Path<String>,
    req: Request,
) -> ApiResult<StatusCode> {
    let token_id = require_scope(&req, TokenScope::CatalogWrite)?.token.id;
    let media_id: MediaId = parse_path_id(&media_id, "media")?;

    let row = state.metadata.delete_media(media_id).await?;
    metrics::MEDIA_DELETED.inc();

    // The row is gone either way; a leftover object only costs space.
    match state.storage.delete(&row.object_key).await {
        Ok(()) | Err(StorageError::NotFound(_)) => {}
        Err(e) => {
            tracing::error!(
                media_id = %media_id,
                object_key = %row.object_key,
                error = %e,
                "failed to delete media object"
            );
        }
    }
    tracing::info!(media_id = %media_id, object_key = %row.object_key, token_id = %token_id, "media deleted");

    Ok(StatusCode::NO_CONTENT)
}

/// GET /media/{*key} - Stream a permanent media object.
pub async fn serve_media(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Response> {
    // Only permanent keys are served; pending uploads stay private.
    let media_key = MediaKey::parse_permanent(&key)
        .map_err(|_| ApiError::NotFound("media not found".to_string()))?;
    let object_key = media_key.permanent_key();

    let meta = state.storage.head(&object_key).await.map_err(|e| match e {
        StorageError::NotFound(_) => ApiError::NotFound("media not found".to_string()),
        other => other.into(),
    })?;
    let stream = state.storage.get_stream(&object_key).await?;

    let mut response = Body::from_stream(stream).into_response();
    let headers = response.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static(media_key.content_type()),
    );
    headers.insert(CONTENT_LENGTH, HeaderValue::from(meta.size));
    headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_static(IMMUTABLE_CACHE_CONTROL),
    );
    Ok(response)
}

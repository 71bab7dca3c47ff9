//! Administrative endpoints.

use crate::auth::{hash_token, require_scope};
use crate::error::{ApiError, ApiResult};
use crate::handlers::common::{
    format_optional_timestamp, format_timestamp, read_json, read_optional_json,
};
use crate::purge::spawn_purge_job;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use fishlore_core::token::{CreateTokenRequest, CreateTokenResponse, TokenScope, parse_scopes};
use fishlore_metadata::MetadataError;
use fishlore_metadata::models::{PurgeJobRow, TokenRow};
use fishlore_metadata::repos::{MediaRepo, PurgeJobRepo, PurgeStats, TokenRepo};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Longest accepted token description.
const MAX_DESCRIPTION_LEN: usize = 200;

/// Media rows checked per metadata query during an audit.
const AUDIT_BATCH_SIZE: u32 = 500;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /v1/health - Health check.
///
/// Unauthenticated, for load balancer and orchestrator probes. Returns only
/// status and version.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    state.metadata.health_check().await?;

    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    }))
}

// =============================================================================
// Tokens
// =============================================================================

/// Token listing response. Secrets and hashes are never returned.
#[derive(Debug, Serialize)]
pub struct TokenInfo {
    pub token_id: String,
    pub scopes: Vec<String>,
    pub expires_at: Option<String>,
    pub revoked_at: Option<String>,
    pub created_at: String,
    pub last_used_at: Option<String>,
    pub description: Option<String>,
}

impl TokenInfo {
    fn from_row(token: TokenRow) -> ApiResult<Self> {
        let scopes: Vec<String> = serde_json::from_str(&token.scopes)
            .map_err(|e| ApiError::Internal(format!("invalid token scopes: {e}")))?;
        Ok(Self {
            token_id: token.token_id.to_string(),
            scopes,
            expires_at: format_optional_timestamp(token.expires_at, "expires_at")?,
            revoked_at: format_optional_timestamp(token.revoked_at, "revoked_at")?,
            created_at: format_timestamp(token.created_at, "created_at")?,
            last_used_at: format_optional_timestamp(token.last_used_at, "last_used_at")?,
            description: token.description,
        })
    }
}

/// Generate a random token secret using cryptographically secure RNG.
fn generate_token_secret() -> String {
    use base64::Engine;
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// POST /v1/admin/tokens - Create a token. The secret is only returned here.
pub async fn create_token(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<CreateTokenResponse>)> {
    let admin_id = require_scope(&req, TokenScope::CatalogAdmin)?.token.id;
    let body: CreateTokenRequest = read_json(&state, req).await?;

    if body.scopes.is_empty() {
        return Err(ApiError::BadRequest("scopes cannot be empty".to_string()));
    }
    // Rejects unknown scopes.
    parse_scopes(&body.scopes)?;

    let description = match body.description.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(d) if d.chars().count() > MAX_DESCRIPTION_LEN => {
            return Err(ApiError::BadRequest(format!(
                "description must be at most {MAX_DESCRIPTION_LEN} characters"
            )));
        }
        Some(d) => Some(d.to_string()),
    };

    let now = OffsetDateTime::now_utc();
    let expires_at = match body.expires_in {
        Some(0) => {
            return Err(ApiError::BadRequest(
                "expires_in must be at least 1 second".to_string(),
            ));
        }
        Some(secs) => {
            let secs_i64: i64 = secs
                .try_into()
                .map_err(|_| ApiError::BadRequest(format!("expires_in too large: {secs}")))?;
            let expires_at = now
                .checked_add(time::Duration::seconds(secs_i64))
                .ok_or_else(|| ApiError::BadRequest(format!("expires_in too large: {secs}")))?;
            Some(expires_at)
        }
        None => None,
    };

    let token_secret = generate_token_secret();
    let token_row = TokenRow {
        token_id: Uuid::new_v4(),
        token_hash: hash_token(&token_secret),
        scopes: serde_json::to_string(&body.scopes)
            .map_err(|e| ApiError::Internal(format!("failed to serialize scopes: {e}")))?,
        expires_at,
        revoked_at: None,
        created_at: now,
        last_used_at: None,
        description,
    };
    state.metadata.create_token(&token_row).await?;
    tracing::info!(
        token_id = %token_row.token_id,
        scopes = ?body.scopes,
        admin_token_id = %admin_id,
        "token created"
    );

    Ok((
        StatusCode::CREATED,
        Json(CreateTokenResponse {
            token_id: token_row.token_id.to_string(),
            token_secret,
            scopes: body.scopes,
            expires_at: format_optional_timestamp(expires_at, "expires_at")?,
        }),
    ))
}

/// GET /v1/admin/tokens - List tokens.
pub async fn list_tokens(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<Vec<TokenInfo>>> {
    require_scope(&req, TokenScope::CatalogAdmin)?;

    let tokens = state
        .metadata
        .list_tokens()
        .await?
        .into_iter()
        .map(TokenInfo::from_row)
        .collect::<ApiResult<Vec<_>>>()?;
    Ok(Json(tokens))
}

/// DELETE /v1/admin/tokens/{token_id} - Revoke a token.
pub async fn revoke_token(
    State(state): State<AppState>,
    Path(token_id): Path<String>,
    req: Request,
) -> ApiResult<StatusCode> {
    let admin_id = require_scope(&req, TokenScope::CatalogAdmin)?.token.id;

    let token_id = Uuid::parse_str(&token_id)
        .map_err(|e| ApiError::BadRequest(format!("invalid token ID: {e}")))?;

    state
        .metadata
        .revoke_token(token_id, OffsetDateTime::now_utc())
        .await?;
    tracing::info!(token_id = %token_id, admin_token_id = %admin_id, "token revoked");

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Purge
// =============================================================================

/// Trigger purge request. The body is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerPurgeRequest {
    /// Defaults to `purge.dry_run` from the config.
    pub dry_run: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct TriggerPurgeResponse {
    pub job_id: String,
    pub dry_run: bool,
}

#[derive(Debug, Serialize)]
pub struct PurgeJobResponse {
    pub job_id: String,
    pub state: String,
    pub dry_run: bool,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub stats: Option<PurgeStats>,
    pub error: Option<String>,
}

impl PurgeJobResponse {
    fn from_row(job: PurgeJobRow) -> ApiResult<Self> {
        let stats: Option<PurgeStats> = job
            .stats_json
            .as_ref()
            .and_then(|s| serde_json::from_str(s).ok());
        Ok(Self {
            job_id: job.purge_job_id.to_string(),
            started_at: format_optional_timestamp(job.started_at, "started_at")?,
            finished_at: format_optional_timestamp(job.finished_at, "finished_at")?,
            state: job.state,
            dry_run: job.dry_run,
            stats,
            error: job.error,
        })
    }
}

/// POST /v1/admin/purge - Start a purge of stale pending uploads.
pub async fn trigger_purge(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<TriggerPurgeResponse>)> {
    let admin_id = require_scope(&req, TokenScope::CatalogAdmin)?.token.id;
    let body: TriggerPurgeRequest = read_optional_json(&state, req).await?;
    let dry_run = body.dry_run.unwrap_or(state.config.purge.dry_run);

    let job_id = spawn_purge_job(&state, dry_run).await.map_err(|e| match e {
        MetadataError::Constraint(_) => {
            ApiError::Conflict("a purge job is already queued or running".to_string())
        }
        other => other.into(),
    })?;
    tracing::info!(job_id = %job_id, dry_run, admin_token_id = %admin_id, "purge job triggered");

    Ok((
        StatusCode::ACCEPTED,
        Json(TriggerPurgeResponse {
            job_id: job_id.to_string(),
            dry_run,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ListPurgeJobsParams {
    pub limit: Option<u32>,
}

/// GET /v1/admin/purge - List recent purge jobs, newest first.
pub async fn list_purge_jobs(
    State(state): State<AppState>,
    Query(params): Query<ListPurgeJobsParams>,
    req: Request,
) -> ApiResult<Json<Vec<PurgeJobResponse>>> {
    require_scope(&req, TokenScope::CatalogAdmin)?;

    let limit = params.limit.unwrap_or(20).clamp(1, 100);
    let jobs = state
        .metadata
        .get_recent_purge_jobs(limit)
        .await?
        .into_iter()
        .map(PurgeJobResponse::from_row)
        .collect::<ApiResult<Vec<_>>>()?;
    Ok(Json(jobs))
}

/// GET /v1/admin/purge/{job_id} - Get purge job status.
pub async fn get_purge_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    req: Request,
) -> ApiResult<Json<PurgeJobResponse>> {
    require_scope(&req, TokenScope::CatalogAdmin)?;

    let job_id = Uuid::parse_str(&job_id)
        .map_err(|e| ApiError::BadRequest(format!("invalid job ID: {e}")))?;
    let job = state
        .metadata
        .get_purge_job(job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("purge job not found".to_string()))?;

    Ok(Json(PurgeJobResponse::from_row(job)?))
}

// =============================================================================
// Audit
// =============================================================================

#[derive(Debug, Serialize)]
pub struct MissingMedia {
    pub media_id: i64,
    pub fish_id: i64,
    pub object_key: String,
}

#[derive(Debug, Serialize)]
pub struct MediaAuditResponse {
    /// Media rows examined.
    pub checked: u64,
    /// Rows whose permanent object does not exist.
    pub missing: Vec<MissingMedia>,
    /// Rows whose object could not be checked.
    pub errors: u64,
}

/// GET /v1/admin/audit/media - Check every media row's object exists.
pub async fn audit_media(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<MediaAuditResponse>> {
    require_scope(&req, TokenScope::CatalogAdmin)?;

    let mut report = MediaAuditResponse {
        checked: 0,
        missing: Vec::new(),
        errors: 0,
    };
    let mut after_id = 0;

    loop {
        let batch = state
            .metadata
            .list_media_after(after_id, AUDIT_BATCH_SIZE)
            .await?;
        let Some(last) = batch.last() else {
            break;
        };
        after_id = last.id;
        let done = batch.len() < AUDIT_BATCH_SIZE as usize;

        for row in batch {
            report.checked += 1;
            match state.storage.exists(&row.object_key).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!(media_id = row.id, object_key = %row.object_key, "media object missing");
                    report.missing.push(MissingMedia {
                        media_id: row.id,
                        fish_id: row.fish_id,
                        object_key: row.object_key,
                    });
                }
                Err(e) => {
                    tracing::warn!(media_id = row.id, object_key = %row.object_key, error = %e, "failed to check media object");
                    report.errors += 1;
                }
            }
        }

        if done {
            break;
        }
    }

    tracing::info!(
        checked = report.checked,
        missing = report.missing.len(),
        errors = report.errors,
        "media audit finished"
    );
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_secrets_are_unique_and_url_safe() {
        let a = generate_token_secret();
        let b = generate_token_secret();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(
            a.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }
}

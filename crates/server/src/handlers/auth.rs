//! Authentication-related endpoints.

use crate::auth::require_auth;
use crate::error::ApiResult;
use crate::handlers::common::format_optional_timestamp;
use axum::Json;
use axum::extract::Request;
use serde::Serialize;

/// Response for the authenticated caller.
#[derive(Debug, Serialize)]
pub struct WhoamiResponse {
    pub token_id: String,
    pub scopes: Vec<String>,
    pub expires_at: Option<String>,
    pub description: Option<String>,
}

/// GET /v1/auth/whoami - Return the calling token's identity and scopes.
pub async fn whoami(req: Request) -> ApiResult<Json<WhoamiResponse>> {
    let auth = require_auth(&req)?;
    let token = &auth.token;

    let mut scopes: Vec<String> = token
        .scopes
        .iter()
        .map(|s| s.as_str().to_string())
        .collect();
    scopes.sort();

    Ok(Json(WhoamiResponse {
        token_id: token.id.to_string(),
        scopes,
        expires_at: format_optional_timestamp(token.expires_at, "expires_at")?,
        description: token.description.clone(),
    }))
}

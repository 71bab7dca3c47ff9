//! Authentication and authorization middleware.
//!
//! Bearer tokens are optional at this layer: reads are anonymous, and
//! handlers that write call [`require_auth`] and then
//! [`AuthenticatedUser::require_scope`].

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use fishlore_core::token::{Token, TokenId, TokenScope};
use fishlore_metadata::models::TokenRow;
use fishlore_metadata::repos::TokenRepo;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use time::OffsetDateTime;
use tracing::Instrument;
use uuid::Uuid;

/// Header carrying the request trace id, in both directions.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Client trace ids are cut to this many characters.
const MAX_TRACE_ID_LEN: usize = 128;

/// Trace ID for request correlation.
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl TraceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Trace id from a client header, keeping printable ASCII only.
    pub fn from_client(value: &str) -> Self {
        let sanitized: String = value
            .chars()
            .take(MAX_TRACE_ID_LEN)
            .filter(|c| c.is_ascii_graphic())
            .collect();

        if sanitized.is_empty() {
            Self::new()
        } else {
            Self(sanitized)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Authenticated request extension.
#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    pub token: Token,
}

impl AuthenticatedUser {
    pub fn has_scope(&self, scope: TokenScope) -> bool {
        self.token.has_scope(scope)
    }

    /// Require a scope, returning 403 if the token lacks it.
    pub fn require_scope(&self, scope: TokenScope) -> ApiResult<()> {
        if self.has_scope(scope) {
            Ok(())
        } else {
            Err(ApiError::Forbidden(format!("missing required scope: {scope}")))
        }
    }
}

/// Bearer token from the Authorization header. The scheme is case-insensitive.
fn extract_bearer_token(req: &Request) -> Option<&str> {
    let value = req.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_at_checked(7)?;
    (scheme.eq_ignore_ascii_case("bearer ") && !token.trim().is_empty()).then(|| token.trim())
}

fn extract_or_generate_trace_id(req: &Request) -> TraceId {
    req.headers()
        .get(TRACE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(TraceId::from_client)
        .unwrap_or_default()
}

/// SHA-256 of a token secret, hex encoded. Only hashes are stored.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Build a domain token from its stored row. Unknown scopes are dropped.
pub(crate) fn token_from_row(row: TokenRow) -> ApiResult<Token> {
    let raw: Vec<String> = serde_json::from_str(&row.scopes)
        .map_err(|e| ApiError::Internal(format!("invalid token scopes: {e}")))?;

    let scopes: HashSet<TokenScope> = raw
        .iter()
        .filter_map(|s| match TokenScope::parse(s) {
            Ok(scope) => Some(scope),
            Err(_) => {
                tracing::warn!(token_id = %row.token_id, scope = %s, "ignoring unknown token scope");
                None
            }
        })
        .collect();

    Ok(Token {
        id: TokenId::from(row.token_id),
        scopes,
        expires_at: row.expires_at,
        revoked_at: row.revoked_at,
        created_at: row.created_at,
        description: row.description,
    })
}

/// Resolve the bearer token, attach the trace id and run the request in a span.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let trace_id = extract_or_generate_trace_id(&req);
    req.extensions_mut().insert(trace_id.clone());

    if let Some(secret) = extract_bearer_token(&req) {
        let row = state
            .metadata
            .get_token_by_hash(&hash_token(secret))
            .await?
            .ok_or_else(|| ApiError::Unauthorized("invalid token".to_string()))?;
        let token = token_from_row(row)?;
        let token_id = *token.id.as_uuid();

        if !token.is_valid() {
            return Err(ApiError::Unauthorized(
                "token expired or revoked".to_string(),
            ));
        }

        let metadata = state.metadata.clone();
        tokio::spawn(async move {
            if let Err(e) = metadata
                .touch_token(token_id, OffsetDateTime::now_utc())
                .await
            {
                tracing::debug!(token_id = %token_id, error = %e, "failed to record token use");
            }
        });

        req.extensions_mut().insert(AuthenticatedUser { token });
    }

    let span = tracing::info_span!("request", trace_id = %trace_id);
    let mut response = next.run(req).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(trace_id.as_str()) {
        response.headers_mut().insert(TRACE_ID_HEADER, value);
    }
    Ok(response)
}

/// Require authentication (token must be present).
pub fn require_auth(req: &Request) -> ApiResult<&AuthenticatedUser> {
    req.extensions()
        .get::<AuthenticatedUser>()
        .ok_or_else(|| ApiError::Unauthorized("authentication required".to_string()))
}

/// Require a token carrying `scope`.
pub fn require_scope(req: &Request, scope: TokenScope) -> ApiResult<&AuthenticatedUser> {
    let auth = require_auth(req)?;
    auth.require_scope(scope)?;
    Ok(auth)
}

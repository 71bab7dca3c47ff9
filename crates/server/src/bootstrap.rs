//! Bootstrap admin token.

use anyhow::{Result, bail};
use fishlore_core::config::AdminConfig;
use fishlore_core::token::TokenScope;
use fishlore_metadata::MetadataStore;
use fishlore_metadata::models::TokenRow;
use fishlore_metadata::repos::{BootstrapRepo, TokenRepo};
use time::OffsetDateTime;
use uuid::Uuid;

/// Ensure the configured admin token exists.
///
/// When the configured hash changes between restarts, the token created for
/// the previous hash is revoked and a new one is created.
pub async fn ensure_admin_token(metadata: &dyn MetadataStore, config: &AdminConfig) -> Result<()> {
    // Stored hashes are lowercase hex.
    let hash = config
        .token_hash
        .strip_prefix("sha256:")
        .unwrap_or(&config.token_hash)
        .to_ascii_lowercase();
    if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        bail!("invalid admin token_hash: expected 64 hex chars");
    }

    let now = OffsetDateTime::now_utc();

    if let Some(existing) = metadata.get_token_by_hash(&hash).await? {
        if existing.revoked_at.is_some() {
            bail!(
                "admin token hash matches a revoked token (id={}); configure a new token",
                existing.token_id
            );
        }
        if let Some(expires_at) = existing.expires_at
            && expires_at <= now
        {
            bail!(
                "admin token hash matches an expired token (id={}, expired={expires_at}); \
                 configure a new token",
                existing.token_id
            );
        }
        metadata.set_bootstrap_token_id(existing.token_id).await?;
        tracing::debug!(token_id = %existing.token_id, "admin token already present");
        return Ok(());
    }

    let scopes = config
        .token_scopes
        .clone()
        .unwrap_or_else(|| vec![TokenScope::CatalogAdmin.as_str().to_string()]);
    if scopes.is_empty() {
        bail!("admin token_scopes cannot be empty");
    }
    for scope in &scopes {
        TokenScope::parse(scope).map_err(|_| anyhow::anyhow!("invalid admin scope: {scope}"))?;
    }

    if let Some(previous) = metadata.get_bootstrap_token_id().await? {
        match metadata.revoke_token(previous, now).await {
            Ok(()) => tracing::info!(token_id = %previous, "previous admin token revoked"),
            Err(fishlore_metadata::MetadataError::NotFound(_)) => {
                tracing::warn!(token_id = %previous, "previous admin token no longer exists");
            }
            Err(e) => return Err(e.into()),
        }
    }

    let token = TokenRow {
        token_id: Uuid::new_v4(),
        token_hash: hash,
        scopes: serde_json::to_string(&scopes)?,
        expires_at: None,
        revoked_at: None,
        created_at: now,
        last_used_at: None,
        description: config.token_description.clone(),
    };

    metadata.create_token(&token).await?;
    metadata.set_bootstrap_token_id(token.token_id).await?;
    tracing::info!(token_id = %token.token_id, "admin token created");

    Ok(())
}

//! Token types and authorization.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Public identifier of an API token; never the secret.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenId(Uuid);

impl TokenId {
    /// Generate a new random token ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::InvalidToken(format!("invalid token ID: {e}")))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for TokenId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl Default for TokenId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenId({})", self.0)
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Token scopes for authorization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenScope {
    /// Read access. Catalog reads are also open to anonymous callers.
    #[serde(rename = "catalog:read")]
    CatalogRead,
    /// Create and edit records, upload media.
    #[serde(rename = "catalog:write")]
    CatalogWrite,
    /// Tokens, purge, restore and audit.
    #[serde(rename = "catalog:admin")]
    CatalogAdmin,
}

impl TokenScope {
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "catalog:read" => Ok(Self::CatalogRead),
            "catalog:write" => Ok(Self::CatalogWrite),
            "catalog:admin" => Ok(Self::CatalogAdmin),
            _ => Err(crate::Error::InvalidToken(format!("unknown scope: {s}"))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CatalogRead => "catalog:read",
            Self::CatalogWrite => "catalog:write",
            Self::CatalogAdmin => "catalog:admin",
        }
    }

    /// Admin implies write, write implies read.
    pub fn implies(&self, other: &Self) -> bool {
        match self {
            Self::CatalogAdmin => true,
            Self::CatalogWrite => matches!(other, Self::CatalogWrite | Self::CatalogRead),
            Self::CatalogRead => matches!(other, Self::CatalogRead),
        }
    }
}

impl fmt::Display for TokenScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A validated token with its metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Token {
    pub id: TokenId,
    pub scopes: HashSet<TokenScope>,
    /// When the token expires.
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    /// When the token was revoked (if revoked).
    #[serde(with = "time::serde::rfc3339::option")]
    pub revoked_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub description: Option<String>,
}

impl Token {
    /// Not revoked and not past `expires_at`.
    pub fn is_valid(&self) -> bool {
        let now = OffsetDateTime::now_utc();

        if self.revoked_at.is_some() {
            return false;
        }

        if let Some(expires_at) = self.expires_at
            && now > expires_at
        {
            return false;
        }

        true
    }

    /// Check if the token has a specific scope.
    pub fn has_scope(&self, scope: TokenScope) -> bool {
        self.scopes.iter().any(|s| s.implies(&scope))
    }

    /// Check if the token can edit the catalog.
    pub fn can_write(&self) -> bool {
        self.is_valid() && self.has_scope(TokenScope::CatalogWrite)
    }

    /// Check if the token has admin access.
    pub fn is_admin(&self) -> bool {
        self.is_valid() && self.has_scope(TokenScope::CatalogAdmin)
    }
}

/// Request to create a token.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateTokenRequest {
    /// Scopes to grant.
    pub scopes: Vec<String>,
    /// Expiration duration in seconds (optional).
    pub expires_in: Option<u64>,
    /// Description for the token.
    pub description: Option<String>,
}

/// Response from creating a token.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateTokenResponse {
    /// The token ID.
    pub token_id: String,
    /// The token secret (only returned once).
    pub token_secret: String,
    /// Granted scopes.
    pub scopes: Vec<String>,
    /// When the token expires.
    pub expires_at: Option<String>,
}

/// Parse a list of scope strings, rejecting unknown scopes and empty lists.
pub fn parse_scopes(scopes: &[String]) -> crate::Result<HashSet<TokenScope>> {
    if scopes.is_empty() {
        return Err(crate::Error::InvalidToken(
            "at least one scope is required".to_string(),
        ));
    }
    scopes.iter().map(|s| TokenScope::parse(s.trim())).collect()
}

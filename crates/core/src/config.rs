//! Configuration types shared across crates.

use crate::media::{DEFAULT_MAX_AUDIO_BYTES, DEFAULT_MAX_IMAGE_BYTES, MediaKind};
use crate::search::{DEFAULT_MAX_PER_PAGE, DEFAULT_PER_PAGE, SearchLimits};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Externally visible base URL of this server (e.g., "https://fish.example.org").
    /// Used to build upload targets and media URLs. Falls back to `http://{bind}`.
    #[serde(default)]
    pub public_base_url: Option<String>,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
    /// Maximum JSON request body size in bytes (default: 1 MiB).
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// Admin token configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdminConfig {
    /// SHA256 hash of the admin token (hex-encoded, 64 characters).
    /// Generate with: `echo -n "your-secret-token" | sha256sum`
    pub token_hash: String,
    /// Scopes for the admin token (default: ["catalog:admin"]).
    pub token_scopes: Option<Vec<String>>,
    /// Description for the admin token.
    pub token_description: Option<String>,
}

impl AdminConfig {
    /// Create a test configuration with a dummy token hash.
    ///
    /// **For testing only.** The hash is deterministic but not a real token.
    pub fn for_testing() -> Self {
        Self {
            // SHA256 of "test-admin-token"
            token_hash: "17d6bfe05d1b1fb7bc499f8e3f639c7b3eda4c40f321eef8887a0c04c89a99c5"
                .to_string(),
            token_scopes: None,
            token_description: Some("Test admin token".to_string()),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            public_base_url: None,
            metrics_enabled: default_metrics_enabled(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl ServerConfig {
    /// Base URL clients should use to reach this server, without trailing slash.
    pub fn base_url(&self) -> String {
        match &self.public_base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://{}", self.bind),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(url) = &self.public_base_url
            && !url.starts_with("http://")
            && !url.starts_with("https://")
        {
            return Err(format!(
                "server.public_base_url must start with http:// or https://, got {url}"
            ));
        }
        if self.max_body_bytes == 0 {
            return Err("server.max_body_bytes cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
    /// S3-compatible storage.
    S3 {
        /// Bucket name.
        bucket: String,
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        /// AWS region.
        region: Option<String>,
        /// Optional key prefix.
        prefix: Option<String>,
        /// AWS access key ID. Falls back to AWS_ACCESS_KEY_ID env var if not set.
        /// WARNING: Prefer env vars or IAM roles over storing secrets in config files.
        access_key_id: Option<String>,
        /// AWS secret access key. Falls back to AWS_SECRET_ACCESS_KEY env var if not set.
        /// WARNING: Prefer env vars or IAM roles over storing secrets in config files.
        secret_access_key: Option<String>,
        /// Force path-style URLs (e.g., `endpoint/bucket/key` instead of `bucket.endpoint/key`).
        /// Required for MinIO and some S3-compatible services.
        #[serde(default)]
        force_path_style: bool,
        /// Public URL prefix for permanent media (a CDN or public bucket URL).
        /// When unset, media is streamed through the server.
        #[serde(default)]
        public_url: Option<String>,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/storage"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::S3 {
                access_key_id,
                secret_access_key,
                ..
            } => match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                (Some(_), Some(_)) | (None, None) => Ok(()),
                _ => Err(
                    "s3 config requires both access_key_id and secret_access_key when either is set"
                        .to_string(),
                ),
            },
            _ => Ok(()),
        }
    }
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database.
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Seconds to wait for a database connection before failing a request.
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(30)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

/// Signing configuration for server-hosted upload targets.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SigningConfig {
    /// Private key source.
    pub private_key: PrivateKeyConfig,
}

/// Private key source configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PrivateKeyConfig {
    /// Key stored in a file.
    File {
        /// Path to the private key file.
        path: PathBuf,
    },
    /// Key stored in environment variable.
    Env {
        /// Environment variable name.
        var: String,
    },
    /// Key provided directly as a value (NOT recommended for production).
    Value {
        /// Base64-encoded 32-byte Ed25519 secret key.
        key: String,
    },
    /// Generate a new key at startup. Grants do not survive a restart.
    Generate,
}

/// Signed upload configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Lifetime of a signed upload URL in seconds (default: 15 minutes).
    #[serde(default = "default_signed_url_ttl_secs")]
    pub signed_url_ttl_secs: u64,
    /// Maximum audio upload size in bytes (default: 20 MiB).
    #[serde(default = "default_max_audio_bytes")]
    pub max_audio_bytes: u64,
    /// Maximum image upload size in bytes (default: 10 MiB).
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: u64,
}

fn default_signed_url_ttl_secs() -> u64 {
    900
}

fn default_max_audio_bytes() -> u64 {
    DEFAULT_MAX_AUDIO_BYTES
}

fn default_max_image_bytes() -> u64 {
    DEFAULT_MAX_IMAGE_BYTES
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            signed_url_ttl_secs: default_signed_url_ttl_secs(),
            max_audio_bytes: default_max_audio_bytes(),
            max_image_bytes: default_max_image_bytes(),
        }
    }
}

impl UploadConfig {
    /// Upload size limit for a media kind.
    pub fn max_bytes(&self, kind: MediaKind) -> u64 {
        match kind {
            MediaKind::Audio => self.max_audio_bytes,
            MediaKind::Image => self.max_image_bytes,
        }
    }

    /// Signed URL lifetime.
    pub fn signed_url_ttl(&self) -> Duration {
        Duration::seconds(i64::try_from(self.signed_url_ttl_secs).unwrap_or(i64::MAX))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.signed_url_ttl_secs == 0 {
            return Err("uploads.signed_url_ttl_secs cannot be 0".to_string());
        }
        // S3 rejects presigned URLs valid for longer than 7 days.
        if self.signed_url_ttl_secs > 7 * 24 * 3600 {
            return Err(format!(
                "uploads.signed_url_ttl_secs {} exceeds the 7 day maximum",
                self.signed_url_ttl_secs
            ));
        }
        if self.max_audio_bytes == 0 || self.max_image_bytes == 0 {
            return Err("uploads size limits cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Pending-upload purge configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PurgeConfig {
    /// Age in seconds after which an unconfirmed upload is deleted (default: 24 hours).
    #[serde(default = "default_pending_ttl_secs")]
    pub pending_ttl_secs: u64,
    /// Maximum number of pending objects examined per run (default: 10,000).
    /// Remaining objects are picked up by the next run.
    #[serde(default = "default_purge_max_objects")]
    pub max_objects: u64,
    /// Report what would be deleted without deleting (default: false).
    #[serde(default)]
    pub dry_run: bool,
    /// Run purge automatically on a schedule (default: true).
    #[serde(default = "default_purge_auto_schedule_enabled")]
    pub auto_schedule_enabled: bool,
    /// Interval in seconds between scheduled runs (default: 1 hour).
    #[serde(default = "default_purge_interval_secs")]
    pub interval_secs: u64,
}

/// Ten years. Longer TTLs would push the purge cutoff out of `OffsetDateTime` range.
pub const MAX_PENDING_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

fn default_pending_ttl_secs() -> u64 {
    86400
}

fn default_purge_max_objects() -> u64 {
    10_000
}

fn default_purge_auto_schedule_enabled() -> bool {
    true
}

fn default_purge_interval_secs() -> u64 {
    3600
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            pending_ttl_secs: default_pending_ttl_secs(),
            max_objects: default_purge_max_objects(),
            dry_run: false,
            auto_schedule_enabled: default_purge_auto_schedule_enabled(),
            interval_secs: default_purge_interval_secs(),
        }
    }
}

impl PurgeConfig {
    /// Age after which pending objects are stale.
    pub fn pending_ttl(&self) -> Duration {
        Duration::seconds(i64::try_from(self.pending_ttl_secs).unwrap_or(i64::MAX))
    }

    /// Interval between scheduled runs.
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.pending_ttl_secs > MAX_PENDING_TTL_SECS {
            return Err(format!(
                "purge.pending_ttl_secs {} exceeds maximum value {MAX_PENDING_TTL_SECS}",
                self.pending_ttl_secs
            ));
        }
        if self.auto_schedule_enabled && self.interval_secs == 0 {
            return Err("purge.interval_secs cannot be 0 when auto_schedule_enabled".to_string());
        }
        if self.max_objects == 0 {
            return Err("purge.max_objects cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Search pagination configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_per_page")]
    pub default_per_page: u32,
    #[serde(default = "default_max_per_page")]
    pub max_per_page: u32,
}

fn default_per_page() -> u32 {
    DEFAULT_PER_PAGE
}

fn default_max_per_page() -> u32 {
    DEFAULT_MAX_PER_PAGE
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_per_page: default_per_page(),
            max_per_page: default_max_per_page(),
        }
    }
}

impl SearchConfig {
    pub fn limits(&self) -> SearchLimits {
        SearchLimits {
            default_per_page: self.default_per_page,
            max_per_page: self.max_per_page,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_per_page == 0 {
            return Err("search.max_per_page cannot be 0".to_string());
        }
        if self.default_per_page == 0 || self.default_per_page > self.max_per_page {
            return Err(format!(
                "search.default_per_page must be between 1 and max_per_page ({})",
                self.max_per_page
            ));
        }
        Ok(())
    }
}

/// Rate limiting configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    #[serde(default)]
    pub enabled: bool,
    /// Requests per minute per client IP.
    #[serde(default = "default_ip_requests_per_minute")]
    pub ip_requests_per_minute: u32,
    /// Burst size (allows temporary burst above rate limit).
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,
    /// Trusted proxy IP addresses/CIDR ranges.
    /// Only requests from these IPs will have X-Forwarded-For/X-Real-IP headers trusted.
    /// If empty, forwarded headers are never trusted (only direct connection IP is used).
    /// Use ["*"] to trust all proxies (NOT recommended for production).
    #[serde(default)]
    pub trusted_proxies: Vec<String>,
    /// Maximum number of unique IPs to track before rejecting new entries (default: 100000).
    #[serde(default = "default_max_entries")]
    pub max_entries: u32,
    /// Interval in seconds between cleanup sweeps of stale entries (default: 60).
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// Time-to-live in seconds for rate limit entries (default: 300).
    #[serde(default = "default_entry_ttl_secs")]
    pub entry_ttl_secs: u64,
}

fn default_ip_requests_per_minute() -> u32 {
    120
}

fn default_burst_size() -> u32 {
    20
}

fn default_max_entries() -> u32 {
    100_000
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

fn default_entry_ttl_secs() -> u64 {
    300
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ip_requests_per_minute: default_ip_requests_per_minute(),
            burst_size: default_burst_size(),
            trusted_proxies: Vec::new(),
            max_entries: default_max_entries(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            entry_ttl_secs: default_entry_ttl_secs(),
        }
    }
}

impl RateLimitConfig {
    /// Validate rate limit configuration for dangerous settings.
    /// Returns warnings for configs that are insecure but allowed,
    /// and errors for configs that are unsafe and should be rejected.
    pub fn validate(&self) -> Result<Vec<String>, String> {
        let mut warnings = Vec::new();

        if !self.enabled {
            return Ok(warnings);
        }

        // tokio::time::interval panics on a zero period
        if self.cleanup_interval_secs == 0 {
            return Err("rate_limit.cleanup_interval_secs cannot be 0. \
                 Use a value >= 1 second."
                .to_string());
        }

        if self.ip_requests_per_minute == 0 {
            return Err("rate_limit.ip_requests_per_minute cannot be 0".to_string());
        }

        if self.trusted_proxies.len() == 1 && self.trusted_proxies[0] == "*" {
            warnings.push(
                "rate_limit.trusted_proxies=['*'] trusts ALL forwarded headers. \
                 This allows clients to spoof their IP address and bypass rate limits."
                    .to_string(),
            );
        }

        if self.entry_ttl_secs < 120 {
            warnings.push(format!(
                "rate_limit.entry_ttl_secs={} is very short. \
                 Entries may be evicted before rate limits reset. \
                 Recommended minimum: 120 seconds.",
                self.entry_ttl_secs
            ));
        }

        Ok(warnings)
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Admin token configuration (required).
    pub admin: AdminConfig,
    /// Upload grant signing key. A key is generated at startup when absent.
    pub signing: Option<SigningConfig>,
    #[serde(default)]
    pub uploads: UploadConfig,
    #[serde(default)]
    pub purge: PurgeConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses filesystem storage, SQLite metadata,
    /// a dummy admin token and no scheduled purge.
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            metadata: MetadataConfig::default(),
            admin: AdminConfig::for_testing(),
            signing: None,
            uploads: UploadConfig::default(),
            purge: PurgeConfig {
                auto_schedule_enabled: false,
                ..PurgeConfig::default()
            },
            search: SearchConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }

    /// Validate every section. Rate limit warnings are returned for logging.
    pub fn validate(&self) -> Result<Vec<String>, String> {
        self.server.validate()?;
        self.storage.validate()?;
        self.uploads.validate()?;
        self.purge.validate()?;
        self.search.validate()?;
        self.rate_limit.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_defaults() {
        let config = ServerConfig::default();
        assert!(config.metrics_enabled);
        assert_eq!(config.max_body_bytes, 1024 * 1024);
        assert_eq!(config.base_url(), "http://127.0.0.1:8080");
    }

    #[test]
    fn test_server_config_base_url_trims_slash() {
        let config = ServerConfig {
            public_base_url: Some("https://fish.example.org/".to_string()),
            ..ServerConfig::default()
        };
        assert_eq!(config.base_url(), "https://fish.example.org");

        let invalid = ServerConfig {
            public_base_url: Some("fish.example.org".to_string()),
            ..ServerConfig::default()
        };
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_upload_config_limits_per_kind() {
        let config = UploadConfig::default();
        assert_eq!(config.max_bytes(MediaKind::Audio), 20 * 1024 * 1024);
        assert_eq!(config.max_bytes(MediaKind::Image), 10 * 1024 * 1024);
        assert_eq!(config.signed_url_ttl(), Duration::minutes(15));
    }

    #[test]
    fn test_upload_config_rejects_long_ttl() {
        let config = UploadConfig {
            signed_url_ttl_secs: 8 * 24 * 3600,
            ..UploadConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_purge_config_deserialize_partial() {
        let json = r#"{"dry_run": true}"#;
        let config: PurgeConfig = serde_json::from_str(json).unwrap();
        assert!(config.dry_run);
        assert!(config.auto_schedule_enabled);
        assert_eq!(config.pending_ttl(), Duration::hours(24));
    }

    #[test]
    fn test_purge_config_zero_interval() {
        let config = PurgeConfig {
            interval_secs: 0,
            ..PurgeConfig::default()
        };
        assert!(config.validate().is_err());

        let disabled = PurgeConfig {
            interval_secs: 0,
            auto_schedule_enabled: false,
            ..PurgeConfig::default()
        };
        assert!(disabled.validate().is_ok());
    }

    #[test]
    fn test_purge_config_caps_pending_ttl() {
        let at_cap = PurgeConfig {
            pending_ttl_secs: MAX_PENDING_TTL_SECS,
            ..PurgeConfig::default()
        };
        assert!(at_cap.validate().is_ok());

        let too_long = PurgeConfig {
            pending_ttl_secs: i64::MAX as u64,
            ..PurgeConfig::default()
        };
        assert!(too_long.validate().is_err());
    }

    #[test]
    fn test_search_config_validation() {
        assert!(SearchConfig::default().validate().is_ok());
        let config = SearchConfig {
            default_per_page: 200,
            max_per_page: 100,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_storage_config_s3_validate_partial_credentials() {
        let invalid = StorageConfig::S3 {
            bucket: "bucket".to_string(),
            endpoint: None,
            region: None,
            prefix: None,
            access_key_id: Some("access-key".to_string()),
            secret_access_key: None,
            force_path_style: false,
            public_url: None,
        };
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_storage_config_s3_defaults() {
        let json = r#"{"type":"s3","bucket":"fish-media"}"#;
        let config: StorageConfig = serde_json::from_str(json).unwrap();
        match config {
            StorageConfig::S3 {
                force_path_style,
                public_url,
                ..
            } => {
                assert!(!force_path_style);
                assert!(public_url.is_none());
            }
            _ => panic!("expected S3 config"),
        }
    }

    #[test]
    fn test_rate_limit_zero_cleanup_interval() {
        let config = RateLimitConfig {
            enabled: true,
            cleanup_interval_secs: 0,
            ..RateLimitConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_app_config_for_testing_is_valid() {
        let config = AppConfig::for_testing();
        assert!(config.validate().unwrap().is_empty());
        assert!(!config.purge.auto_schedule_enabled);
    }
}

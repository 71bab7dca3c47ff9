//! Server test utilities.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use fishlore_core::config::{AppConfig, MetadataConfig, StorageConfig};
use fishlore_metadata::models::TokenRow;
use fishlore_metadata::repos::TokenRepo;
use fishlore_metadata::{MetadataStore, SqliteStore};
use fishlore_server::{AppState, PurgeTaskRegistry, create_router};
use fishlore_signer::GrantSigner;
use fishlore_storage::{FilesystemBackend, ObjectStore};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use time::OffsetDateTime;
use tower::ServiceExt;
use uuid::Uuid;

/// Base URL the test server advertises in upload and media URLs.
pub const TEST_BASE_URL: &str = "http://fishlore.test";

/// Raw secret of the bootstrap admin token in [`AppConfig::for_testing`].
pub const ADMIN_TOKEN: &str = "test-admin-token";

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with temporary storage.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let storage_path = temp_dir.path().join("storage");
        let storage: Arc<dyn ObjectStore> = Arc::new(
            FilesystemBackend::new(&storage_path)
                .await
                .expect("Failed to create storage backend"),
        );

        let db_path = temp_dir.path().join("metadata.db");
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(&db_path, None)
                .await
                .expect("Failed to create metadata store"),
        );

        let mut config = AppConfig::for_testing();
        config.server.public_base_url = Some(TEST_BASE_URL.to_string());
        config.storage = StorageConfig::Filesystem { path: storage_path };
        config.metadata = MetadataConfig::Sqlite {
            path: db_path,
            query_timeout_secs: None,
        };
        modifier(&mut config);

        fishlore_server::bootstrap::ensure_admin_token(metadata.as_ref(), &config.admin)
            .await
            .expect("Failed to bootstrap admin token");

        let purge_tasks = Arc::new(PurgeTaskRegistry::new(metadata.clone()));
        let state = AppState::new(
            config,
            storage,
            metadata,
            GrantSigner::generate(),
            purge_tasks,
        );
        let router = create_router(state.clone());

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    /// Get access to the underlying metadata.
    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }

    /// Get access to the underlying object store.
    pub fn storage(&self) -> Arc<dyn ObjectStore> {
        self.state.storage.clone()
    }

    /// Insert a token with the given JSON scope list and return its secret.
    pub async fn create_token(&self, scopes: &str) -> String {
        let raw_token = format!("test-token-{}", Uuid::new_v4());
        let token = TokenRow {
            token_id: Uuid::new_v4(),
            token_hash: fishlore_server::auth::hash_token(&raw_token),
            scopes: scopes.to_string(),
            expires_at: None,
            revoked_at: None,
            created_at: OffsetDateTime::now_utc(),
            last_used_at: None,
            description: Some("Test Token".to_string()),
        };
        self.metadata()
            .create_token(&token)
            .await
            .expect("Failed to create token");
        raw_token
    }

    /// Make a JSON request; the response body is parsed as JSON when present.
    pub async fn json(
        &self,
        method: &str,
        uri: &str,
        body: Option<Value>,
        auth_token: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(token) = auth_token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }

        let body = match body {
            Some(v) => {
                builder = builder.header("Content-Type", "application/json");
                Body::from(serde_json::to_vec(&v).unwrap())
            }
            None => Body::empty(),
        };

        let request = builder.body(body).unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();

        let status = response.status();
        let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();

        let json: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        (status, json)
    }

    /// Make a raw request and return status, headers and body bytes.
    pub async fn raw(
        &self,
        request: Request<Body>,
    ) -> (StatusCode, axum::http::HeaderMap, bytes::Bytes) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, body)
    }

    /// Create a fish through the API and return its id.
    pub async fn create_fish(&self, token: &str, name: &str) -> i64 {
        let (status, body) = self
            .json(
                "POST",
                "/v1/fish",
                Some(serde_json::json!({ "name": name })),
                Some(token),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create fish failed: {body}");
        body["id"].as_i64().expect("fish id")
    }
}

use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl ApiClient {
    /// Reads are public, so the token is optional.
    pub fn new(base_url: &str, token: Option<&str>) -> Result<Self> {
        let base_url = Url::parse(base_url).context("invalid server URL")?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            token: token.map(str::to_string),
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).context("failed to build API URL")
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> Result<T> {
        let response = self.authorize(req).send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!("API error ({}): {}", status, body);
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn send_empty(&self, req: reqwest::RequestBuilder) -> Result<()> {
        let response = self.authorize(req).send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!("API error ({}): {}", status, body);
        }
        Ok(())
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        let url = self.url("/v1/health")?;
        self.send_json(self.http.get(url)).await
    }

    pub async fn whoami(&self) -> Result<WhoamiResponse> {
        let url = self.url("/v1/auth/whoami")?;
        self.send_json(self.http.get(url)).await
    }

    pub async fn search_fish(&self, query: &SearchQuery) -> Result<FishSearchPage> {
        let mut url = self.url("/v1/fish")?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query.pairs() {
                pairs.append_pair(key, &value);
            }
        }
        self.send_json(self.http.get(url)).await
    }

    pub async fn get_fish(&self, id: i64) -> Result<FishDetail> {
        let url = self.url(&format!("/v1/fish/{id}"))?;
        self.send_json(self.http.get(url)).await
    }

    pub async fn get_facets(&self) -> Result<Facets> {
        let url = self.url("/v1/facets")?;
        self.send_json(self.http.get(url)).await
    }

    pub async fn sign_upload(
        &self,
        fish_id: i64,
        kind: &str,
        req: &SignUploadRequest,
    ) -> Result<SignUploadResponse> {
        let url = self.url(&format!("/v1/fish/{fish_id}/media/{kind}/sign"))?;
        self.send_json(self.http.post(url).json(req)).await
    }

    /// PUT the file to a signed destination.
    ///
    /// No bearer token is sent: the URL itself is the credential, and
    /// presigned object store URLs reject extra authorization.
    pub async fn upload_to(&self, signed: &SignUploadResponse, data: Vec<u8>) -> Result<()> {
        let method = reqwest::Method::from_bytes(signed.method.as_bytes())
            .with_context(|| format!("invalid upload method: {}", signed.method))?;
        let mut req = self
            .http
            .request(method, &signed.upload_url)
            .body(data);
        for (name, value) in &signed.headers {
            req = req.header(name, value);
        }

        let response = req.send().await.context("upload request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("upload failed ({status}): {body}");
        }
        Ok(())
    }

    /// Confirm an upload. Confirm is idempotent, so transient failures are retried.
    pub async fn confirm_upload(
        &self,
        fish_id: i64,
        kind: &str,
        req: &ConfirmUploadRequest,
    ) -> Result<ConfirmUploadResponse> {
        let url = self.url(&format!("/v1/fish/{fish_id}/media/{kind}/confirm"))?;
        let response = retry_request(|| {
            self.authorize(self.http.post(url.clone()).json(req))
                .send()
        })
        .await
        .context("confirm request failed")?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!("API error ({}): {}", status, body);
        }
        Ok(serde_json::from_str(&body)?)
    }

    pub async fn list_media(&self, fish_id: i64) -> Result<Vec<MediaResponse>> {
        let url = self.url(&format!("/v1/fish/{fish_id}/media"))?;
        self.send_json(self.http.get(url)).await
    }

    pub async fn delete_media(&self, media_id: i64) -> Result<()> {
        let url = self.url(&format!("/v1/media/{media_id}"))?;
        self.send_empty(self.http.delete(url)).await
    }

    pub async fn create_token(&self, req: CreateTokenRequest) -> Result<CreateTokenResponse> {
        let url = self.url("/v1/admin/tokens")?;
        self.send_json(self.http.post(url).json(&req)).await
    }

    pub async fn list_tokens(&self) -> Result<Vec<TokenInfo>> {
        let url = self.url("/v1/admin/tokens")?;
        self.send_json(self.http.get(url)).await
    }

    pub async fn revoke_token(&self, id: &str) -> Result<()> {
        let url = self.url(&format!("/v1/admin/tokens/{id}"))?;
        self.send_empty(self.http.delete(url)).await
    }

    pub async fn trigger_purge(&self, req: TriggerPurgeRequest) -> Result<TriggerPurgeResponse> {
        let url = self.url("/v1/admin/purge")?;
        self.send_json(self.http.post(url).json(&req)).await
    }

    pub async fn list_purge_jobs(&self, limit: Option<u32>) -> Result<Vec<PurgeJobResponse>> {
        let mut url = self.url("/v1/admin/purge")?;
        if let Some(limit) = limit {
            url.query_pairs_mut()
                .append_pair("limit", &limit.to_string());
        }
        self.send_json(self.http.get(url)).await
    }

    pub async fn get_purge_job(&self, id: &str) -> Result<PurgeJobResponse> {
        let url = self.url(&format!("/v1/admin/purge/{id}"))?;
        self.send_json(self.http.get(url)).await
    }

    pub async fn audit_media(&self) -> Result<MediaAuditResponse> {
        let url = self.url("/v1/admin/audit/media")?;
        self.send_json(self.http.get(url)).await
    }
}

/// Retries an HTTP request with exponential backoff on transient failures.
///
/// Retries on transport errors and 5xx responses. Returns immediately on
/// success or 4xx (client errors that won't resolve with retries).
pub async fn retry_request<F, Fut>(mut make_request: F) -> reqwest::Result<reqwest::Response>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = reqwest::Result<reqwest::Response>>,
{
    const MAX_RETRIES: u32 = 3;
    let mut attempt = 0;

    loop {
        match make_request().await {
            Ok(response) if response.status().is_server_error() => {
                attempt += 1;
                if attempt > MAX_RETRIES {
                    return Ok(response);
                }
                let delay = Duration::from_millis(250 << (attempt - 1));
                tracing::warn!(
                    status = %response.status(),
                    delay_ms = delay.as_millis() as u64,
                    "server error, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Ok(response) => return Ok(response),
            Err(e) => {
                attempt += 1;
                if attempt > MAX_RETRIES {
                    return Err(e);
                }
                let delay = Duration::from_millis(250 << (attempt - 1));
                tracing::warn!(error = %e, delay_ms = delay.as_millis() as u64, "request error, retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

// =============================================================================
// Request/response types (mirrored from server handlers)
// =============================================================================

#[derive(Debug, Default, Clone)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub tribe: Option<String>,
    pub location: Option<String>,
    pub method: Option<String>,
    pub category: Option<String>,
    pub last_id: Option<i64>,
    pub per_page: Option<u32>,
}

impl SearchQuery {
    fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        let text = [
            ("q", &self.q),
            ("tribe", &self.tribe),
            ("location", &self.location),
            ("method", &self.method),
            ("category", &self.category),
        ];
        for (key, value) in text {
            if let Some(value) = value {
                pairs.push((key, value.clone()));
            }
        }
        if let Some(last_id) = self.last_id {
            pairs.push(("last_id", last_id.to_string()));
        }
        if let Some(per_page) = self.per_page {
            pairs.push(("per_page", per_page.to_string()));
        }
        pairs
    }
}

#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Deserialize)]
pub struct WhoamiResponse {
    pub token_id: String,
    pub scopes: Vec<String>,
    pub expires_at: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FishSummary {
    pub id: i64,
    pub name: String,
    pub scientific_name: Option<String>,
    pub common_name: Option<String>,
    pub description: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Deserialize)]
pub struct PageInfo {
    pub per_page: u32,
    pub has_more: bool,
    pub next_cursor: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct FishSearchPage {
    pub items: Vec<FishSummary>,
    pub page_info: PageInfo,
}

#[derive(Debug, Deserialize)]
pub struct CaptureResponse {
    pub id: i64,
    pub tribe: String,
    pub location: String,
    pub method: String,
    pub captured_on: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ClassificationResponse {
    pub id: i64,
    pub tribe: String,
    pub local_name: Option<String>,
    pub category: String,
    pub processing_method: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FishDetail {
    #[serde(flatten)]
    pub fish: FishSummary,
    pub captures: Vec<CaptureResponse>,
    pub classifications: Vec<ClassificationResponse>,
    pub media: Vec<MediaResponse>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Facets {
    pub tribes: Vec<String>,
    pub locations: Vec<String>,
    pub methods: Vec<String>,
    pub categories: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct MediaResponse {
    pub id: i64,
    pub fish_id: i64,
    pub kind: String,
    pub object_key: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub title: Option<String>,
    pub duration_ms: Option<i64>,
    pub url: String,
    pub created_at: String,
}

#[derive(Debug, Serialize)]
pub struct SignUploadRequest {
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: u64,
}

#[derive(Debug, Deserialize)]
pub struct SignUploadResponse {
    pub object_key: String,
    pub upload_url: String,
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub expires_at: String,
    pub max_bytes: u64,
}

#[derive(Debug, Serialize)]
pub struct ConfirmUploadRequest {
    pub object_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmUploadResponse {
    #[serde(flatten)]
    pub media: MediaResponse,
    pub already_confirmed: bool,
}

#[derive(Debug, Serialize)]
pub struct CreateTokenRequest {
    pub scopes: Vec<String>,
    pub expires_in: Option<u64>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTokenResponse {
    pub token_id: String,
    pub token_secret: String,
    pub scopes: Vec<String>,
    pub expires_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TokenInfo {
    pub token_id: String,
    pub scopes: Vec<String>,
    pub expires_at: Option<String>,
    pub revoked_at: Option<String>,
    pub created_at: String,
    pub last_used_at: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TriggerPurgeRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct TriggerPurgeResponse {
    pub job_id: String,
    pub dry_run: bool,
}

#[derive(Debug, Deserialize, Default)]
pub struct PurgeStats {
    pub scanned: u64,
    pub deleted: u64,
    pub bytes_reclaimed: u64,
    pub skipped_fresh: u64,
    pub errors: u64,
}

#[derive(Debug, Deserialize)]
pub struct PurgeJobResponse {
    pub job_id: String,
    pub state: String,
    pub dry_run: bool,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub stats: Option<PurgeStats>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MissingMedia {
    pub media_id: i64,
    pub fish_id: i64,
    pub object_key: String,
}

#[derive(Debug, Deserialize)]
pub struct MediaAuditResponse {
    pub checked: u64,
    pub missing: Vec<MissingMedia>,
    pub errors: u64,
}

//! Server-hosted upload target for backends that cannot presign.
//!
//! The signed grant in the path is the only credential: it names the pending
//! key, the content type and the size limit, and expires with the signed URL.

use crate::error::{ApiError, ApiResult};
use crate::handlers::common::check_content_length;
use crate::metrics::{self, record_upload_error};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Request, State};
use axum::http::header::CONTENT_TYPE;
use fishlore_core::media::{MediaKey, content_type_essence};
use fishlore_storage::StreamingUpload;
use futures::StreamExt;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct UploadReceipt {
    pub object_key: String,
    pub size_bytes: u64,
}

/// Discard a partial upload, logging rather than masking the original error.
async fn abort_upload(upload: Box<dyn StreamingUpload>, key: &str) {
    if let Err(e) = upload.abort().await {
        tracing::warn!(key = %key, error = %e, "failed to abort partial upload");
    }
}

/// PUT /v1/uploads/{grant} - Receive a file into the pending namespace.
#[tracing::instrument(skip_all, fields(object_key))]
pub async fn put_upload(
    State(state): State<AppState>,
    Path(grant): Path<String>,
    req: Request,
) -> ApiResult<Json<UploadReceipt>> {
    let grant = state.grant_signer.verify(&grant).inspect_err(|e| {
        tracing::debug!(error = %e, "rejected upload grant");
        record_upload_error("invalid_grant");
    })?;

    // Grants are only ever issued for pending keys.
    let key = MediaKey::parse_pending(&grant.object_key)?;
    let object_key = key.pending_key();
    tracing::Span::current().record("object_key", object_key.as_str());

    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(content_type_essence)
        .unwrap_or_default();
    if content_type != grant.content_type {
        record_upload_error("content_type_mismatch");
        return Err(ApiError::UnsupportedMediaType(format!(
            "Content-Type must be {}",
            grant.content_type
        )));
    }

    check_content_length(&req, grant.max_size).inspect_err(|_| {
        record_upload_error("too_large");
    })?;

    let mut upload = state.storage.put_stream(&object_key).await?;
    let mut body = req.into_body().into_data_stream();
    let mut received: u64 = 0;

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                abort_upload(upload, &object_key).await;
                record_upload_error("body_read");
                return Err(ApiError::BadRequest(format!("failed to read body: {e}")));
            }
        };

        received += chunk.len() as u64;
        if received > grant.max_size {
            abort_upload(upload, &object_key).await;
            record_upload_error("too_large");
            return Err(ApiError::PayloadTooLarge(format!(
                "upload exceeds granted size of {} bytes",
                grant.max_size
            )));
        }

        if let Err(e) = upload.write(chunk).await {
            abort_upload(upload, &object_key).await;
            record_upload_error("storage_write");
            return Err(e.into());
        }
    }

    if received == 0 {
        abort_upload(upload, &object_key).await;
        return Err(ApiError::BadRequest("upload body is empty".to_string()));
    }

    let size_bytes = upload.finish().await?;
    metrics::UPLOAD_BYTES_RECEIVED.inc_by(size_bytes);
    tracing::info!(object_key = %object_key, size_bytes, "upload received");

    Ok(Json(UploadReceipt {
        object_key,
        size_bytes,
    }))
}

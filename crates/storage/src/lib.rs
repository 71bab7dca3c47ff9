//! Object storage abstraction and backends for fishlore media.
//!
//! This crate provides:
//! - The [`ObjectStore`] trait used by the upload, confirm and purge flows
//! - Atomic writes, moves and prefix listings with object age
//! - Backends: local filesystem and S3-compatible (with presigned uploads)

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::filesystem::FilesystemBackend;
pub use backends::s3::{S3Backend, S3Options};
pub use error::{StorageError, StorageResult};
pub use traits::{
    ByteStream, ListingOptions, ListingPage, ObjectEntry, ObjectMeta, ObjectStore, PageStream,
    PresignedRequest, StreamingUpload,
};

use fishlore_core::config::StorageConfig;
use std::sync::Arc;

/// Create an object store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Filesystem { path } => {
            let backend = FilesystemBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
        StorageConfig::S3 {
            bucket,
            endpoint,
            region,
            prefix,
            access_key_id,
            secret_access_key,
            force_path_style,
            public_url,
        } => {
            let backend = S3Backend::new(S3Options {
                bucket: bucket.clone(),
                endpoint: endpoint.clone(),
                region: region.clone(),
                prefix: prefix.clone(),
                access_key_id: access_key_id.clone(),
                secret_access_key: secret_access_key.clone(),
                force_path_style: *force_path_style,
                public_url: public_url.clone(),
            })
            .await?;
            Ok(Arc::new(backend))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tempfile::tempdir;

    #[tokio::test]
    async fn from_config_filesystem_ok() {
        let temp = tempdir().unwrap();
        let config = StorageConfig::Filesystem {
            path: temp.path().join("store"),
        };

        let store = from_config(&config).await.unwrap();
        store
            .put("image/1/a.png", Bytes::from_static(b"png"))
            .await
            .unwrap();
        assert!(store.exists("image/1/a.png").await.unwrap());
        assert_eq!(store.backend_name(), "filesystem");
        assert!(store.public_url("image/1/a.png").is_none());
        assert!(
            store
                .presign_put("image/1/b.png", "image/png", std::time::Duration::from_secs(60))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn from_config_s3_ok() {
        let config = StorageConfig::S3 {
            bucket: "bucket".to_string(),
            endpoint: Some("minio:9000".to_string()),
            region: Some("us-east-1".to_string()),
            prefix: Some("fishlore".to_string()),
            access_key_id: None,
            secret_access_key: None,
            force_path_style: true,
            public_url: None,
        };

        let store = from_config(&config).await.unwrap();
        assert_eq!(store.backend_name(), "s3");
    }

    #[tokio::test]
    async fn from_config_rejects_partial_credentials() {
        let config = StorageConfig::S3 {
            bucket: "bucket".to_string(),
            endpoint: None,
            region: None,
            prefix: None,
            access_key_id: Some("access".to_string()),
            secret_access_key: None,
            force_path_style: false,
            public_url: None,
        };

        match from_config(&config).await {
            Ok(_) => panic!("expected error"),
            Err(StorageError::Config(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
}

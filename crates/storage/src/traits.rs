//! Storage trait definitions.

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use time::OffsetDateTime;

/// A boxed stream of bytes for streaming reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// A boxed stream of listing pages.
pub type PageStream<'a> = Pin<Box<dyn Stream<Item = StorageResult<ListingPage>> + Send + 'a>>;

/// Page size constraints for listing operations.
pub const DEFAULT_PAGE_SIZE: usize = 1000;
pub const MIN_PAGE_SIZE: usize = 1;
pub const MAX_PAGE_SIZE: usize = 1000;

/// One object returned by a listing.
#[derive(Clone, Debug)]
pub struct ObjectEntry {
    /// Object key relative to the store root.
    pub key: String,
    /// Object size in bytes.
    pub size: u64,
    /// Last modification time, when the backend reports one.
    pub last_modified: Option<OffsetDateTime>,
}

/// A single page of listing results.
#[derive(Clone, Debug, Default)]
pub struct ListingPage {
    pub entries: Vec<ObjectEntry>,
}

/// Options for listing operations.
#[derive(Clone, Debug)]
pub struct ListingOptions {
    /// Number of entries to fetch per page, clamped to [MIN_PAGE_SIZE, MAX_PAGE_SIZE].
    pub page_size: usize,
}

impl ListingOptions {
    pub fn new(page_size: usize) -> Self {
        Self { page_size }
    }

    /// Get the normalized page size.
    pub fn normalized_page_size(&self) -> usize {
        self.page_size.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE)
    }
}

impl Default for ListingOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// A presigned request a client can send directly to the backend.
#[derive(Clone, Debug)]
pub struct PresignedRequest {
    /// Target URL including the signature query.
    pub url: String,
    /// HTTP method, always `PUT` for uploads.
    pub method: String,
    /// Headers the client must send verbatim for the signature to match.
    pub headers: Vec<(String, String)>,
}

/// Object store abstraction for media storage.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Check if an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Get an object's size without fetching content.
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta>;

    /// Get an object's content.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Get an object as a byte stream.
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream>;

    /// Put an object atomically.
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()>;

    /// Start a streaming upload. Nothing is visible under `key` until `finish`.
    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>>;

    /// Delete an object. Returns `NotFound` if it does not exist.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Copy an object.
    async fn copy(&self, from: &str, to: &str) -> StorageResult<()>;

    /// Move an object to a new key.
    ///
    /// The default copies then deletes the source. A missing source after the
    /// copy (a concurrent move won the race) is not an error.
    async fn move_object(&self, from: &str, to: &str) -> StorageResult<()> {
        self.copy(from, to).await?;
        match self.delete(from).await {
            Ok(()) | Err(StorageError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// List objects under a prefix, a page at a time.
    fn list_pages<'a>(&'a self, prefix: &str, options: ListingOptions) -> PageStream<'a>;

    /// Presign a direct upload to `key`, if the backend supports it.
    ///
    /// Backends that cannot presign return `Ok(None)` and uploads go through
    /// the server instead.
    async fn presign_put(
        &self,
        _key: &str,
        _content_type: &str,
        _expires_in: std::time::Duration,
    ) -> StorageResult<Option<PresignedRequest>> {
        Ok(None)
    }

    /// Public URL for an object, if the backend is configured with one.
    fn public_url(&self, _key: &str) -> Option<String> {
        None
    }

    /// Get the name of this storage backend, used for metrics and logging.
    fn backend_name(&self) -> &'static str;

    /// Verify storage backend connectivity.
    ///
    /// Called during startup so the server fails fast on a misconfigured
    /// backend. The default implementation does nothing.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Metadata about a stored object.
#[derive(Clone, Debug)]
pub struct ObjectMeta {
    /// Object size in bytes.
    pub size: u64,
    /// Last modification time (if available).
    pub last_modified: Option<OffsetDateTime>,
    /// Content type (if available).
    pub content_type: Option<String>,
}

/// Trait for streaming uploads.
#[async_trait]
pub trait StreamingUpload: Send {
    /// Write a chunk of data.
    async fn write(&mut self, data: Bytes) -> StorageResult<()>;

    /// Finish the upload and return the total bytes written.
    async fn finish(self: Box<Self>) -> StorageResult<u64>;

    /// Abort the upload, discarding everything written so far.
    async fn abort(self: Box<Self>) -> StorageResult<()>;
}

//! Local filesystem storage backend.

use crate::error::{StorageError, StorageResult};
use crate::traits::{
    ByteStream, ListingOptions, ListingPage, ObjectEntry, ObjectMeta, ObjectStore, PageStream,
    StreamingUpload,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::instrument;
use uuid::Uuid;

/// Buffer size for streaming reads (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Local filesystem object store.
pub struct FilesystemBackend {
    root: PathBuf,
}

fn not_found_or_io(key: &str) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |e| {
        if e.kind() == ErrorKind::NotFound {
            StorageError::NotFound(key.to_string())
        } else {
            StorageError::Io(e)
        }
    }
}

impl FilesystemBackend {
    /// Create a new filesystem backend rooted at `root`, creating it if needed.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Resolve a key to a path inside the root.
    ///
    /// Canonicalization and symlink checks block, so they run on the blocking pool.
    async fn key_path(&self, key: &str) -> StorageResult<PathBuf> {
        let root = self.root.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || resolve_key(&root, &key))
            .await
            .map_err(|e| {
                StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}")))
            })?
    }

    async fn ensure_parent(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

/// Sibling temp path used for atomic writes: `{name}.tmp.{uuid}`.
fn temp_path_for(path: &Path) -> PathBuf {
    let suffix = format!(".tmp.{}", Uuid::new_v4());
    let name = path
        .file_name()
        .map(|n| format!("{}{suffix}", n.to_string_lossy()))
        .unwrap_or(suffix);
    path.with_file_name(name)
}

/// Fail if `existing` (which must exist) resolves outside `root_canonical`.
fn ensure_within_root(
    existing: &Path,
    root_canonical: &Path,
    key: &str,
    what: &str,
) -> StorageResult<()> {
    let meta = std::fs::symlink_metadata(existing)?;
    let canonical = existing.canonicalize().map_err(|e| {
        if meta.file_type().is_symlink() {
            StorageError::InvalidKey(format!("{what} symlink target missing or invalid: {key}"))
        } else {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to canonicalize {what}: {e}"),
            ))
        }
    })?;

    if !canonical.starts_with(root_canonical) {
        return Err(StorageError::InvalidKey(format!(
            "{what} escapes storage root: {key}"
        )));
    }
    Ok(())
}

/// Map a key to a path under `root`, rejecting anything that could escape it.
///
/// Keys must be relative and made only of normal components. If the path (or
/// its nearest existing ancestor, for new objects) exists, it must resolve
/// inside the root after following symlinks.
fn resolve_key(root: &Path, key: &str) -> StorageResult<PathBuf> {
    if key.is_empty() || key.starts_with('/') || key.starts_with('\\') || key.contains("..") {
        return Err(StorageError::InvalidKey(format!(
            "path traversal not allowed: {key}"
        )));
    }
    if !Path::new(key)
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
    {
        return Err(StorageError::InvalidKey(format!(
            "contains unsafe path component: {key}"
        )));
    }

    let path = root.join(key);
    let root_canonical = root.canonicalize().map_err(|e| {
        StorageError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to canonicalize root: {e}"),
        ))
    })?;

    let mut candidate = Some(path.as_path());
    while let Some(current) = candidate {
        match std::fs::symlink_metadata(current) {
            Ok(_) => {
                let what = if current == path { "resolved path" } else { "ancestor path" };
                ensure_within_root(current, &root_canonical, key, what)?;
                break;
            }
            Err(err) if err.kind() == ErrorKind::NotFound => candidate = current.parent(),
            Err(err) => {
                return Err(StorageError::Io(std::io::Error::new(
                    err.kind(),
                    format!("failed to stat path: {err}"),
                )));
            }
        }
    }

    Ok(path)
}

#[async_trait]
impl ObjectStore for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.key_path(key).await?;
        fs::try_exists(&path).await.map_err(StorageError::Io)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        let path = self.key_path(key).await?;
        let metadata = fs::metadata(&path).await.map_err(not_found_or_io(key))?;
        if !metadata.is_file() {
            return Err(StorageError::NotFound(key.to_string()));
        }

        Ok(ObjectMeta {
            size: metadata.len(),
            last_modified: metadata.modified().ok().map(Into::into),
            content_type: None,
        })
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.key_path(key).await?;
        let data = fs::read(&path).await.map_err(not_found_or_io(key))?;
        Ok(Bytes::from(data))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        let path = self.key_path(key).await?;
        let file = fs::File::open(&path).await.map_err(not_found_or_io(key))?;
        let stream = ReaderStream::with_capacity(file, STREAM_CHUNK_SIZE)
            .map(|chunk| chunk.map_err(StorageError::Io));
        Ok(Box::pin(stream))
    }

    #[instrument(skip(self, data), fields(backend = "filesystem", size = data.len()))]
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        let mut upload = self.put_stream(key).await?;
        if let Err(e) = upload.write(data).await {
            let _ = upload.abort().await;
            return Err(e);
        }
        upload.finish().await?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
        let path = self.key_path(key).await?;
        self.ensure_parent(&path).await?;

        let temp_path = temp_path_for(&path);
        let file = fs::File::create(&temp_path).await?;

        Ok(Box::new(FilesystemUpload {
            file,
            temp_path,
            final_path: path,
            bytes_written: 0,
        }))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.key_path(key).await?;
        fs::remove_file(&path).await.map_err(not_found_or_io(key))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn copy(&self, from: &str, to: &str) -> StorageResult<()> {
        let from_path = self.key_path(from).await?;
        let to_path = self.key_path(to).await?;
        self.ensure_parent(&to_path).await?;

        // Copy into a temp file first so readers never see a partial object.
        let temp_path = temp_path_for(&to_path);
        if let Err(e) = fs::copy(&from_path, &temp_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(not_found_or_io(from)(e));
        }
        fs::rename(&temp_path, &to_path).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn move_object(&self, from: &str, to: &str) -> StorageResult<()> {
        let from_path = self.key_path(from).await?;
        let to_path = self.key_path(to).await?;
        self.ensure_parent(&to_path).await?;
        fs::rename(&from_path, &to_path)
            .await
            .map_err(not_found_or_io(from))
    }

    fn list_pages<'a>(&'a self, prefix: &str, options: ListingOptions) -> PageStream<'a> {
        let prefix = prefix.trim_end_matches('/').to_string();
        let page_size = options.normalized_page_size();

        let stream = async_stream::try_stream! {
            let base_path = if prefix.is_empty() {
                self.root.clone()
            } else {
                self.key_path(&prefix).await?
            };

            let base_exists = match fs::try_exists(&base_path).await {
                Ok(exists) => exists,
                Err(e) if e.kind() == ErrorKind::NotFound => false,
                Err(e) => Err(StorageError::Io(e))?,
            };
            if !base_exists {
                return;
            }

            let mut stack = vec![base_path];
            let mut page = ListingPage::default();

            while let Some(dir) = stack.pop() {
                let mut entries = fs::read_dir(&dir).await?;
                while let Some(entry) = entries.next_entry().await? {
                    // DirEntry::metadata does not follow symlinks; links are skipped.
                    let metadata = match entry.metadata().await {
                        Ok(m) => m,
                        Err(e) if e.kind() == ErrorKind::NotFound => continue,
                        Err(e) => Err(StorageError::Io(e))?,
                    };
                    let path = entry.path();
                    if metadata.is_dir() {
                        stack.push(path);
                        continue;
                    }
                    if !metadata.is_file() {
                        continue;
                    }
                    let Ok(rel) = path.strip_prefix(&self.root) else {
                        continue;
                    };

                    page.entries.push(ObjectEntry {
                        key: rel.to_string_lossy().replace('\\', "/"),
                        size: metadata.len(),
                        last_modified: metadata.modified().ok().map(Into::into),
                    });
                    if page.entries.len() >= page_size {
                        yield std::mem::take(&mut page);
                    }
                }
            }

            if !page.entries.is_empty() {
                yield page;
            }
        };

        Box::pin(stream)
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        let metadata = fs::metadata(&self.root).await.map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("storage root not accessible: {e}"),
            ))
        })?;

        if !metadata.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                ErrorKind::NotADirectory,
                format!("storage root is not a directory: {:?}", self.root),
            )));
        }

        Ok(())
    }
}

/// Streaming upload for filesystem backend.
struct FilesystemUpload {
    file: fs::File,
    temp_path: PathBuf,
    final_path: PathBuf,
    bytes_written: u64,
}

#[async_trait]
impl StreamingUpload for FilesystemUpload {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        self.file.write_all(&data).await?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    async fn finish(self: Box<Self>) -> StorageResult<u64> {
        let Self {
            file,
            temp_path,
            final_path,
            bytes_written,
        } = *self;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp_path, &final_path).await?;
        Ok(bytes_written)
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        let Self {
            file, temp_path, ..
        } = *self;
        drop(file);
        let _ = fs::remove_file(&temp_path).await;
        Ok(())
    }
}

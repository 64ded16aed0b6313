//! Object store gateway.
//!
//! Streaming put/get against named buckets. `put_stream` consumes an already
//! streaming source without materializing it; `get_stream` hands back a
//! readable byte stream over the full object. Bucket existence is ensured
//! lazily by callers before first use; check-then-create is not atomic, which
//! is fine because archive jobs do not run concurrently against one bucket.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::debug;

/// Result type for object store operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Readable byte stream over an object's content.
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

/// Errors that can occur during object store operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Object does not exist.
    #[error("object not found: {bucket}/{name}")]
    NotFound { bucket: String, name: String },

    /// Bucket or object name contains path components.
    #[error("invalid object name: {0}")]
    InvalidName(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Streaming blob storage addressed by bucket and object name.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create the bucket if it does not exist yet.
    async fn ensure_bucket(&self, bucket: &str) -> StorageResult<()>;

    /// Write the named object from a streaming source. Returns bytes written.
    async fn put_stream(
        &self,
        bucket: &str,
        name: &str,
        source: &mut (dyn AsyncRead + Send + Unpin),
    ) -> StorageResult<u64>;

    /// Open a readable stream over the named object's full content.
    async fn get_stream(&self, bucket: &str, name: &str) -> StorageResult<ObjectReader>;
}

/// Reject names that would escape the bucket directory.
fn validate_name(name: &str) -> StorageResult<&str> {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name == "." || name == ".." {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(name)
}

/// Filesystem-backed object store: one directory per bucket.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Create a store rooted at the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, bucket: &str, name: &str) -> StorageResult<PathBuf> {
        let bucket = validate_name(bucket)?;
        let name = validate_name(name)?;
        Ok(self.root.join(bucket).join(name))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn ensure_bucket(&self, bucket: &str) -> StorageResult<()> {
        let path = self.root.join(validate_name(bucket)?);
        if !path.is_dir() {
            debug!(bucket, "creating bucket directory");
            fs::create_dir_all(&path).await?;
        }
        Ok(())
    }

    async fn put_stream(
        &self,
        bucket: &str,
        name: &str,
        source: &mut (dyn AsyncRead + Send + Unpin),
    ) -> StorageResult<u64> {
        let path = self.object_path(bucket, name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&path).await?;
        let written = tokio::io::copy(source, &mut file).await?;
        file.flush().await?;
        debug!(bucket, name, written, "object written");
        Ok(written)
    }

    async fn get_stream(&self, bucket: &str, name: &str) -> StorageResult<ObjectReader> {
        let path = self.object_path(bucket, name)?;
        let file = fs::File::open(&path).await.map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                StorageError::NotFound {
                    bucket: bucket.to_string(),
                    name: name.to_string(),
                }
            } else {
                StorageError::Io(err)
            }
        })?;
        Ok(Box::pin(file))
    }
}

/// In-memory object store.
///
/// Buffers whole objects; intended for tests.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    buckets: Mutex<HashMap<String, HashMap<String, Vec<u8>>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a stored object's bytes, if present.
    pub fn object(&self, bucket: &str, name: &str) -> Option<Vec<u8>> {
        self.buckets
            .lock()
            .expect("object store lock")
            .get(bucket)
            .and_then(|objects| objects.get(name))
            .cloned()
    }

    /// Store an object directly, creating the bucket as needed.
    pub fn insert(&self, bucket: &str, name: &str, body: impl Into<Vec<u8>>) {
        self.buckets
            .lock()
            .expect("object store lock")
            .entry(bucket.to_string())
            .or_default()
            .insert(name.to_string(), body.into());
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn ensure_bucket(&self, bucket: &str) -> StorageResult<()> {
        validate_name(bucket)?;
        self.buckets
            .lock()
            .expect("object store lock")
            .entry(bucket.to_string())
            .or_default();
        Ok(())
    }

    async fn put_stream(
        &self,
        bucket: &str,
        name: &str,
        source: &mut (dyn AsyncRead + Send + Unpin),
    ) -> StorageResult<u64> {
        validate_name(bucket)?;
        validate_name(name)?;

        let mut body = Vec::new();
        source.read_to_end(&mut body).await?;
        let written = body.len() as u64;
        self.insert(bucket, name, body);
        Ok(written)
    }

    async fn get_stream(&self, bucket: &str, name: &str) -> StorageResult<ObjectReader> {
        let body = self.object(bucket, name).ok_or_else(|| StorageError::NotFound {
            bucket: bucket.to_string(),
            name: name.to_string(),
        })?;
        Ok(Box::pin(io::Cursor::new(body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read_all(mut reader: ObjectReader) -> Vec<u8> {
        let mut body = Vec::new();
        reader.read_to_end(&mut body).await.unwrap();
        body
    }

    #[tokio::test]
    async fn fs_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        store.ensure_bucket("archives").await.unwrap();
        let mut source: &[u8] = b"line one\nline two\n";
        let written = store
            .put_stream("archives", "abc_messages", &mut source)
            .await
            .unwrap();
        assert_eq!(written, 18);

        let reader = store.get_stream("archives", "abc_messages").await.unwrap();
        assert_eq!(read_all(reader).await, b"line one\nline two\n");
    }

    #[tokio::test]
    async fn fs_store_missing_object_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        store.ensure_bucket("archives").await.unwrap();

        // ObjectReader is not Debug, so destructure instead of unwrap_err.
        let Err(err) = store.get_stream("archives", "nope").await else {
            panic!("expected a missing object error");
        };
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn path_components_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        let mut source: &[u8] = b"x";
        let err = store
            .put_stream("archives", "../escape", &mut source)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidName(_)));
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryObjectStore::new();
        store.ensure_bucket("exports").await.unwrap();

        let mut source: &[u8] = b"<html></html>";
        store.put_stream("exports", "a_export.html", &mut source).await.unwrap();

        let reader = store.get_stream("exports", "a_export.html").await.unwrap();
        assert_eq!(read_all(reader).await, b"<html></html>");
        assert!(store.object("exports", "a_export.html").is_some());

        let Err(err) = store.get_stream("exports", "other").await else {
            panic!("expected a missing object error");
        };
        assert!(matches!(err, StorageError::NotFound { .. }));
    }
}

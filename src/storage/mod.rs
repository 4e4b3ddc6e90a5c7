//! Durable object storage used for temporary chunks and finalized ciphertext.
//!
//! Core services depend only on [`StorageBackend`]. Two implementations ship
//! with the crate:
//! - [`memory::MemoryStorage`]: in-process maps, for tests and embedding
//! - [`disk::DiskStorage`]: SQLite metadata plus sharded payload files

use async_trait::async_trait;
use bytes::Bytes;
use std::{collections::HashMap, io};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncSeek};

pub mod disk;
pub mod memory;

pub use disk::DiskStorage;
pub use memory::MemoryStorage;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("container `{0}` not found")]
    ContainerNotFound(String),
    #[error("container `{name}` invalid: {reason}")]
    InvalidContainerName { name: String, reason: String },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// A seekable byte source for one stored object.
pub trait ObjectRead: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin> ObjectRead for T {}

/// An opened object ready to be streamed out.
///
/// Dropping the handle releases the underlying file or buffer.
pub struct ObjectHandle {
    pub reader: Box<dyn ObjectRead>,
    pub size: u64,
}

impl std::fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectHandle")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Minimal capability set the upload and retrieval pipelines need.
///
/// Implementations must be thread-safe and give per-key read-after-write
/// consistency. Nothing else (ordering, transactions) is assumed.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Create `container` unless it already exists.
    async fn create_container(&self, container: &str) -> StorageResult<()>;

    /// Store `data` under `key`, replacing any previous payload and metadata.
    async fn put(
        &self,
        container: &str,
        key: &str,
        data: Bytes,
        metadata: HashMap<String, String>,
    ) -> StorageResult<()>;

    async fn exists(&self, container: &str, key: &str) -> StorageResult<bool>;

    /// `Ok(None)` when the object does not exist.
    async fn metadata(
        &self,
        container: &str,
        key: &str,
    ) -> StorageResult<Option<HashMap<String, String>>>;

    /// Read a whole object into memory. `Ok(None)` when it does not exist.
    async fn get(&self, container: &str, key: &str) -> StorageResult<Option<Bytes>>;

    /// Open an object for streaming. `Ok(None)` when it does not exist.
    async fn open(&self, container: &str, key: &str) -> StorageResult<Option<ObjectHandle>>;

    /// Returns whether something was deleted. Deleting a missing key is not an error.
    async fn delete(&self, container: &str, key: &str) -> StorageResult<bool>;

    /// Keys in `container`, ascending, optionally filtered by prefix.
    async fn list(&self, container: &str, prefix: Option<&str>) -> StorageResult<Vec<String>>;

    /// Cheap liveness check used by `/readyz`.
    async fn ping(&self) -> StorageResult<()>;
}

const MAX_OBJECT_KEY_LEN: usize = 1024;
const CONTAINER_NAME_MIN_LEN: usize = 3;
const CONTAINER_NAME_MAX_LEN: usize = 63;

/// Basic key validation to avoid trivial path traversal vectors.
///
/// Rejects empty or oversized keys, keys beginning with `/`, keys containing
/// `..`, backslashes or control characters.
pub(crate) fn ensure_key_safe(key: &str) -> StorageResult<()> {
    if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
        return Err(StorageError::InvalidObjectKey);
    }
    if key.starts_with('/') || key.contains("..") {
        return Err(StorageError::InvalidObjectKey);
    }
    if key
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
    {
        return Err(StorageError::InvalidObjectKey);
    }
    Ok(())
}

/// Validate container name format.
///
/// - 3–63 characters
/// - lowercase letters, digits and hyphens only
/// - cannot start or end with a hyphen
pub(crate) fn ensure_container_name_safe(name: &str) -> StorageResult<()> {
    let len = name.len();
    if !(CONTAINER_NAME_MIN_LEN..=CONTAINER_NAME_MAX_LEN).contains(&len) {
        return Err(StorageError::InvalidContainerName {
            name: name.to_string(),
            reason: "must be between 3 and 63 characters".into(),
        });
    }

    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '-'))
    {
        return Err(StorageError::InvalidContainerName {
            name: name.to_string(),
            reason: "allowed characters are lowercase letters, digits, and hyphens".into(),
        });
    }

    if name.starts_with('-') || name.ends_with('-') {
        return Err(StorageError::InvalidContainerName {
            name: name.to_string(),
            reason: "must start and end with a lowercase letter or digit".into(),
        });
    }

    Ok(())
}

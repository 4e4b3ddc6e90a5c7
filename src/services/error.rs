//! Error kinds shared by the upload and retrieval services.

use crate::{models::stored::MetadataError, storage::StorageError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("file `{0}` not found")]
    NotFound(String),
    #[error("file `{0}` has expired")]
    Expired(String),
    #[error("upload session `{0}` not found")]
    SessionNotFound(String),
    #[error("upload session `{0}` has expired")]
    SessionExpired(String),
    #[error("upload incomplete: {received} of {total} chunks received")]
    IncompleteUpload { received: usize, total: u32 },
    #[error("chunk {0} was recorded but is missing from temporary storage")]
    MissingChunk(u32),
    #[error("file id `{0}` is already in use")]
    FileIdTaken(String),
    #[error("chunk index {index} out of range (total {total})")]
    InvalidChunkIndex { index: u32, total: u32 },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("rate limit exceeded for {0}")]
    RateLimitExceeded(String),
    #[error("storage backend failure: {0}")]
    Storage(#[from] StorageError),
    #[error("session cache failure: {0}")]
    Cache(#[source] anyhow::Error),
    #[error("stored metadata for `{file_id}` is invalid: {source}")]
    Metadata {
        file_id: String,
        #[source]
        source: MetadataError,
    },
    #[error("internal error: {0}")]
    Internal(String),
}

impl TransferError {
    /// Both causes render as "not found" to callers.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Expired(_))
    }

    pub fn is_session_gone(&self) -> bool {
        matches!(self, Self::SessionNotFound(_) | Self::SessionExpired(_))
    }

    /// Backend trouble that a caller may retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Cache(_))
    }
}

pub type TransferResult<T> = Result<T, TransferError>;

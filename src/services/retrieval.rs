//! Lookup and streaming of finalized objects.
//!
//! Expired objects are reported as [`TransferError::Expired`], which the HTTP
//! layer renders exactly like a missing object. They are removed for good by
//! [`RetrievalService::purge_expired`].

use super::{
    error::{TransferError, TransferResult},
    upload::FINAL_CONTAINER,
};
use crate::{
    clock::Clock,
    models::stored::{FileInfo, StoredMetadata},
    storage::{ObjectHandle, StorageBackend, StorageError},
};
use moka::sync::Cache;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;

pub const DEFAULT_INFO_CACHE_TTL_SECS: u64 = 300;
const INFO_CACHE_CAPACITY: u64 = 10_000;

/// An open finalized object plus what the client needs to decrypt it.
#[derive(Debug)]
pub struct Download {
    pub handle: ObjectHandle,
    pub metadata: StoredMetadata,
}

#[derive(Clone)]
pub struct RetrievalService {
    storage: Arc<dyn StorageBackend>,
    clock: Arc<dyn Clock>,
    info_cache: Cache<String, StoredMetadata>,
}

impl RetrievalService {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        clock: Arc<dyn Clock>,
        info_cache_ttl: Duration,
    ) -> Self {
        let info_cache = Cache::builder()
            .max_capacity(INFO_CACHE_CAPACITY)
            .time_to_live(info_cache_ttl)
            .build();
        Self {
            storage,
            clock,
            info_cache,
        }
    }

    /// Public description of `file_id`, served from a short-lived cache.
    pub async fn get_info(&self, file_id: &str) -> TransferResult<FileInfo> {
        let metadata = match self.info_cache.get(file_id) {
            Some(cached) if !cached.is_expired(self.clock.now()) => cached,
            // expired entries may hide a replacement; go back to storage
            _ => {
                let loaded = self.load_metadata(file_id).await?;
                self.info_cache
                    .insert(file_id.to_string(), loaded.clone());
                loaded
            }
        };
        self.ensure_live(file_id, &metadata)?;

        Ok(FileInfo {
            file_id: file_id.to_string(),
            expiration_date: metadata.expiration_date,
            is_multi_file: metadata.is_multi_file,
        })
    }

    /// Open `file_id` for streaming.
    ///
    /// Decryption parameters are always read from storage, never from the
    /// info cache. The returned handle owns the underlying reader; dropping
    /// it at any point releases the resource.
    pub async fn get_content(&self, file_id: &str) -> TransferResult<Download> {
        let metadata = self.load_metadata(file_id).await?;
        self.ensure_live(file_id, &metadata)?;

        let handle = self
            .storage
            .open(FINAL_CONTAINER, file_id)
            .await
            .map_err(|err| lookup_error(file_id, err))?;

        match handle {
            Some(handle) => Ok(Download { handle, metadata }),
            None => {
                self.info_cache.invalidate(file_id);
                Err(TransferError::NotFound(file_id.to_string()))
            }
        }
    }

    /// Drop any cached info for `file_id`. Call after writing it.
    pub fn forget(&self, file_id: &str) {
        self.info_cache.invalidate(file_id);
    }

    /// Remove a finalized object and forget its cached metadata.
    pub async fn delete(&self, file_id: &str) -> TransferResult<()> {
        self.info_cache.invalidate(file_id);
        let deleted = self
            .storage
            .delete(FINAL_CONTAINER, file_id)
            .await
            .map_err(|err| lookup_error(file_id, err));
        // a get_info racing the delete may have re-filled the entry
        self.info_cache.invalidate(file_id);

        if !deleted? {
            return Err(TransferError::NotFound(file_id.to_string()));
        }
        tracing::info!(file_id, "Deleted file");
        Ok(())
    }

    /// Delete every finalized object whose expiration date has passed.
    ///
    /// Objects with unreadable metadata are left alone and logged. Returns
    /// the number of objects removed.
    pub async fn purge_expired(&self) -> TransferResult<usize> {
        let keys = match self.storage.list(FINAL_CONTAINER, None).await {
            Ok(keys) => keys,
            Err(StorageError::ContainerNotFound(_)) => return Ok(0),
            Err(err) => return Err(err.into()),
        };

        let mut removed = 0;
        for file_id in keys {
            match self.load_metadata(&file_id).await {
                Ok(metadata) if metadata.is_expired(self.clock.now()) => {
                    match self.delete(&file_id).await {
                        Ok(()) => removed += 1,
                        Err(TransferError::NotFound(_)) => {}
                        Err(err) => return Err(err),
                    }
                }
                Ok(_) | Err(TransferError::NotFound(_)) => {}
                Err(err @ TransferError::Metadata { .. }) => {
                    tracing::warn!(file_id = %file_id, error = %err, "Skipping file with unreadable metadata");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(removed)
    }

    fn ensure_live(&self, file_id: &str, metadata: &StoredMetadata) -> TransferResult<()> {
        if metadata.is_expired(self.clock.now()) {
            tracing::debug!(
                file_id,
                expired_at = %metadata.expiration_date,
                "Requested file has expired"
            );
            return Err(TransferError::Expired(file_id.to_string()));
        }
        Ok(())
    }

    async fn load_metadata(&self, file_id: &str) -> TransferResult<StoredMetadata> {
        let raw = self
            .storage
            .metadata(FINAL_CONTAINER, file_id)
            .await
            .map_err(|err| lookup_error(file_id, err))?
            .ok_or_else(|| TransferError::NotFound(file_id.to_string()))?;

        StoredMetadata::from_map(&raw).map_err(|source| TransferError::Metadata {
            file_id: file_id.to_string(),
            source,
        })
    }
}

/// Run [`RetrievalService::purge_expired`] every `every` in the background.
pub fn spawn_purger(retrieval: RetrievalService, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match retrieval.purge_expired().await {
                Ok(0) => {}
                Ok(removed) => tracing::info!(removed, "Purged expired files"),
                Err(err) if err.is_transient() => {
                    tracing::warn!(error = %err, "Expired file purge skipped, backend unavailable")
                }
                Err(err) => tracing::error!(error = %err, "Expired file purge failed"),
            }
        }
    })
}

/// A key the backend refuses, or a container never created, means the
/// object cannot exist.
fn lookup_error(file_id: &str, err: StorageError) -> TransferError {
    match err {
        StorageError::ContainerNotFound(_) | StorageError::InvalidObjectKey => {
            TransferError::NotFound(file_id.to_string())
        }
        other => TransferError::Storage(other),
    }
}

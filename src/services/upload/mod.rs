//! Chunked upload pipeline: session start, chunk ingest, finalization,
//! direct bundle uploads and the orphaned-chunk sweeper.
//!
//! Temporary chunks live in [`TEMP_CONTAINER`] under `{session_id}/{index}`;
//! finalized objects live in [`FINAL_CONTAINER`] under their file id.

mod bundle;
mod finalize;
mod ingest;
mod sweep;

pub use bundle::BundleFile;
pub use finalize::FinalizedUpload;
pub use sweep::spawn_sweeper;

use super::{error::TransferResult, session_store::SessionStore};
use crate::{
    clock::Clock,
    models::session::{NewUpload, UploadSession},
    storage::StorageBackend,
};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub const TEMP_CONTAINER: &str = "tempuploads";
pub const FINAL_CONTAINER: &str = "encryptedfiles";

type SessionGuard = Arc<RwLock<()>>;

#[derive(Clone)]
pub struct UploadPipeline {
    storage: Arc<dyn StorageBackend>,
    sessions: SessionStore,
    clock: Arc<dyn Clock>,
    guards: Arc<DashMap<String, SessionGuard>>,
}

impl UploadPipeline {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        sessions: SessionStore,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            sessions,
            clock,
            guards: Arc::new(DashMap::new()),
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Start a chunked upload and return the new session.
    pub async fn initialize(&self, upload: NewUpload) -> TransferResult<UploadSession> {
        self.storage.create_container(TEMP_CONTAINER).await?;
        self.sessions.create(upload).await
    }

    fn chunk_key(session_id: &str, chunk_index: u32) -> String {
        format!("{}/{}", session_id, chunk_index)
    }

    /// The guard shared by every operation on `session_id`.
    fn guard(&self, session_id: &str) -> SessionGuard {
        self.guards
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    /// Drop the registry entry once nobody else holds or waits on it.
    ///
    /// The caller must have dropped its own clone of the guard first.
    fn release_guard(&self, session_id: &str) {
        self.guards
            .remove_if(session_id, |_, guard| Arc::strong_count(guard) == 1);
    }

    /// Number of live guard entries.
    pub fn guard_count(&self) -> usize {
        self.guards.len()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::{
        clock::ManualClock,
        services::cache_store::MemoryCacheStore,
        storage::MemoryStorage,
    };
    use chrono::Duration;

    pub(crate) struct Harness {
        pub pipeline: UploadPipeline,
        pub storage: MemoryStorage,
        pub cache: MemoryCacheStore,
        pub clock: ManualClock,
    }

    pub(crate) fn harness() -> Harness {
        let clock = ManualClock::default();
        let clock_dyn: Arc<dyn Clock> = Arc::new(clock.clone());
        let cache = MemoryCacheStore::new(clock_dyn.clone());
        let storage = MemoryStorage::new();
        let sessions = SessionStore::new(
            Arc::new(cache.clone()),
            clock_dyn.clone(),
            Duration::minutes(30),
        );
        Harness {
            pipeline: UploadPipeline::new(Arc::new(storage.clone()), sessions, clock_dyn),
            storage,
            cache,
            clock,
        }
    }

    pub(crate) fn new_upload(file_id: &str, total_chunks: u32) -> NewUpload {
        NewUpload {
            file_id: file_id.to_string(),
            total_chunks,
            total_size: u64::from(total_chunks),
            iv: vec![7; 12],
            salt: vec![9; 16],
            is_multi_file: false,
            expiration_option: "1d".into(),
        }
    }
}

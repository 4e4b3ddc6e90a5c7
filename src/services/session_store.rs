//! Upload session store.
//!
//! Sessions are serialized into the ephemeral [`CacheStore`] under
//! `upload_{id}` with a sliding TTL. Updates to the received-chunk set go
//! through compare-and-swap so concurrent chunk uploads never lose an index.

use super::{
    cache_store::CacheStore,
    error::{TransferError, TransferResult},
};
use crate::{
    clock::Clock,
    models::session::{NewUpload, UploadSession},
};
use chrono::Duration;
use std::sync::Arc;
use uuid::Uuid;

/// Default lifetime of an idle upload session.
pub const DEFAULT_SESSION_TTL_MINUTES: i64 = 30;

const MAX_CAS_ATTEMPTS: usize = 32;

#[derive(Clone)]
pub struct SessionStore {
    cache: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(cache: Arc<dyn CacheStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { cache, clock, ttl }
    }

    fn cache_key(session_id: &str) -> String {
        format!("upload_{}", session_id)
    }

    /// Allocate a fresh session with an empty received set.
    pub async fn create(&self, upload: NewUpload) -> TransferResult<UploadSession> {
        if upload.total_chunks == 0 {
            return Err(TransferError::InvalidRequest(
                "totalChunks must be positive".into(),
            ));
        }

        let session_id = Uuid::new_v4().to_string();
        let session = UploadSession::new(session_id, upload, self.clock.now() + self.ttl);
        let encoded = encode(&session)?;

        self.cache
            .set(&Self::cache_key(&session.session_id), encoded, self.ttl)
            .await
            .map_err(TransferError::Cache)?;

        tracing::info!(
            session_id = %session.session_id,
            file_id = %session.file_id,
            total_chunks = session.total_chunks,
            total_size = session.total_size,
            "Created upload session"
        );

        Ok(session)
    }

    /// Returns the session, or `None` if it is unknown or the cache dropped it.
    ///
    /// A returned session may still be past `expires_at` if the cache lags;
    /// callers check [`UploadSession::is_expired`].
    pub async fn get(&self, session_id: &str) -> TransferResult<Option<UploadSession>> {
        let raw = self
            .cache
            .get(&Self::cache_key(session_id))
            .await
            .map_err(TransferError::Cache)?;
        raw.map(|bytes| decode(&bytes)).transpose()
    }

    /// Like [`get`](Self::get) but maps absent and expired sessions to errors.
    pub async fn require_live(&self, session_id: &str) -> TransferResult<UploadSession> {
        let session = self
            .get(session_id)
            .await?
            .ok_or_else(|| TransferError::SessionNotFound(session_id.to_string()))?;
        if session.is_expired(self.clock.now()) {
            return Err(TransferError::SessionExpired(session_id.to_string()));
        }
        Ok(session)
    }

    /// Add `chunk_index` to the received set and slide the expiry forward.
    ///
    /// Re-recording an index is a successful no-op apart from the refresh.
    pub async fn record_chunk(
        &self,
        session_id: &str,
        chunk_index: u32,
    ) -> TransferResult<UploadSession> {
        let key = Self::cache_key(session_id);

        for _ in 0..MAX_CAS_ATTEMPTS {
            let raw = self
                .cache
                .get(&key)
                .await
                .map_err(TransferError::Cache)?
                .ok_or_else(|| TransferError::SessionNotFound(session_id.to_string()))?;
            let mut session = decode(&raw)?;

            let now = self.clock.now();
            if session.is_expired(now) {
                return Err(TransferError::SessionExpired(session_id.to_string()));
            }
            if chunk_index >= session.total_chunks {
                return Err(TransferError::InvalidChunkIndex {
                    index: chunk_index,
                    total: session.total_chunks,
                });
            }

            session.received_chunks.insert(chunk_index);
            session.expires_at = now + self.ttl;
            let updated = encode(&session)?;

            if self
                .cache
                .compare_and_swap(&key, &raw, updated, self.ttl)
                .await
                .map_err(TransferError::Cache)?
            {
                return Ok(session);
            }

            tracing::trace!(session_id, chunk_index, "session changed underneath us, retrying");
        }

        Err(TransferError::Internal(format!(
            "gave up updating session {} after {} attempts",
            session_id, MAX_CAS_ATTEMPTS
        )))
    }

    /// Idempotent.
    pub async fn remove(&self, session_id: &str) -> TransferResult<()> {
        self.cache
            .delete(&Self::cache_key(session_id))
            .await
            .map_err(TransferError::Cache)?;
        Ok(())
    }

    /// Round-trips a sentinel value through the cache for `/readyz`.
    pub async fn ping(&self) -> TransferResult<()> {
        let key = format!("readyz_{}", Uuid::new_v4());
        self.cache
            .set(&key, b"ok".to_vec(), Duration::seconds(5))
            .await
            .map_err(TransferError::Cache)?;
        let read_back = self.cache.get(&key).await.map_err(TransferError::Cache)?;
        let _ = self.cache.delete(&key).await;
        if read_back.as_deref() != Some(b"ok".as_slice()) {
            return Err(TransferError::Internal("cache round trip mismatch".into()));
        }
        Ok(())
    }
}

fn encode(session: &UploadSession) -> TransferResult<Vec<u8>> {
    serde_json::to_vec(session)
        .map_err(|err| TransferError::Internal(format!("encoding session: {}", err)))
}

fn decode(raw: &[u8]) -> TransferResult<UploadSession> {
    serde_json::from_slice(raw)
        .map_err(|err| TransferError::Internal(format!("decoding session: {}", err)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::ManualClock, services::cache_store::MemoryCacheStore};

    fn store() -> (SessionStore, ManualClock) {
        let clock = ManualClock::default();
        let clock_dyn: Arc<dyn Clock> = Arc::new(clock.clone());
        let cache = Arc::new(MemoryCacheStore::new(clock_dyn.clone()));
        (
            SessionStore::new(cache, clock_dyn, Duration::minutes(30)),
            clock,
        )
    }

    fn upload(total_chunks: u32) -> NewUpload {
        NewUpload {
            file_id: "file-1".into(),
            total_chunks,
            total_size: 3,
            iv: vec![1, 2, 3],
            salt: vec![4, 5, 6],
            is_multi_file: false,
            expiration_option: "1d".into(),
        }
    }

    #[tokio::test]
    async fn create_and_get() {
        let (store, clock) = store();
        let session = store.create(upload(3)).await.unwrap();

        assert!(session.received_chunks.is_empty());
        assert_eq!(session.expires_at, clock.now() + Duration::minutes(30));
        assert_eq!(store.get(&session.session_id).await.unwrap(), Some(session));
        assert_eq!(store.get("unknown").await.unwrap(), None);
    }

    #[tokio::test]
    async fn zero_chunks_is_rejected() {
        let (store, _clock) = store();
        assert!(matches!(
            store.create(upload(0)).await,
            Err(TransferError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn record_chunk_is_idempotent() {
        let (store, _clock) = store();
        let session = store.create(upload(3)).await.unwrap();

        store.record_chunk(&session.session_id, 1).await.unwrap();
        let updated = store.record_chunk(&session.session_id, 1).await.unwrap();
        assert_eq!(updated.received_chunks.len(), 1);
        assert!(updated.received_chunks.contains(&1));
    }

    #[tokio::test]
    async fn record_chunk_rejects_out_of_range_index() {
        let (store, _clock) = store();
        let session = store.create(upload(2)).await.unwrap();
        assert!(matches!(
            store.record_chunk(&session.session_id, 2).await,
            Err(TransferError::InvalidChunkIndex { index: 2, total: 2 })
        ));
    }

    #[tokio::test]
    async fn activity_slides_the_expiry() {
        let (store, clock) = store();
        let session = store.create(upload(2)).await.unwrap();

        clock.advance(Duration::minutes(20));
        store.record_chunk(&session.session_id, 0).await.unwrap();

        clock.advance(Duration::minutes(20));
        let live = store.require_live(&session.session_id).await.unwrap();
        assert_eq!(live.received_chunks.len(), 1);

        clock.advance(Duration::minutes(11));
        assert!(store.get(&session.session_id).await.unwrap().is_none());
        assert!(matches!(
            store.record_chunk(&session.session_id, 1).await,
            Err(TransferError::SessionNotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_records_keep_every_index() {
        let (store, _clock) = store();
        let session = store.create(upload(16)).await.unwrap();

        let mut handles = Vec::new();
        for idx in 0..16 {
            let store = store.clone();
            let id = session.session_id.clone();
            handles.push(tokio::spawn(async move {
                store.record_chunk(&id, idx).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let done = store.get(&session.session_id).await.unwrap().unwrap();
        assert!(done.is_complete());
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let (store, _clock) = store();
        let session = store.create(upload(1)).await.unwrap();
        store.remove(&session.session_id).await.unwrap();
        store.remove(&session.session_id).await.unwrap();
        assert!(matches!(
            store.require_live(&session.session_id).await,
            Err(TransferError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn ping_round_trips() {
        let (store, _clock) = store();
        store.ping().await.unwrap();
    }
}

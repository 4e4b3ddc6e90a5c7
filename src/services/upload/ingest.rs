use super::{TEMP_CONTAINER, UploadPipeline};
use crate::{
    models::session::UploadSession,
    services::error::{TransferError, TransferResult},
};
use bytes::Bytes;
use std::collections::HashMap;

impl UploadPipeline {
    /// Store one chunk and mark it received.
    ///
    /// Re-sending an index overwrites the earlier bytes. Ingest for different
    /// indices of the same session runs in parallel; it only waits while a
    /// finalize holds the session.
    pub async fn ingest(
        &self,
        session_id: &str,
        chunk_index: u32,
        bytes: Bytes,
    ) -> TransferResult<UploadSession> {
        let guard = self.guard(session_id);
        let result = {
            let _shared = guard.read().await;
            self.ingest_locked(session_id, chunk_index, bytes).await
        };
        drop(guard);
        self.release_guard(session_id);
        result
    }

    async fn ingest_locked(
        &self,
        session_id: &str,
        chunk_index: u32,
        bytes: Bytes,
    ) -> TransferResult<UploadSession> {
        let session = self.sessions.require_live(session_id).await?;
        if chunk_index >= session.total_chunks {
            return Err(TransferError::InvalidChunkIndex {
                index: chunk_index,
                total: session.total_chunks,
            });
        }

        let size = bytes.len();
        self.storage
            .put(
                TEMP_CONTAINER,
                &Self::chunk_key(session_id, chunk_index),
                bytes,
                HashMap::new(),
            )
            .await?;

        let updated = self.sessions.record_chunk(session_id, chunk_index).await?;

        tracing::debug!(
            session_id,
            chunk_index,
            size,
            received = updated.received_chunks.len(),
            total = updated.total_chunks,
            "Stored chunk"
        );

        Ok(updated)
    }
}

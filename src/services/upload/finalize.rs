use super::{FINAL_CONTAINER, TEMP_CONTAINER, UploadPipeline};
use crate::{
    models::{
        session::UploadSession,
        stored::{CipherParams, StoredMetadata},
    },
    services::error::{TransferError, TransferResult},
};
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Duration, SubsecRound, Utc};

/// Outcome of a successful finalize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedUpload {
    pub file_id: String,
    pub size: u64,
    pub expiration_date: DateTime<Utc>,
}

impl UploadPipeline {
    /// Reassemble a complete session into a permanent object under `file_id`.
    ///
    /// Chunks are concatenated in ascending index order regardless of arrival
    /// order. Temporary chunks are deleted only after the permanent write, so
    /// a failed finalize can be retried once the problem is fixed.
    ///
    /// Holds the session exclusively: a concurrent second finalize waits and
    /// then fails with [`TransferError::SessionNotFound`]. A `file_id` still
    /// held by a live object is refused with [`TransferError::FileIdTaken`].
    pub async fn finalize(
        &self,
        session_id: &str,
        file_id: &str,
        expiration_days: i64,
    ) -> TransferResult<FinalizedUpload> {
        validate_file_id(file_id)?;
        let guard = self.guard(session_id);
        let result = {
            let _exclusive = guard.write().await;
            self.finalize_locked(session_id, file_id, expiration_days)
                .await
        };
        drop(guard);
        self.release_guard(session_id);
        result
    }

    async fn finalize_locked(
        &self,
        session_id: &str,
        file_id: &str,
        expiration_days: i64,
    ) -> TransferResult<FinalizedUpload> {
        let session = self.sessions.require_live(session_id).await?;
        if !session.is_complete() {
            return Err(TransferError::IncompleteUpload {
                received: session.received_chunks.len(),
                total: session.total_chunks,
            });
        }
        if session.file_id != file_id {
            tracing::warn!(
                session_id,
                session_file_id = %session.file_id,
                file_id,
                "Finalize file id differs from the one given at initialization"
            );
        }

        let expiration_date = self.expiration_from_now(expiration_days)?;
        let payload = self.assemble(&session).await?;
        let size = payload.len() as u64;

        let metadata = StoredMetadata {
            expiration_date,
            params: CipherParams::Single {
                iv: session.iv.clone(),
                salt: session.salt.clone(),
            },
            is_multi_file: session.is_multi_file,
        };

        let file_key = Self::file_guard_key(file_id);
        let file_guard = self.guard(&file_key);
        let stored = {
            let _claim = file_guard.write().await;
            self.store_unclaimed(file_id, payload, &metadata).await
        };
        drop(file_guard);
        self.release_guard(&file_key);
        stored?;

        for chunk_index in 0..session.total_chunks {
            let key = Self::chunk_key(session_id, chunk_index);
            if let Err(err) = self.storage.delete(TEMP_CONTAINER, &key).await {
                tracing::warn!(
                    session_id,
                    chunk_index,
                    error = %err,
                    "Failed to delete temporary chunk; leaving it for the sweeper"
                );
            }
        }

        if let Err(err) = self.sessions.remove(session_id).await {
            tracing::warn!(session_id, error = %err, "Failed to remove finalized session");
        }

        tracing::info!(
            session_id,
            file_id,
            size,
            chunks = session.total_chunks,
            expiration = %expiration_date,
            "Finalized upload"
        );

        Ok(FinalizedUpload {
            file_id: file_id.to_string(),
            size,
            expiration_date,
        })
    }

    /// Write the permanent object unless a live one already holds `file_id`.
    ///
    /// An expired object under the same id may be replaced.
    async fn store_unclaimed(
        &self,
        file_id: &str,
        payload: Bytes,
        metadata: &StoredMetadata,
    ) -> TransferResult<()> {
        self.storage.create_container(FINAL_CONTAINER).await?;
        if let Some(existing) = self.storage.metadata(FINAL_CONTAINER, file_id).await? {
            let replaceable = StoredMetadata::from_map(&existing)
                .map(|current| current.is_expired(self.clock.now()))
                .unwrap_or(false);
            if !replaceable {
                return Err(TransferError::FileIdTaken(file_id.to_string()));
            }
            tracing::debug!(file_id, "Replacing expired file");
        }
        self.storage
            .put(FINAL_CONTAINER, file_id, payload, metadata.to_map())
            .await?;
        Ok(())
    }

    fn file_guard_key(file_id: &str) -> String {
        format!("file:{}", file_id)
    }

    /// Verify and read every chunk in ascending order.
    async fn assemble(&self, session: &UploadSession) -> TransferResult<Bytes> {
        let mut chunks = Vec::with_capacity(session.total_chunks as usize);
        for chunk_index in 0..session.total_chunks {
            let key = Self::chunk_key(&session.session_id, chunk_index);
            let chunk = self
                .storage
                .get(TEMP_CONTAINER, &key)
                .await?
                .ok_or(TransferError::MissingChunk(chunk_index))?;
            chunks.push(chunk);
        }

        let total: usize = chunks.iter().map(Bytes::len).sum();
        let mut buffer = BytesMut::with_capacity(total);
        for chunk in chunks {
            buffer.extend_from_slice(&chunk);
        }
        Ok(buffer.freeze())
    }

    /// Millisecond precision, matching what the metadata map can hold.
    pub(super) fn expiration_from_now(&self, days: i64) -> TransferResult<DateTime<Utc>> {
        if days < 1 {
            return Err(TransferError::InvalidRequest(
                "expirationDays must be at least 1".into(),
            ));
        }
        Duration::try_days(days)
            .and_then(|span| self.clock.now().checked_add_signed(span))
            .map(|expiry| expiry.trunc_subsecs(3))
            .ok_or_else(|| TransferError::InvalidRequest("expirationDays is too large".into()))
    }
}

/// File ids become storage keys in the permanent container.
fn validate_file_id(file_id: &str) -> TransferResult<()> {
    let valid = !file_id.is_empty()
        && file_id.len() <= 128
        && file_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'));
    if !valid {
        return Err(TransferError::InvalidRequest(format!(
            "invalid file id `{}`",
            file_id
        )));
    }
    Ok(())
}

use super::{TEMP_CONTAINER, UploadPipeline};
use crate::{
    services::error::{TransferError, TransferResult},
    storage::StorageError,
};
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tokio::task::JoinHandle;

impl UploadPipeline {
    /// Delete temporary chunks whose session is gone (expired or abandoned).
    ///
    /// Returns the number of chunk objects removed.
    pub async fn sweep_orphaned_chunks(&self) -> TransferResult<usize> {
        let keys = match self.storage.list(TEMP_CONTAINER, None).await {
            Ok(keys) => keys,
            Err(StorageError::ContainerNotFound(_)) => return Ok(0),
            Err(err) => return Err(err.into()),
        };

        let mut by_session: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for key in keys {
            if let Some((session_id, _)) = key.split_once('/') {
                by_session
                    .entry(session_id.to_string())
                    .or_default()
                    .push(key);
            }
        }

        let mut removed = 0;
        for (session_id, chunk_keys) in by_session {
            let guard = self.guard(&session_id);
            {
                let _exclusive = guard.write().await;
                let live = match self.sessions.get(&session_id).await? {
                    Some(session) => !session.is_expired(self.clock.now()),
                    None => false,
                };
                if !live {
                    for key in &chunk_keys {
                        if self.storage.delete(TEMP_CONTAINER, key).await? {
                            removed += 1;
                        }
                    }
                    tracing::debug!(
                        session_id = %session_id,
                        chunks = chunk_keys.len(),
                        "Swept orphaned chunks"
                    );
                }
            }
            drop(guard);
            self.release_guard(&session_id);
        }

        self.guards
            .retain(|_, guard| Arc::strong_count(guard) > 1);

        Ok(removed)
    }
}

/// Run [`UploadPipeline::sweep_orphaned_chunks`] every `every` in the background.
pub fn spawn_sweeper(pipeline: UploadPipeline, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match pipeline.sweep_orphaned_chunks().await {
                Ok(0) => {}
                Ok(removed) => tracing::info!(removed, "Removed orphaned upload chunks"),
                Err(err @ TransferError::Cache(_)) | Err(err @ TransferError::Storage(_)) => {
                    tracing::warn!(error = %err, "Chunk sweep skipped, backend unavailable")
                }
                Err(err) => tracing::error!(error = %err, "Chunk sweep failed"),
            }
        }
    })
}

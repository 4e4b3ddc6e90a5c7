use crate::{
    services::{
        rate_limiter::RateLimiter, retrieval::RetrievalService, session_store::SessionStore,
        upload::UploadPipeline,
    },
    storage::StorageBackend,
};
use std::sync::Arc;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub uploads: UploadPipeline,
    pub retrieval: RetrievalService,
    pub limiter: RateLimiter,
    pub storage: Arc<dyn StorageBackend>,
}

impl AppState {
    pub fn sessions(&self) -> &SessionStore {
        self.uploads.sessions()
    }
}

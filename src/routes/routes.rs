//! Defines routes for the transfer API.
//!
//! ## Structure
//! - **Health checks** (never rate limited)
//!   - `GET    /healthz`
//!   - `GET    /readyz`
//!
//! - **Download group** (download rate limit)
//!   - `GET    /d/{id}`: file info as JSON
//!   - `GET    /download-file/{fileId}`: ciphertext stream, supports `Range`
//!
//! - **Upload group** (upload rate limit)
//!   - `POST   /upload/init`
//!   - `PUT    /upload/{uploadId}/chunks/{index}`: raw chunk body
//!   - `POST   /upload/{uploadId}/finalize`
//!   - `POST   /upload/bundle`: multipart, already-encrypted files

use crate::{
    handlers::{
        download_handlers::{download_file, file_info},
        health_handlers::{healthz, readyz},
        rate_limit::{limit_downloads, limit_uploads},
        upload_handlers::{finalize_upload, init_upload, upload_bundle, upload_chunk},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{get, post, put},
};

/// Request body caps.
#[derive(Debug, Clone, Copy)]
pub struct BodyLimits {
    pub max_chunk_bytes: usize,
    pub max_bundle_bytes: usize,
}

impl Default for BodyLimits {
    fn default() -> Self {
        Self {
            max_chunk_bytes: 64 * 1024 * 1024,
            max_bundle_bytes: 2 * 1024 * 1024 * 1024,
        }
    }
}

/// Build the full router with state attached.
pub fn routes(state: AppState, limits: BodyLimits) -> Router {
    let downloads = Router::new()
        .route("/d/{id}", get(file_info))
        .route("/download-file/{fileId}", get(download_file))
        .route_layer(from_fn_with_state(state.clone(), limit_downloads));

    let uploads = Router::new()
        .route("/upload/init", post(init_upload))
        .route(
            "/upload/{uploadId}/chunks/{index}",
            put(upload_chunk).layer(DefaultBodyLimit::max(limits.max_chunk_bytes)),
        )
        .route("/upload/{uploadId}/finalize", post(finalize_upload))
        .route(
            "/upload/bundle",
            post(upload_bundle).layer(DefaultBodyLimit::max(limits.max_bundle_bytes)),
        )
        .route_layer(from_fn_with_state(state.clone(), limit_uploads));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .merge(downloads)
        .merge(uploads)
        .with_state(state)
}

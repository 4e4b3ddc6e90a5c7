use crate::services::error::TransferError;
use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// Error rendered at the HTTP boundary as `{"error": ..., "status": ...}`.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn too_many_requests() -> Self {
        Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            "Too many requests. Please try again later.",
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<TransferError> for AppError {
    fn from(err: TransferError) -> Self {
        match &err {
            // absent and expired render identically
            TransferError::NotFound(_) | TransferError::Expired(_) => {
                AppError::not_found("File not found or has expired")
            }
            TransferError::SessionNotFound(_) | TransferError::SessionExpired(_) => {
                AppError::not_found("Upload session not found or has expired")
            }
            TransferError::IncompleteUpload { .. }
            | TransferError::MissingChunk(_)
            | TransferError::FileIdTaken(_) => {
                AppError::new(StatusCode::CONFLICT, err.to_string())
            }
            TransferError::InvalidChunkIndex { .. } | TransferError::InvalidRequest(_) => {
                AppError::bad_request(err.to_string())
            }
            TransferError::RateLimitExceeded(_) => AppError::too_many_requests(),
            TransferError::Storage(_) | TransferError::Cache(_) => {
                tracing::error!(error = %err, "Backend failure while handling request");
                AppError::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Storage temporarily unavailable. Please retry.",
                )
            }
            TransferError::Metadata { .. } | TransferError::Internal(_) => {
                tracing::error!(error = %err, "Unexpected failure while handling request");
                AppError::internal("Internal server error")
            }
        }
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::new(err.status(), err.body_text())
    }
}

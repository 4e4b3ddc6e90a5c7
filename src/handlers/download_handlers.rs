//! HTTP handlers for looking up and downloading finalized files.
//!
//! Bodies are streamed from the storage reader; a single `Range` is served
//! by seeking and capping the reader, so nothing is buffered in memory.

use crate::{
    errors::AppError,
    models::stored::{CipherParams, FileInfo, StoredMetadata},
    services::error::TransferError,
    state::AppState,
    storage::StorageError,
    wire::{
        HEADER_IS_MULTI_FILE, HEADER_IV, HEADER_IVS, HEADER_SALT, HEADER_SALTS, RangeRequest,
        encode_b64, encode_b64_list, encode_bool, parse_range,
    },
};
use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::Response,
};
use std::io::SeekFrom;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

/// `GET /d/{id}`
pub async fn file_info(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<Json<FileInfo>, AppError> {
    let info = state.retrieval.get_info(&file_id).await?;
    Ok(Json(info))
}

/// `GET /download-file/{fileId}`
pub async fn download_file(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let download = state.retrieval.get_content(&file_id).await?;
    let size = download.handle.size;
    let range_header = headers.get(header::RANGE).and_then(|v| v.to_str().ok());

    let mut reader = download.handle.reader;
    let (status, body, length, content_range) = match parse_range(range_header, size) {
        RangeRequest::Full => (
            StatusCode::OK,
            Body::from_stream(ReaderStream::new(reader)),
            size,
            None,
        ),
        RangeRequest::Partial(range) => {
            reader
                .seek(SeekFrom::Start(range.start))
                .await
                .map_err(|err| TransferError::Storage(StorageError::Io(err)))?;
            let capped = reader.take(range.len());
            (
                StatusCode::PARTIAL_CONTENT,
                Body::from_stream(ReaderStream::new(capped)),
                range.len(),
                Some(range.content_range(size)),
            )
        }
        RangeRequest::Unsatisfiable => {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
            insert(
                response.headers_mut(),
                header::CONTENT_RANGE,
                &format!("bytes */{}", size),
            );
            return Ok(response);
        }
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    let resp_headers = response.headers_mut();
    resp_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    resp_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    insert(resp_headers, header::CONTENT_LENGTH, &length.to_string());
    insert(
        resp_headers,
        header::CONTENT_DISPOSITION,
        &format!("attachment; filename=\"{}\"", file_id),
    );
    if let Some(value) = content_range {
        insert(resp_headers, header::CONTENT_RANGE, &value);
    }
    set_cipher_headers(resp_headers, &download.metadata);

    tracing::debug!(file_id = %file_id, status = %status, length, "Serving download");
    Ok(response)
}

/// Non-secret decryption parameters travel as response headers.
fn set_cipher_headers(headers: &mut HeaderMap, metadata: &StoredMetadata) {
    match &metadata.params {
        CipherParams::Single { iv, salt } => {
            insert(headers, HeaderName::from_static(HEADER_IV), &encode_b64(iv));
            insert(headers, HeaderName::from_static(HEADER_SALT), &encode_b64(salt));
        }
        CipherParams::PerFile { ivs, salts } => {
            insert(headers, HeaderName::from_static(HEADER_IVS), &encode_b64_list(ivs));
            insert(
                headers,
                HeaderName::from_static(HEADER_SALTS),
                &encode_b64_list(salts),
            );
        }
    }
    headers.insert(
        HeaderName::from_static(HEADER_IS_MULTI_FILE),
        HeaderValue::from_static(encode_bool(metadata.is_multi_file)),
    );
}

fn insert(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(err) => tracing::warn!(header = %name, error = %err, "Dropping invalid header value"),
    }
}

//! HTTP handlers for the chunked upload lifecycle and direct bundle uploads.

use crate::{
    errors::AppError,
    models::session::NewUpload,
    services::upload::BundleFile,
    state::AppState,
    wire::decode_b64,
};
use axum::{
    Json,
    body::Bytes,
    extract::{Multipart, Path, State},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadReq {
    pub file_id: String,
    pub total_chunks: u32,
    pub total_size: u64,
    pub iv: String,
    pub salt: String,
    #[serde(default)]
    pub is_multi_file: bool,
    #[serde(default)]
    pub expiration_option: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadResp {
    pub upload_id: String,
}

#[derive(Debug, Serialize)]
pub struct ChunkResp {
    pub success: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeReq {
    pub file_id: String,
    pub expiration_days: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredResp {
    pub success: bool,
    pub file_id: String,
}

/// `POST /upload/init`
pub async fn init_upload(
    State(state): State<AppState>,
    Json(req): Json<InitUploadReq>,
) -> Result<Json<InitUploadResp>, AppError> {
    let upload = NewUpload {
        iv: decode_param("iv", &req.iv)?,
        salt: decode_param("salt", &req.salt)?,
        file_id: req.file_id,
        total_chunks: req.total_chunks,
        total_size: req.total_size,
        is_multi_file: req.is_multi_file,
        expiration_option: req.expiration_option,
    };
    let session = state.uploads.initialize(upload).await?;
    Ok(Json(InitUploadResp {
        upload_id: session.session_id,
    }))
}

/// `PUT /upload/{uploadId}/chunks/{index}` with the raw chunk as body.
pub async fn upload_chunk(
    State(state): State<AppState>,
    Path((upload_id, chunk_index)): Path<(String, u32)>,
    body: Bytes,
) -> Result<Json<ChunkResp>, AppError> {
    state.uploads.ingest(&upload_id, chunk_index, body).await?;
    Ok(Json(ChunkResp { success: true }))
}

/// `POST /upload/{uploadId}/finalize`
pub async fn finalize_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
    Json(req): Json<FinalizeReq>,
) -> Result<Json<StoredResp>, AppError> {
    let done = state
        .uploads
        .finalize(&upload_id, &req.file_id, req.expiration_days)
        .await?;
    state.retrieval.forget(&done.file_id);
    Ok(Json(StoredResp {
        success: true,
        file_id: done.file_id,
    }))
}

/// `POST /upload/bundle`
///
/// Multipart fields: repeated `files`, repeated `ivs`, repeated `salts`
/// (base64), and one `expirationDays`.
pub async fn upload_bundle(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<StoredResp>, AppError> {
    let mut files = Vec::new();
    let mut ivs = Vec::new();
    let mut salts = Vec::new();
    let mut expiration_days = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "files" => {
                let file_name = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| AppError::bad_request("each file needs a file name"))?;
                let data = field.bytes().await?;
                files.push(BundleFile {
                    name: file_name,
                    data,
                });
            }
            "ivs" => ivs.push(decode_param("ivs", &field.text().await?)?),
            "salts" => salts.push(decode_param("salts", &field.text().await?)?),
            "expirationDays" => {
                let raw = field.text().await?;
                let days = raw.trim().parse::<i64>().map_err(|_| {
                    AppError::bad_request(format!("expirationDays `{}` is not a number", raw))
                })?;
                expiration_days = Some(days);
            }
            other => tracing::debug!(field = other, "Ignoring unknown multipart field"),
        }
    }

    let expiration_days =
        expiration_days.ok_or_else(|| AppError::bad_request("expirationDays is required"))?;
    let done = state
        .uploads
        .save_bundle(files, ivs, salts, expiration_days)
        .await?;
    Ok(Json(StoredResp {
        success: true,
        file_id: done.file_id,
    }))
}

fn decode_param(field: &str, value: &str) -> Result<Vec<u8>, AppError> {
    match decode_b64(value) {
        Ok(bytes) if !bytes.is_empty() => Ok(bytes),
        Ok(_) => Err(AppError::bad_request(format!("{} must not be empty", field))),
        Err(_) => Err(AppError::bad_request(format!("{} must be base64", field))),
    }
}

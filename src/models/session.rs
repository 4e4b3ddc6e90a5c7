//! Upload sessions: the ephemeral record behind a chunked upload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Parameters supplied by the sender when an upload starts.
#[derive(Clone, Debug)]
pub struct NewUpload {
    pub file_id: String,
    pub total_chunks: u32,
    pub total_size: u64,
    pub iv: Vec<u8>,
    pub salt: Vec<u8>,
    pub is_multi_file: bool,
    pub expiration_option: String,
}

/// An in-flight multi-chunk upload.
///
/// Lives only in the ephemeral cache. It is deleted together with its
/// temporary chunks once the upload is finalized.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct UploadSession {
    /// Opaque token handed back to the client.
    pub session_id: String,

    /// Id the finalized object is expected to be stored under.
    pub file_id: String,

    /// Number of chunks the client announced. Always positive.
    pub total_chunks: u32,

    /// Indices successfully ingested so far.
    pub received_chunks: BTreeSet<u32>,

    /// Declared ciphertext length; informational only.
    pub total_size: u64,

    /// The session is dead after this instant, complete or not.
    pub expires_at: DateTime<Utc>,

    pub iv: Vec<u8>,
    pub salt: Vec<u8>,
    pub is_multi_file: bool,

    /// Retention policy the sender picked for the finalized object.
    pub expiration_option: String,
}

impl UploadSession {
    pub fn new(session_id: String, upload: NewUpload, expires_at: DateTime<Utc>) -> Self {
        Self {
            session_id,
            file_id: upload.file_id,
            total_chunks: upload.total_chunks,
            received_chunks: BTreeSet::new(),
            total_size: upload.total_size,
            expires_at,
            iv: upload.iv,
            salt: upload.salt,
            is_multi_file: upload.is_multi_file,
            expiration_option: upload.expiration_option,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_complete(&self) -> bool {
        self.received_chunks.len() == self.total_chunks as usize
    }

    /// Indices in `[0, total_chunks)` not yet received, ascending.
    pub fn missing_chunks(&self) -> Vec<u32> {
        (0..self.total_chunks)
            .filter(|idx| !self.received_chunks.contains(idx))
            .collect()
    }
}

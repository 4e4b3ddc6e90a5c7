//! Typed view of the metadata map on a finalized object.
//!
//! The storage backend only knows string maps. Everything that reads or
//! writes that map for a finalized object goes through [`StoredMetadata`],
//! which rejects malformed entries instead of guessing.

use crate::wire::{
    META_EXPIRATION_DATE, META_IS_MULTI_FILE, META_IV, META_IVS, META_SALT, META_SALTS,
    decode_b64, decode_b64_list, decode_bool, encode_b64, encode_b64_list, encode_bool,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetadataError {
    #[error("metadata field `{0}` is missing")]
    Missing(&'static str),
    #[error("metadata field `{field}` is malformed: {reason}")]
    Malformed { field: &'static str, reason: String },
}

/// Non-secret parameters the client needs to decrypt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CipherParams {
    /// One ciphertext under one key.
    Single { iv: Vec<u8>, salt: Vec<u8> },
    /// A bundle whose entries were encrypted independently, one pair per entry.
    PerFile { ivs: Vec<Vec<u8>>, salts: Vec<Vec<u8>> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMetadata {
    pub expiration_date: DateTime<Utc>,
    pub params: CipherParams,
    pub is_multi_file: bool,
}

impl StoredMetadata {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration_date < now
    }

    pub fn from_map(map: &HashMap<String, String>) -> Result<Self, MetadataError> {
        let raw_expiration = required(map, META_EXPIRATION_DATE)?;
        let expiration_date = DateTime::parse_from_rfc3339(raw_expiration)
            .map_err(|err| MetadataError::Malformed {
                field: META_EXPIRATION_DATE,
                reason: err.to_string(),
            })?
            .with_timezone(&Utc);

        let raw_multi = required(map, META_IS_MULTI_FILE)?;
        let is_multi_file = decode_bool(raw_multi).ok_or_else(|| MetadataError::Malformed {
            field: META_IS_MULTI_FILE,
            reason: format!("expected true/false, got `{}`", raw_multi),
        })?;

        let params = if map.contains_key(META_IV) || map.contains_key(META_SALT) {
            CipherParams::Single {
                iv: b64_field(map, META_IV)?,
                salt: b64_field(map, META_SALT)?,
            }
        } else if map.contains_key(META_IVS) || map.contains_key(META_SALTS) {
            let ivs = b64_list_field(map, META_IVS)?;
            let salts = b64_list_field(map, META_SALTS)?;
            if ivs.len() != salts.len() {
                return Err(MetadataError::Malformed {
                    field: META_SALTS,
                    reason: format!("{} salts for {} ivs", salts.len(), ivs.len()),
                });
            }
            CipherParams::PerFile { ivs, salts }
        } else {
            return Err(MetadataError::Missing(META_IV));
        };

        Ok(Self {
            expiration_date,
            params,
            is_multi_file,
        })
    }

    pub fn to_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert(
            META_EXPIRATION_DATE.to_string(),
            self.expiration_date
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        );
        map.insert(
            META_IS_MULTI_FILE.to_string(),
            encode_bool(self.is_multi_file).to_string(),
        );
        match &self.params {
            CipherParams::Single { iv, salt } => {
                map.insert(META_IV.to_string(), encode_b64(iv));
                map.insert(META_SALT.to_string(), encode_b64(salt));
            }
            CipherParams::PerFile { ivs, salts } => {
                map.insert(META_IVS.to_string(), encode_b64_list(ivs));
                map.insert(META_SALTS.to_string(), encode_b64_list(salts));
            }
        }
        map
    }
}

/// Public description of a finalized object, as served by `GET /d/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub file_id: String,
    pub expiration_date: DateTime<Utc>,
    pub is_multi_file: bool,
}

fn required<'a>(
    map: &'a HashMap<String, String>,
    field: &'static str,
) -> Result<&'a str, MetadataError> {
    map.get(field)
        .map(String::as_str)
        .ok_or(MetadataError::Missing(field))
}

fn b64_field(map: &HashMap<String, String>, field: &'static str) -> Result<Vec<u8>, MetadataError> {
    decode_b64(required(map, field)?).map_err(|err| MetadataError::Malformed {
        field,
        reason: err.to_string(),
    })
}

fn b64_list_field(
    map: &HashMap<String, String>,
    field: &'static str,
) -> Result<Vec<Vec<u8>>, MetadataError> {
    decode_b64_list(required(map, field)?).ok_or_else(|| MetadataError::Malformed {
        field,
        reason: "expected a JSON array of base64 strings".into(),
    })
}

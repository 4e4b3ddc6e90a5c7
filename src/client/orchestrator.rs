//! Fetch a shared file and turn it back into the sender's original files.

use super::{ClientError, PayloadCipher, PlaintextContainer};
use crate::{
    models::stored::CipherParams,
    wire::{
        HEADER_IS_MULTI_FILE, HEADER_IV, HEADER_IVS, HEADER_SALT, HEADER_SALTS, decode_b64,
        decode_b64_list, decode_bool,
    },
};
use bytes::Bytes;
use percent_encoding::percent_decode_str;
use reqwest::{StatusCode, header::HeaderMap};
use std::{
    io::{Cursor, Read},
    sync::Arc,
};
use url::Url;
use zip::ZipArchive;

/// Ciphertext and parameters as served by `GET /download-file/{fileId}`.
#[derive(Debug, Clone)]
pub struct FetchedPayload {
    pub ciphertext: Bytes,
    pub params: CipherParams,
    pub is_multi_file: bool,
}

impl FetchedPayload {
    pub fn from_parts(headers: &HeaderMap, body: Bytes) -> Result<Self, ClientError> {
        let text = |name: &'static str| headers.get(name).and_then(|v| v.to_str().ok());

        let params = match (text(HEADER_IV), text(HEADER_SALT)) {
            (Some(iv), Some(salt)) => CipherParams::Single {
                iv: b64_header(HEADER_IV, iv)?,
                salt: b64_header(HEADER_SALT, salt)?,
            },
            _ => {
                let ivs = text(HEADER_IVS).ok_or(ClientError::MissingParameter(HEADER_IVS))?;
                let salts =
                    text(HEADER_SALTS).ok_or(ClientError::MissingParameter(HEADER_SALTS))?;
                CipherParams::PerFile {
                    ivs: b64_list_header(HEADER_IVS, ivs)?,
                    salts: b64_list_header(HEADER_SALTS, salts)?,
                }
            }
        };
        let is_multi_file = text(HEADER_IS_MULTI_FILE)
            .and_then(decode_bool)
            .unwrap_or(false);

        Ok(Self {
            ciphertext: body,
            params,
            is_multi_file,
        })
    }
}

/// One original file recovered from a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredFile {
    pub name: String,
    pub mime_type: String,
    pub content: Vec<u8>,
}

impl RecoveredFile {
    fn from_container(container: PlaintextContainer) -> Self {
        let mime_type = if container.file_type.is_empty() {
            guess_mime(&container.file_name)
        } else {
            container.file_type
        };
        Self {
            name: container.file_name,
            mime_type,
            content: container.content,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovered {
    File(RecoveredFile),
    Bundle(Vec<RecoveredFile>),
}

#[derive(Clone)]
pub struct Orchestrator {
    http: reqwest::Client,
    base_url: Url,
    cipher: Arc<dyn PayloadCipher>,
}

impl Orchestrator {
    pub fn new(base_url: Url, cipher: Arc<dyn PayloadCipher>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            cipher,
        }
    }

    /// Download ciphertext and parameters for `file_id`.
    pub async fn fetch(&self, file_id: &str) -> Result<FetchedPayload, ClientError> {
        let url = self
            .base_url
            .join(&format!("download-file/{}", file_id))
            .map_err(|e| ClientError::InvalidParameter {
                name: "fileId",
                reason: e.to_string(),
            })?;

        let response = self.http.get(url).send().await?;
        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => return Err(ClientError::NotFound(file_id.to_string())),
            status => return Err(ClientError::UnexpectedStatus(status.as_u16())),
        }

        let headers = response.headers().clone();
        let body = response.bytes().await?;
        FetchedPayload::from_parts(&headers, body)
    }

    /// Decrypt a fetched payload with `passphrase`.
    ///
    /// CPU heavy (key derivation); call from a blocking context.
    pub fn open(
        &self,
        payload: &FetchedPayload,
        passphrase: &str,
    ) -> Result<Recovered, ClientError> {
        match &payload.params {
            CipherParams::Single { iv, salt } => {
                let container = self.open_container(&payload.ciphertext, iv, salt, passphrase)?;
                if payload.is_multi_file {
                    read_archive(&container.content)
                        .map(|entries| {
                            entries
                                .into_iter()
                                .map(|(name, content)| RecoveredFile {
                                    mime_type: guess_mime(&name),
                                    name,
                                    content,
                                })
                                .collect()
                        })
                        .map(Recovered::Bundle)
                } else {
                    Ok(Recovered::File(RecoveredFile::from_container(container)))
                }
            }
            CipherParams::PerFile { ivs, salts } => {
                let entries = read_archive(&payload.ciphertext)?;
                if entries.len() != ivs.len() || entries.len() != salts.len() {
                    return Err(ClientError::InvalidParameter {
                        name: "ivs",
                        reason: format!(
                            "{} entries but {} ivs and {} salts",
                            entries.len(),
                            ivs.len(),
                            salts.len()
                        ),
                    });
                }
                entries
                    .iter()
                    .zip(ivs.iter().zip(salts))
                    .map(|((_, ciphertext), (iv, salt))| {
                        self.open_container(ciphertext, iv, salt, passphrase)
                            .map(RecoveredFile::from_container)
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(Recovered::Bundle)
            }
        }
    }

    /// [`fetch`](Self::fetch) then [`open`](Self::open) off the async runtime.
    pub async fn download(&self, file_id: &str, passphrase: &str) -> Result<Recovered, ClientError> {
        let payload = self.fetch(file_id).await?;
        let this = self.clone();
        let passphrase = zeroize::Zeroizing::new(passphrase.to_string());
        tokio::task::spawn_blocking(move || this.open(&payload, &passphrase))
            .await
            .map_err(|e| ClientError::Task(e.to_string()))?
    }

    fn open_container(
        &self,
        ciphertext: &[u8],
        iv: &[u8],
        salt: &[u8],
        passphrase: &str,
    ) -> Result<PlaintextContainer, ClientError> {
        let key = self.cipher.derive_key(passphrase, salt)?;
        let plaintext = zeroize::Zeroizing::new(self.cipher.decrypt(&key, iv, ciphertext)?);
        PlaintextContainer::decode(&plaintext)
    }
}

/// Passphrase carried in the URL fragment (`.../d/{id}#passphrase`).
///
/// The fragment never reaches the server. Returns `None` when the URL has
/// no usable fragment.
pub fn passphrase_from_url(link: &str) -> Option<String> {
    let url = Url::parse(link).ok()?;
    let fragment = url.fragment()?;
    let decoded = percent_decode_str(fragment).decode_utf8().ok()?;
    if decoded.is_empty() {
        None
    } else {
        Some(decoded.into_owned())
    }
}

fn read_archive(raw: &[u8]) -> Result<Vec<(String, Vec<u8>)>, ClientError> {
    let archive_err = |e: zip::result::ZipError| ClientError::Archive(e.to_string());
    let mut archive = ZipArchive::new(Cursor::new(raw)).map_err(archive_err)?;
    let mut entries = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(archive_err)?;
        if entry.is_dir() {
            continue;
        }
        let mut content = Vec::new();
        entry
            .read_to_end(&mut content)
            .map_err(|e| ClientError::Archive(e.to_string()))?;
        entries.push((entry.name().to_string(), content));
    }
    Ok(entries)
}

fn guess_mime(name: &str) -> String {
    mime_guess::from_path(name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

fn b64_header(name: &'static str, value: &str) -> Result<Vec<u8>, ClientError> {
    decode_b64(value).map_err(|e| ClientError::InvalidParameter {
        name,
        reason: e.to_string(),
    })
}

fn b64_list_header(name: &'static str, value: &str) -> Result<Vec<Vec<u8>>, ClientError> {
    decode_b64_list(value).ok_or_else(|| ClientError::InvalidParameter {
        name,
        reason: "expected a JSON array of base64 strings".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        client::cipher::{fast_cipher, seal},
        wire::{encode_b64, encode_b64_list},
    };
    use reqwest::header::HeaderValue;
    use std::io::Write;
    use zip::{ZipWriter, write::SimpleFileOptions};

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(
            Url::parse("http://localhost:3000/").unwrap(),
            Arc::new(fast_cipher()),
        )
    }

    fn zip_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn single_headers(iv: &[u8], salt: &[u8], multi: bool) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_IV, HeaderValue::from_str(&encode_b64(iv)).unwrap());
        headers.insert(HEADER_SALT, HeaderValue::from_str(&encode_b64(salt)).unwrap());
        headers.insert(
            HEADER_IS_MULTI_FILE,
            HeaderValue::from_static(if multi { "true" } else { "false" }),
        );
        headers
    }

    #[test]
    fn single_file_round_trip() {
        let orch = orchestrator();
        let container = PlaintextContainer::new("photo.png", "", vec![9, 9, 9]);
        let sealed = seal(&fast_cipher(), "pass phrase", &container.encode().unwrap()).unwrap();

        let payload = FetchedPayload::from_parts(
            &single_headers(&sealed.iv, &sealed.salt, false),
            Bytes::from(sealed.ciphertext),
        )
        .unwrap();

        let recovered = orch.open(&payload, "pass phrase").unwrap();
        assert_eq!(
            recovered,
            Recovered::File(RecoveredFile {
                name: "photo.png".into(),
                mime_type: "image/png".into(),
                content: vec![9, 9, 9],
            })
        );

        assert!(matches!(
            orch.open(&payload, "not it"),
            Err(ClientError::DecryptionFailed)
        ));
    }

    #[test]
    fn multi_file_container_unpacks_its_archive() {
        let orch = orchestrator();
        let archive = zip_of(&[("a.txt", &b"alpha"[..]), ("b.txt", &b"beta"[..])]);
        let container = PlaintextContainer::new("files.zip", "application/zip", archive);
        let sealed = seal(&fast_cipher(), "pw", &container.encode().unwrap()).unwrap();

        let payload = FetchedPayload::from_parts(
            &single_headers(&sealed.iv, &sealed.salt, true),
            Bytes::from(sealed.ciphertext),
        )
        .unwrap();

        let Recovered::Bundle(files) = orch.open(&payload, "pw").unwrap() else {
            panic!("expected a bundle");
        };
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].name, "a.txt");
        assert_eq!(files[0].mime_type, "text/plain");
        assert_eq!(files[1].content, b"beta");
    }

    #[test]
    fn per_file_bundle_decrypts_each_entry_with_its_own_params() {
        let orch = orchestrator();
        let cipher = fast_cipher();
        let first = seal(
            &cipher,
            "pw",
            &PlaintextContainer::new("one.txt", "text/plain", b"1".to_vec())
                .encode()
                .unwrap(),
        )
        .unwrap();
        let second = seal(
            &cipher,
            "pw",
            &PlaintextContainer::new("two.bin", "", b"2".to_vec())
                .encode()
                .unwrap(),
        )
        .unwrap();

        let archive = zip_of(&[
            ("one.txt", first.ciphertext.as_slice()),
            ("two.bin", second.ciphertext.as_slice()),
        ]);
        let mut headers = HeaderMap::new();
        headers.insert(
            HEADER_IVS,
            HeaderValue::from_str(&encode_b64_list(&[first.iv.clone(), second.iv.clone()]))
                .unwrap(),
        );
        headers.insert(
            HEADER_SALTS,
            HeaderValue::from_str(&encode_b64_list(&[first.salt.clone(), second.salt.clone()]))
                .unwrap(),
        );
        headers.insert(HEADER_IS_MULTI_FILE, HeaderValue::from_static("true"));

        let payload = FetchedPayload::from_parts(&headers, Bytes::from(archive)).unwrap();
        assert!(payload.is_multi_file);

        let Recovered::Bundle(files) = orch.open(&payload, "pw").unwrap() else {
            panic!("expected a bundle");
        };
        assert_eq!(files[0].content, b"1");
        assert_eq!(files[1].name, "two.bin");
        assert_eq!(files[1].mime_type, "application/octet-stream");
    }

    #[test]
    fn missing_params_are_reported() {
        let err = FetchedPayload::from_parts(&HeaderMap::new(), Bytes::new()).unwrap_err();
        assert!(matches!(err, ClientError::MissingParameter(HEADER_IVS)));

        let mut headers = HeaderMap::new();
        headers.insert(HEADER_IVS, HeaderValue::from_static("[]"));
        let err = FetchedPayload::from_parts(&headers, Bytes::new()).unwrap_err();
        assert!(matches!(err, ClientError::MissingParameter(HEADER_SALTS)));
    }

    #[test]
    fn passphrase_comes_from_the_fragment() {
        assert_eq!(
            passphrase_from_url("https://host/d/abc#my%20secret%2Fkey").as_deref(),
            Some("my secret/key")
        );
        assert_eq!(passphrase_from_url("https://host/d/abc"), None);
        assert_eq!(passphrase_from_url("https://host/d/abc#"), None);
        assert_eq!(passphrase_from_url("not a url"), None);
    }
}

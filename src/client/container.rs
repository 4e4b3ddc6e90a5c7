//! Self-describing plaintext container carried inside the ciphertext.
//!
//! Layout: `u32` big-endian header length, a JSON header
//! `{"fileName": ..., "fileType": ...}`, then the raw file content. For a
//! multi-file upload the content is a zip archive of the original files.

use super::ClientError;
use serde::{Deserialize, Serialize};

const LEN_PREFIX: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContainerHeader {
    file_name: String,
    #[serde(default)]
    file_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaintextContainer {
    pub file_name: String,
    /// MIME type as recorded by the sender; may be empty.
    pub file_type: String,
    pub content: Vec<u8>,
}

impl PlaintextContainer {
    pub fn new(
        file_name: impl Into<String>,
        file_type: impl Into<String>,
        content: Vec<u8>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            file_type: file_type.into(),
            content,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ClientError> {
        let header = serde_json::to_vec(&ContainerHeader {
            file_name: self.file_name.clone(),
            file_type: self.file_type.clone(),
        })
        .map_err(|e| ClientError::MalformedContainer(e.to_string()))?;
        let header_len = u32::try_from(header.len())
            .map_err(|_| ClientError::MalformedContainer("header too large".into()))?;

        let mut out = Vec::with_capacity(LEN_PREFIX + header.len() + self.content.len());
        out.extend_from_slice(&header_len.to_be_bytes());
        out.extend_from_slice(&header);
        out.extend_from_slice(&self.content);
        Ok(out)
    }

    pub fn decode(raw: &[u8]) -> Result<Self, ClientError> {
        let (prefix, rest) = raw
            .split_first_chunk::<LEN_PREFIX>()
            .ok_or_else(|| ClientError::MalformedContainer("missing header length".into()))?;
        let header_len = u32::from_be_bytes(*prefix) as usize;
        if header_len > rest.len() {
            return Err(ClientError::MalformedContainer(format!(
                "header length {} exceeds payload of {} bytes",
                header_len,
                rest.len()
            )));
        }

        let (header, content) = rest.split_at(header_len);
        let header: ContainerHeader = serde_json::from_slice(header)
            .map_err(|e| ClientError::MalformedContainer(e.to_string()))?;

        Ok(Self {
            file_name: header.file_name,
            file_type: header.file_type,
            content: content.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_length_prefixed_json_then_content() {
        let container = PlaintextContainer::new("notes.txt", "text/plain", b"hello".to_vec());
        let raw = container.encode().unwrap();

        let header_len = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize;
        let header: serde_json::Value = serde_json::from_slice(&raw[4..4 + header_len]).unwrap();
        assert_eq!(header["fileName"], "notes.txt");
        assert_eq!(header["fileType"], "text/plain");
        assert_eq!(&raw[4 + header_len..], b"hello");

        assert_eq!(PlaintextContainer::decode(&raw).unwrap(), container);
    }

    #[test]
    fn missing_file_type_defaults_to_empty() {
        let header = br#"{"fileName":"a.bin"}"#;
        let mut raw = (header.len() as u32).to_be_bytes().to_vec();
        raw.extend_from_slice(header);
        raw.extend_from_slice(&[1, 2, 3]);

        let decoded = PlaintextContainer::decode(&raw).unwrap();
        assert_eq!(decoded.file_type, "");
        assert_eq!(decoded.content, vec![1, 2, 3]);
    }

    #[test]
    fn truncated_input_is_rejected() {
        assert!(PlaintextContainer::decode(&[0, 0]).is_err());
        assert!(PlaintextContainer::decode(&[0, 0, 0, 50, b'{']).is_err());
        assert!(PlaintextContainer::decode(&[0, 0, 0, 2, b'n', b'o']).is_err());
    }
}

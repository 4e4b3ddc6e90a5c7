use super::{FINAL_CONTAINER, UploadPipeline, finalize::FinalizedUpload};
use crate::{
    models::stored::{CipherParams, StoredMetadata},
    services::error::{TransferError, TransferResult},
};
use bytes::Bytes;
use std::{
    collections::HashSet,
    io::{Cursor, Write},
    path::Path,
};
use uuid::Uuid;
use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

/// One already-encrypted file in a direct bundle upload.
#[derive(Debug, Clone)]
pub struct BundleFile {
    pub name: String,
    pub data: Bytes,
}

impl UploadPipeline {
    /// Pack independently encrypted files into one zip object.
    ///
    /// `ivs[i]` and `salts[i]` belong to `files[i]`; entry order follows
    /// upload order. The object gets a freshly generated file id.
    pub async fn save_bundle(
        &self,
        files: Vec<BundleFile>,
        ivs: Vec<Vec<u8>>,
        salts: Vec<Vec<u8>>,
        expiration_days: i64,
    ) -> TransferResult<FinalizedUpload> {
        if files.is_empty() {
            return Err(TransferError::InvalidRequest(
                "a bundle needs at least one file".into(),
            ));
        }
        if ivs.len() != files.len() || salts.len() != files.len() {
            return Err(TransferError::InvalidRequest(format!(
                "{} files need as many ivs and salts (got {} and {})",
                files.len(),
                ivs.len(),
                salts.len()
            )));
        }
        let expiration_date = self.expiration_from_now(expiration_days)?;

        let entries = entry_names(&files)?;
        let file_count = files.len();
        let archive = tokio::task::spawn_blocking(move || zip_entries(entries, files))
            .await
            .map_err(|err| TransferError::Internal(format!("bundle task failed: {}", err)))??;

        let file_id = Uuid::new_v4().to_string();
        let size = archive.len() as u64;
        let metadata = StoredMetadata {
            expiration_date,
            params: CipherParams::PerFile { ivs, salts },
            is_multi_file: true,
        };

        self.storage.create_container(FINAL_CONTAINER).await?;
        self.storage
            .put(FINAL_CONTAINER, &file_id, archive, metadata.to_map())
            .await?;

        tracing::info!(
            file_id = %file_id,
            files = file_count,
            size,
            expiration = %expiration_date,
            "Stored bundle upload"
        );

        Ok(FinalizedUpload {
            file_id,
            size,
            expiration_date,
        })
    }
}

/// Reduce each name to its final path component and reject duplicates.
fn entry_names(files: &[BundleFile]) -> TransferResult<Vec<String>> {
    let mut seen = HashSet::new();
    files
        .iter()
        .map(|file| {
            let name = Path::new(&file.name)
                .file_name()
                .and_then(|n| n.to_str())
                .filter(|n| !n.is_empty())
                .ok_or_else(|| {
                    TransferError::InvalidRequest(format!("invalid file name `{}`", file.name))
                })?
                .to_string();
            if !seen.insert(name.clone()) {
                return Err(TransferError::InvalidRequest(format!(
                    "duplicate file name `{}`",
                    name
                )));
            }
            Ok(name)
        })
        .collect()
}

fn zip_entries(names: Vec<String>, files: Vec<BundleFile>) -> TransferResult<Bytes> {
    let zip_err = |err: zip::result::ZipError| {
        TransferError::Internal(format!("writing bundle archive: {}", err))
    };
    let io_err =
        |err: std::io::Error| TransferError::Internal(format!("writing bundle archive: {}", err));

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, file) in names.into_iter().zip(files) {
        writer.start_file(name, options).map_err(zip_err)?;
        writer.write_all(&file.data).map_err(io_err)?;
    }
    let cursor = writer.finish().map_err(zip_err)?;
    Ok(Bytes::from(cursor.into_inner()))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::harness;
    use super::*;
    use crate::{clock::Clock, storage::StorageBackend};
    use chrono::{Duration, SubsecRound};
    use std::io::Read;
    use zip::ZipArchive;

    fn file(name: &str, data: &'static [u8]) -> BundleFile {
        BundleFile {
            name: name.into(),
            data: Bytes::from_static(data),
        }
    }

    #[tokio::test]
    async fn bundle_is_zipped_with_per_file_params() {
        let h = harness();
        let done = h
            .pipeline
            .save_bundle(
                vec![file("a.bin", b"first"), file("dir/b.bin", b"second")],
                vec![vec![1; 12], vec![2; 12]],
                vec![vec![3; 16], vec![4; 16]],
                7,
            )
            .await
            .unwrap();

        assert!(Uuid::parse_str(&done.file_id).is_ok());
        assert_eq!(
            done.expiration_date,
            (h.clock.now() + Duration::days(7)).trunc_subsecs(3)
        );

        let meta = h
            .storage
            .metadata(FINAL_CONTAINER, &done.file_id)
            .await
            .unwrap()
            .unwrap();
        let parsed = StoredMetadata::from_map(&meta).unwrap();
        assert!(parsed.is_multi_file);
        assert_eq!(
            parsed.params,
            CipherParams::PerFile {
                ivs: vec![vec![1; 12], vec![2; 12]],
                salts: vec![vec![3; 16], vec![4; 16]],
            }
        );

        let raw = h
            .storage
            .get(FINAL_CONTAINER, &done.file_id)
            .await
            .unwrap()
            .unwrap();
        let mut archive = ZipArchive::new(Cursor::new(raw.to_vec())).unwrap();
        assert_eq!(archive.len(), 2);

        let mut entry = archive.by_index(0).unwrap();
        assert_eq!(entry.name(), "a.bin");
        let mut content = Vec::new();
        entry.read_to_end(&mut content).unwrap();
        assert_eq!(content, b"first");
        drop(entry);

        let entry = archive.by_index(1).unwrap();
        assert_eq!(entry.name(), "b.bin");
    }

    #[tokio::test]
    async fn mismatched_params_are_rejected() {
        let h = harness();
        let err = h
            .pipeline
            .save_bundle(
                vec![file("a", b"1"), file("b", b"2")],
                vec![vec![1; 12]],
                vec![vec![3; 16], vec![4; 16]],
                1,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::InvalidRequest(_)));
        assert_eq!(h.storage.object_count(FINAL_CONTAINER), 0);
    }

    #[tokio::test]
    async fn empty_and_duplicate_bundles_are_rejected() {
        let h = harness();
        assert!(matches!(
            h.pipeline.save_bundle(vec![], vec![], vec![], 1).await,
            Err(TransferError::InvalidRequest(_))
        ));
        assert!(matches!(
            h.pipeline
                .save_bundle(
                    vec![file("x/a", b"1"), file("y/a", b"2")],
                    vec![vec![0; 12]; 2],
                    vec![vec![0; 16]; 2],
                    1,
                )
                .await,
            Err(TransferError::InvalidRequest(_))
        ));
    }
}

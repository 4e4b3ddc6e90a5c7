//! src/storage/disk.rs
//!
//! DiskStorage: durable backend with SQLite for object metadata and local
//! disk for payloads. Payloads are sharded beneath
//! `base_path/{container}/{shard}/{shard}/{key}`.

use super::{
    ObjectHandle, StorageBackend, StorageError, StorageResult, ensure_container_name_safe,
    ensure_key_safe,
};
use crate::models::{container::Container, metadata::ObjectMetadata, object::ObjectRecord};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::{
    collections::HashMap,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

const MIGRATION_SQL: &str = include_str!("../../migrations/0001_init.sql");

/// Run the embedded SQLite migration.
pub async fn run_migrations(db: &SqlitePool) -> StorageResult<()> {
    let statements = MIGRATION_SQL
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }

    Ok(())
}

/// DiskStorage keeps the object table and its string metadata in SQLite and
/// the payload bytes in files.
///
/// Writes go to a temporary file that is fsynced and renamed into place, so
/// a reader never observes a half-written payload.
#[derive(Clone)]
pub struct DiskStorage {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where payloads are stored.
    pub base_path: PathBuf,
}

impl DiskStorage {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    fn container_root(&self, container: &str) -> PathBuf {
        let mut path = self.base_path.clone();
        path.push(container);
        path
    }

    /// Two-level shard identifiers: first two bytes of MD5(container/key).
    fn object_shards(container: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", container, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, container: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(container, key);
        let mut path = self.container_root(container);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    async fn fetch_container(&self, name: &str) -> StorageResult<Container> {
        ensure_container_name_safe(name)?;
        sqlx::query_as::<Sqlite, Container>(
            "SELECT id, name, created_at FROM containers WHERE name = ?",
        )
        .bind(name)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::ContainerNotFound(name.to_string()),
            other => StorageError::Sqlx(other),
        })
    }

    async fn fetch_object(
        &self,
        container: &Container,
        key: &str,
    ) -> StorageResult<Option<ObjectRecord>> {
        let record = sqlx::query_as::<_, ObjectRecord>(
            "SELECT id, container_id, key, size_bytes, etag, last_modified
             FROM objects
             WHERE key = ? AND container_id = ?",
        )
        .bind(key)
        .bind(container.id)
        .fetch_optional(&*self.db)
        .await?;
        Ok(record)
    }

    /// Write `data` to its sharded path through a fsynced temporary file.
    ///
    /// Cleans up the temporary file on every error path.
    async fn write_payload(&self, file_path: &Path, data: &[u8]) -> StorageResult<()> {
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        if let Err(err) = file.write_all(data).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(file_path).await?;
                fs::rename(&tmp_path, file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }
        Ok(())
    }

    /// Upsert the object row and replace its metadata rows in one transaction.
    async fn record_object(
        &self,
        container: &Container,
        key: &str,
        size_bytes: i64,
        etag: &str,
        metadata: &HashMap<String, String>,
    ) -> StorageResult<()> {
        let mut tx = self.db.begin().await?;

        let object_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO objects (id, container_id, key, size_bytes, etag, last_modified)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(container_id, key) DO UPDATE SET
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(container.id)
        .bind(key)
        .bind(size_bytes)
        .bind(etag)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM object_metadata WHERE object_id = ?")
            .bind(object_id)
            .execute(&mut *tx)
            .await?;

        for (meta_key, value) in metadata {
            sqlx::query(
                "INSERT INTO object_metadata (id, object_id, key, value) VALUES (?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4())
            .bind(object_id)
            .bind(meta_key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Recursively remove empty directories up to the container root.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl StorageBackend for DiskStorage {
    async fn create_container(&self, container: &str) -> StorageResult<()> {
        ensure_container_name_safe(container)?;
        fs::create_dir_all(self.container_root(container)).await?;

        sqlx::query(
            "INSERT INTO containers (id, name, created_at) VALUES (?, ?, ?)
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(container)
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    async fn put(
        &self,
        container: &str,
        key: &str,
        data: Bytes,
        metadata: HashMap<String, String>,
    ) -> StorageResult<()> {
        ensure_key_safe(key)?;
        let container_rec = self.fetch_container(container).await?;
        let file_path = self.object_path(&container_rec.name, key);

        self.write_payload(&file_path, &data).await?;

        let etag = format!("{:x}", md5::compute(&data));
        if let Err(err) = self
            .record_object(&container_rec, key, data.len() as i64, &etag, &metadata)
            .await
        {
            let _ = fs::remove_file(&file_path).await;
            return Err(err);
        }
        Ok(())
    }

    async fn exists(&self, container: &str, key: &str) -> StorageResult<bool> {
        ensure_key_safe(key)?;
        let container_rec = self.fetch_container(container).await?;
        Ok(self.fetch_object(&container_rec, key).await?.is_some())
    }

    async fn metadata(
        &self,
        container: &str,
        key: &str,
    ) -> StorageResult<Option<HashMap<String, String>>> {
        ensure_key_safe(key)?;
        let container_rec = self.fetch_container(container).await?;
        let Some(object) = self.fetch_object(&container_rec, key).await? else {
            return Ok(None);
        };

        let rows = sqlx::query_as::<_, ObjectMetadata>(
            "SELECT id, object_id, key, value FROM object_metadata WHERE object_id = ?",
        )
        .bind(object.id)
        .fetch_all(&*self.db)
        .await?;

        Ok(Some(
            rows.into_iter().map(|row| (row.key, row.value)).collect(),
        ))
    }

    async fn get(&self, container: &str, key: &str) -> StorageResult<Option<Bytes>> {
        ensure_key_safe(key)?;
        let container_rec = self.fetch_container(container).await?;
        if self.fetch_object(&container_rec, key).await?.is_none() {
            return Ok(None);
        }

        match fs::read(self.object_path(&container_rec.name, key)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    /// Returns `Ok(None)` if the row exists but the payload file is missing.
    async fn open(&self, container: &str, key: &str) -> StorageResult<Option<ObjectHandle>> {
        ensure_key_safe(key)?;
        let container_rec = self.fetch_container(container).await?;
        if self.fetch_object(&container_rec, key).await?.is_none() {
            return Ok(None);
        }

        let file_path = self.object_path(&container_rec.name, key);
        let file = match File::open(&file_path).await {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StorageError::Io(err)),
        };
        let size = file.metadata().await?.len();

        Ok(Some(ObjectHandle {
            reader: Box::new(file),
            size,
        }))
    }

    /// Hard-delete the row and its metadata, then remove the payload file and
    /// prune empty shard directories.
    async fn delete(&self, container: &str, key: &str) -> StorageResult<bool> {
        ensure_key_safe(key)?;
        let container_rec = self.fetch_container(container).await?;
        let Some(object) = self.fetch_object(&container_rec, key).await? else {
            return Ok(false);
        };

        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM object_metadata WHERE object_id = ?")
            .bind(object.id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM objects WHERE id = ?")
            .bind(object.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        let file_path = self.object_path(&container_rec.name, key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            let root = self.container_root(&container_rec.name);
            self.prune_empty_dirs(parent, &root).await;
        }

        Ok(true)
    }

    async fn list(&self, container: &str, prefix: Option<&str>) -> StorageResult<Vec<String>> {
        let container_rec = self.fetch_container(container).await?;

        let mut builder =
            QueryBuilder::<Sqlite>::new("SELECT key FROM objects WHERE container_id = ");
        builder.push_bind(container_rec.id);

        if let Some(prefix) = prefix {
            builder.push(" AND key LIKE ");
            builder.push_bind(format!("{}%", escape_like(prefix)));
            builder.push(" ESCAPE '\\'");
        }

        builder.push(" ORDER BY key ASC");

        let keys = builder
            .build_query_scalar::<String>()
            .fetch_all(&*self.db)
            .await?;
        Ok(keys)
    }

    /// Runs `SELECT 1` and a write/read/delete round trip under `base_path`.
    async fn ping(&self) -> StorageResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;

        let tmp_path = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&tmp_path, b"readyz").await?;
        let read_back = fs::read(&tmp_path).await;
        let _ = fs::remove_file(&tmp_path).await;
        if read_back? != b"readyz" {
            return Err(StorageError::Io(io::Error::new(
                ErrorKind::InvalidData,
                "file content mismatch",
            )));
        }
        Ok(())
    }
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

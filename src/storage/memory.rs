//! In-memory storage backend.
//!
//! Objects live in per-container ordered maps behind a `DashMap`. Nothing is
//! persisted. Used by tests and by embedders that do not need durability.

use super::{
    ObjectHandle, StorageBackend, StorageError, StorageResult, ensure_container_name_safe,
    ensure_key_safe,
};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::{
    collections::{BTreeMap, HashMap},
    io::{self, Cursor},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

#[derive(Clone)]
struct MemoryObject {
    data: Bytes,
    metadata: HashMap<String, String>,
}

/// Non-persistent [`StorageBackend`].
///
/// Cloning shares the underlying maps.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    containers: Arc<DashMap<String, BTreeMap<String, MemoryObject>>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with an I/O error until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of objects currently held in `container`.
    pub fn object_count(&self, container: &str) -> usize {
        self.containers
            .get(container)
            .map(|objects| objects.len())
            .unwrap_or(0)
    }

    fn check_available(&self) -> StorageResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                "memory storage marked unavailable",
            )));
        }
        Ok(())
    }

    fn lookup(&self, container: &str, key: &str) -> StorageResult<Option<MemoryObject>> {
        self.check_available()?;
        ensure_key_safe(key)?;
        let objects = self
            .containers
            .get(container)
            .ok_or_else(|| StorageError::ContainerNotFound(container.to_string()))?;
        Ok(objects.get(key).cloned())
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn create_container(&self, container: &str) -> StorageResult<()> {
        self.check_available()?;
        ensure_container_name_safe(container)?;
        self.containers.entry(container.to_string()).or_default();
        Ok(())
    }

    async fn put(
        &self,
        container: &str,
        key: &str,
        data: Bytes,
        metadata: HashMap<String, String>,
    ) -> StorageResult<()> {
        self.check_available()?;
        ensure_key_safe(key)?;
        let mut objects = self
            .containers
            .get_mut(container)
            .ok_or_else(|| StorageError::ContainerNotFound(container.to_string()))?;
        objects.insert(key.to_string(), MemoryObject { data, metadata });
        Ok(())
    }

    async fn exists(&self, container: &str, key: &str) -> StorageResult<bool> {
        Ok(self.lookup(container, key)?.is_some())
    }

    async fn metadata(
        &self,
        container: &str,
        key: &str,
    ) -> StorageResult<Option<HashMap<String, String>>> {
        Ok(self.lookup(container, key)?.map(|obj| obj.metadata))
    }

    async fn get(&self, container: &str, key: &str) -> StorageResult<Option<Bytes>> {
        Ok(self.lookup(container, key)?.map(|obj| obj.data))
    }

    async fn open(&self, container: &str, key: &str) -> StorageResult<Option<ObjectHandle>> {
        Ok(self.lookup(container, key)?.map(|obj| ObjectHandle {
            size: obj.data.len() as u64,
            reader: Box::new(Cursor::new(obj.data)),
        }))
    }

    async fn delete(&self, container: &str, key: &str) -> StorageResult<bool> {
        self.check_available()?;
        ensure_key_safe(key)?;
        let mut objects = self
            .containers
            .get_mut(container)
            .ok_or_else(|| StorageError::ContainerNotFound(container.to_string()))?;
        Ok(objects.remove(key).is_some())
    }

    async fn list(&self, container: &str, prefix: Option<&str>) -> StorageResult<Vec<String>> {
        self.check_available()?;
        let objects = self
            .containers
            .get(container)
            .ok_or_else(|| StorageError::ContainerNotFound(container.to_string()))?;
        Ok(objects
            .keys()
            .filter(|key| prefix.is_none_or(|p| key.starts_with(p)))
            .cloned()
            .collect())
    }

    async fn ping(&self) -> StorageResult<()> {
        self.check_available()
    }
}

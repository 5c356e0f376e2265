//! In-memory object storage backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use crate::error::StoreError;
use crate::presign::Presigner;
use crate::traits::{ObjectStore, StorageCapacity};

type Containers = HashMap<String, BTreeMap<String, Bytes>>;

/// In-memory object store backed by a `RwLock<HashMap>`.
///
/// Useful for testing and for nodes configured to run in memory-only mode.
/// Tracks total bytes stored against a configurable maximum.
pub struct MemoryStore {
    containers: RwLock<Containers>,
    max_bytes: u64,
    presigner: Presigner,
}

impl MemoryStore {
    /// Create a new in-memory store with the given capacity limit.
    pub fn new(max_bytes: u64) -> Self {
        Self {
            containers: RwLock::new(HashMap::new()),
            max_bytes,
            presigner: Presigner::new("memory://", "memory"),
        }
    }

    /// Sign URLs with `presigner` instead of the built-in one.
    pub fn with_presigner(mut self, presigner: Presigner) -> Self {
        self.presigner = presigner;
        self
    }

    /// Number of objects held across all containers.
    pub fn object_count(&self) -> usize {
        let map = self.containers.read().expect("lock poisoned");
        map.values().map(BTreeMap::len).sum()
    }

    fn used_bytes_unlocked(map: &Containers) -> u64 {
        map.values()
            .flat_map(BTreeMap::values)
            .map(|v| v.len() as u64)
            .sum()
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryStore {
    async fn ensure_container(&self, container: &str) -> Result<(), StoreError> {
        let mut map = self.containers.write().expect("lock poisoned");
        map.entry(container.to_string()).or_default();
        Ok(())
    }

    async fn put(&self, container: &str, key: &str, data: Bytes) -> Result<(), StoreError> {
        let mut map = self.containers.write().expect("lock poisoned");
        let used = Self::used_bytes_unlocked(&map);

        let objects = map
            .get_mut(container)
            .ok_or_else(|| StoreError::NoSuchContainer(container.to_string()))?;

        // Replacing an object frees its old size.
        let existing_len = objects.get(key).map_or(0, |v| v.len() as u64);
        let net_increase = (data.len() as u64).saturating_sub(existing_len);
        if used + net_increase > self.max_bytes {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::StorageFull,
                format!(
                    "memory store full: need {net_increase} bytes, {} available",
                    self.max_bytes.saturating_sub(used)
                ),
            )));
        }

        debug!(container, key, size = data.len(), "storing object in memory");
        objects.insert(key.to_string(), data);
        Ok(())
    }

    async fn get(&self, container: &str, key: &str) -> Result<Option<Bytes>, StoreError> {
        let map = self.containers.read().expect("lock poisoned");
        Ok(map.get(container).and_then(|c| c.get(key)).cloned())
    }

    async fn head(&self, container: &str, key: &str) -> Result<Option<u64>, StoreError> {
        let map = self.containers.read().expect("lock poisoned");
        Ok(map
            .get(container)
            .and_then(|c| c.get(key))
            .map(|v| v.len() as u64))
    }

    async fn delete(&self, container: &str, key: &str) -> Result<(), StoreError> {
        let mut map = self.containers.write().expect("lock poisoned");
        if let Some(objects) = map.get_mut(container) {
            objects.remove(key);
        }
        debug!(container, key, "deleted object from memory");
        Ok(())
    }

    async fn list(&self, container: &str) -> Result<Vec<String>, StoreError> {
        let map = self.containers.read().expect("lock poisoned");
        Ok(map
            .get(container)
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn presign(
        &self,
        container: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<String, StoreError> {
        Ok(self.presigner.sign(container, key, ttl))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn capacity(&self) -> Result<StorageCapacity, StoreError> {
        let map = self.containers.read().expect("lock poisoned");
        let used = Self::used_bytes_unlocked(&map);
        Ok(StorageCapacity {
            total_bytes: self.max_bytes,
            used_bytes: used,
            available_bytes: self.max_bytes.saturating_sub(used),
        })
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("max_bytes", &self.max_bytes)
            .field("objects", &self.object_count())
            .finish()
    }
}

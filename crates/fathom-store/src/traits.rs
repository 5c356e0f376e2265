//! Core trait and types for per-node object storage.

use std::time::Duration;

use bytes::Bytes;

use crate::error::StoreError;

/// Capacity information for a storage backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageCapacity {
    /// Total capacity in bytes.
    pub total_bytes: u64,
    /// Bytes currently used.
    pub used_bytes: u64,
    /// Bytes available for new data.
    pub available_bytes: u64,
}

impl StorageCapacity {
    /// Used space in percent, `None` when the total is unknown.
    pub fn usage_percent(&self) -> Option<f64> {
        (self.total_bytes > 0).then(|| self.used_bytes as f64 / self.total_bytes as f64 * 100.0)
    }
}

/// An S3-style backend: named containers holding keyed objects.
///
/// Each storage node is one `ObjectStore`; its objects live in a container
/// named after the node. All implementations must be `Send + Sync` for use
/// across async tasks.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create the container if it does not exist.
    async fn ensure_container(&self, container: &str) -> Result<(), StoreError>;

    /// Store an object, replacing any previous value.
    async fn put(&self, container: &str, key: &str, data: Bytes) -> Result<(), StoreError>;

    /// Retrieve an object. Returns `None` if not found.
    async fn get(&self, container: &str, key: &str) -> Result<Option<Bytes>, StoreError>;

    /// Size of an object in bytes. Returns `None` if not found.
    async fn head(&self, container: &str, key: &str) -> Result<Option<u64>, StoreError>;

    /// Delete an object. Deleting a missing object is not an error.
    async fn delete(&self, container: &str, key: &str) -> Result<(), StoreError>;

    /// Every key in the container. A missing container lists as empty.
    async fn list(&self, container: &str) -> Result<Vec<String>, StoreError>;

    /// Time-limited URL granting direct read access to one object.
    async fn presign(&self, container: &str, key: &str, ttl: Duration)
    -> Result<String, StoreError>;

    /// Cheap liveness probe.
    async fn health_check(&self) -> Result<(), StoreError>;

    /// Report current storage capacity.
    async fn capacity(&self) -> Result<StorageCapacity, StoreError>;
}

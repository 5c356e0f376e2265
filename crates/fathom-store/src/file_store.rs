//! File-based object storage backend.
//!
//! Each container is a directory under the base dir and each key a relative
//! path inside it: `{base_dir}/{container}/{key}`. Keys such as
//! `tenant/3/abc` therefore fan out into nested directories.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::presign::Presigner;
use crate::traits::{ObjectStore, StorageCapacity};

const PARTIAL_SUFFIX: &str = ".partial";

/// File-based object store.
///
/// Writes are atomic: data is written to a temporary file first, then
/// renamed into place, so readers never see a half-written object.
pub struct FileStore {
    base_dir: PathBuf,
    presigner: Presigner,
}

impl FileStore {
    /// Create a new file store rooted at the given directory.
    ///
    /// The directory is created if it does not exist.
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir)?;
        let presigner = Presigner::new(format!("file://{}", base_dir.display()), "file");
        Ok(Self {
            base_dir,
            presigner,
        })
    }

    /// Sign URLs with `presigner` instead of the built-in one.
    pub fn with_presigner(mut self, presigner: Presigner) -> Self {
        self.presigner = presigner;
        self
    }

    fn container_path(&self, container: &str) -> Result<PathBuf, StoreError> {
        if container.is_empty() || !is_plain_relative(Path::new(container)) || container.contains('/')
        {
            return Err(StoreError::InvalidKey(container.to_string()));
        }
        Ok(self.base_dir.join(container))
    }

    fn object_path(&self, container: &str, key: &str) -> Result<PathBuf, StoreError> {
        let dir = self.container_path(container)?;
        if key.is_empty() || key.ends_with(PARTIAL_SUFFIX) || !is_plain_relative(Path::new(key)) {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(dir.join(key))
    }
}

/// Only normal components: no root, no `..`, no `.`.
fn is_plain_relative(path: &Path) -> bool {
    path.components().all(|c| matches!(c, Component::Normal(_)))
}

#[async_trait::async_trait]
impl ObjectStore for FileStore {
    async fn ensure_container(&self, container: &str) -> Result<(), StoreError> {
        let dir = self.container_path(container)?;
        tokio::fs::create_dir_all(&dir).await?;
        Ok(())
    }

    async fn put(&self, container: &str, key: &str, data: Bytes) -> Result<(), StoreError> {
        let path = self.object_path(container, key)?;
        if !tokio::fs::try_exists(self.container_path(container)?).await? {
            return Err(StoreError::NoSuchContainer(container.to_string()));
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(PARTIAL_SUFFIX);
        let tmp_path = PathBuf::from(tmp_name);
        tokio::fs::write(&tmp_path, &data).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        debug!(container, key, path = %path.display(), size = data.len(), "stored object to file");
        Ok(())
    }

    async fn get(&self, container: &str, key: &str) -> Result<Option<Bytes>, StoreError> {
        let path = self.object_path(container, key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn head(&self, container: &str, key: &str) -> Result<Option<u64>, StoreError> {
        let path = self.object_path(container, key)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn delete(&self, container: &str, key: &str) -> Result<(), StoreError> {
        let path = self.object_path(container, key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(container, key, "deleted object file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn list(&self, container: &str) -> Result<Vec<String>, StoreError> {
        let root = self.container_path(container)?;
        let mut keys = Vec::new();
        let mut pending = vec![root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StoreError::Io(e)),
            };
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                let path = entry.path();
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }
                if !file_type.is_file() {
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.ends_with(PARTIAL_SUFFIX) {
                    continue;
                }
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn presign(
        &self,
        container: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<String, StoreError> {
        self.object_path(container, key)?;
        Ok(self.presigner.sign(container, key, ttl))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        let meta = tokio::fs::metadata(&self.base_dir).await?;
        if !meta.is_dir() {
            return Err(StoreError::Unavailable(format!(
                "{} is not a directory",
                self.base_dir.display()
            )));
        }
        Ok(())
    }

    async fn capacity(&self) -> Result<StorageCapacity, StoreError> {
        let path = self.base_dir.clone();
        tokio::task::spawn_blocking(move || statvfs(&path))
            .await
            .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
    }
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("base_dir", &self.base_dir)
            .finish_non_exhaustive()
    }
}

/// Get filesystem capacity information using `libc::statvfs`.
#[cfg(unix)]
fn statvfs(path: &Path) -> Result<StorageCapacity, StoreError> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    // SAFETY: `c_path` is a valid null-terminated C string and `stat` is a
    // zero-initialized out-parameter; both outlive the call.
    let stat = unsafe {
        let mut stat: libc::statvfs = std::mem::zeroed();
        if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
            return Err(StoreError::Io(std::io::Error::last_os_error()));
        }
        stat
    };

    let block_size = stat.f_frsize as u64;
    let total = stat.f_blocks as u64 * block_size;
    let available = stat.f_bavail as u64 * block_size;
    let used = total.saturating_sub(stat.f_bfree as u64 * block_size);

    if total > 0 && used as f64 / total as f64 > 0.9 {
        warn!(path = %path.display(), used, total, "filesystem more than 90% full");
    }

    Ok(StorageCapacity {
        total_bytes: total,
        used_bytes: used,
        available_bytes: available,
    })
}

#[cfg(not(unix))]
fn statvfs(_path: &Path) -> Result<StorageCapacity, StoreError> {
    Ok(StorageCapacity::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const KEY: &str = "tenant/7/deadbeef";

    async fn make_store() -> (FileStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        store.ensure_container("node-a").await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let (store, dir) = make_store().await;
        let data = Bytes::from_static(b"hello file object");

        store.put("node-a", KEY, data.clone()).await.unwrap();
        assert_eq!(store.get("node-a", KEY).await.unwrap(), Some(data.clone()));
        assert_eq!(store.head("node-a", KEY).await.unwrap(), Some(data.len() as u64));

        let on_disk = dir.path().join("node-a").join("tenant").join("7").join("deadbeef");
        assert_eq!(std::fs::read(on_disk).unwrap(), data.as_ref());
    }

    #[tokio::test]
    async fn test_put_requires_container() {
        let (store, _dir) = make_store().await;
        let result = store.put("node-b", KEY, Bytes::from_static(b"x")).await;
        assert!(matches!(result, Err(StoreError::NoSuchContainer(_))));
    }

    #[tokio::test]
    async fn test_missing_object() {
        let (store, _dir) = make_store().await;
        assert_eq!(store.get("node-a", KEY).await.unwrap(), None);
        assert_eq!(store.head("node-a", KEY).await.unwrap(), None);
        store.delete("node-a", KEY).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_walks_nested_keys() {
        let (store, _dir) = make_store().await;
        for key in ["tenant/1/b", "tenant/0/a", "tenant/1/c"] {
            store
                .put("node-a", key, Bytes::from_static(b"x"))
                .await
                .unwrap();
        }
        assert_eq!(
            store.list("node-a").await.unwrap(),
            vec!["tenant/0/a", "tenant/1/b", "tenant/1/c"]
        );
        assert!(store.list("node-z").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let (store, _dir) = make_store().await;
        for key in ["../escape", "/abs", "tenant/../../x", ""] {
            assert!(
                matches!(
                    store.put("node-a", key, Bytes::from_static(b"x")).await,
                    Err(StoreError::InvalidKey(_))
                ),
                "{key:?} should be rejected"
            );
        }
        assert!(store.ensure_container("..").await.is_err());
    }

    #[tokio::test]
    async fn test_atomic_write_no_partial_file_left() {
        let (store, dir) = make_store().await;
        store
            .put("node-a", KEY, Bytes::from_static(b"atomic"))
            .await
            .unwrap();

        let partial = dir
            .path()
            .join("node-a")
            .join(format!("{KEY}{PARTIAL_SUFFIX}"));
        assert!(!partial.exists());
        assert_eq!(store.list("node-a").await.unwrap(), vec![KEY]);
    }

    #[tokio::test]
    async fn test_health_and_capacity() {
        let (store, _dir) = make_store().await;
        store.health_check().await.unwrap();
        let cap = store.capacity().await.unwrap();
        assert!(cap.total_bytes > 0);
    }

    #[tokio::test]
    async fn test_presign_validates_key() {
        let (store, _dir) = make_store().await;
        let url = store
            .presign("node-a", KEY, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(url.starts_with("file://"));
        assert!(store.presign("node-a", "../x", Duration::from_secs(1)).await.is_err());
    }
}

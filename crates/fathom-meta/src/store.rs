//! [`MetaStore`] implementation wrapping Fjall keyspaces.

use std::path::Path;

use fathom_types::{ContentHash, DomainName, NodeName, TenantId};
use fjall::{Database, Keyspace, KeyspaceCreateOptions};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::MetaError;

type Result<T> = std::result::Result<T, MetaError>;

/// A write acknowledged with fewer copies than the replication factor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradedWriteRecord {
    /// Hash of the object.
    pub content_hash: ContentHash,
    /// Nodes that acknowledged the write before quorum was reached.
    pub written_nodes: Vec<NodeName>,
    /// Active domains still lacking a copy.
    pub missing_domains: Vec<DomainName>,
    /// Tenant owning the object.
    pub tenant: TenantId,
    /// Creation time, Unix milliseconds.
    pub created_at_ms: u64,
}

/// Metadata store backed by Fjall.
pub struct MetaStore {
    #[allow(dead_code)]
    db: Database,
    /// ContentHash → serialized [`DegradedWriteRecord`].
    degraded_writes: Keyspace,
    /// Keeps the directory of a temporary store alive.
    _tmp: Option<TempDir>,
}

impl MetaStore {
    /// Open a persistent MetaStore at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::builder(path).open()?;
        Self::init_keyspaces(db, None)
    }

    /// Open a temporary MetaStore that is cleaned up on drop.
    ///
    /// Useful for tests and memory-only nodes.
    pub fn open_temporary() -> Result<Self> {
        let tmp = tempfile::tempdir()?;
        let db = Database::builder(tmp.path()).temporary(true).open()?;
        Self::init_keyspaces(db, Some(tmp))
    }

    fn init_keyspaces(db: Database, tmp: Option<TempDir>) -> Result<Self> {
        let degraded_writes = db.keyspace("degraded_writes", KeyspaceCreateOptions::default)?;
        Ok(Self {
            db,
            degraded_writes,
            _tmp: tmp,
        })
    }

    // ----- Degraded writes -----

    /// Insert or replace the record for `record.content_hash`.
    pub fn put_degraded(&self, record: &DegradedWriteRecord) -> Result<()> {
        let value = postcard::to_allocvec(record)?;
        self.degraded_writes
            .insert(record.content_hash.as_str().as_bytes(), value.as_slice())?;
        debug!(hash = %record.content_hash, "stored degraded write record");
        Ok(())
    }

    /// Record for a content hash.
    pub fn get_degraded(&self, hash: &str) -> Result<Option<DegradedWriteRecord>> {
        match self.degraded_writes.get(hash.as_bytes())? {
            Some(bytes) => Ok(Some(postcard::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Delete a record. Returns whether one existed.
    pub fn remove_degraded(&self, hash: &str) -> Result<bool> {
        let existed = self.degraded_writes.get(hash.as_bytes())?.is_some();
        if existed {
            self.degraded_writes.remove(hash.as_bytes())?;
            debug!(hash, "removed degraded write record");
        }
        Ok(existed)
    }

    /// All records, ordered by hash. Undecodable entries are skipped.
    pub fn list_degraded(&self) -> Result<Vec<DegradedWriteRecord>> {
        let mut records = Vec::new();
        for guard in self.degraded_writes.iter() {
            let (key, value) = guard.into_inner()?;
            match postcard::from_bytes::<DegradedWriteRecord>(&value) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    key = %String::from_utf8_lossy(&key),
                    error = %e,
                    "skipping undecodable degraded write record"
                ),
            }
        }
        Ok(records)
    }

    /// Number of records.
    ///
    /// Note: this is an O(n) scan.
    pub fn degraded_count(&self) -> Result<usize> {
        let mut count = 0;
        for guard in self.degraded_writes.iter() {
            let _ = guard.key()?;
            count += 1;
        }
        Ok(count)
    }
}

impl std::fmt::Debug for MetaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaStore")
            .field("temporary", &self._tmp.is_some())
            .finish_non_exhaustive()
    }
}

//! Bookkeeping for writes that landed in fewer domains than required.

use std::sync::{Arc, Mutex};

use fathom_meta::{DegradedWriteRecord, MetaStore};
use fathom_placement::Topology;
use fathom_types::events::{DegradedWriteRecorded, EventBus};
use fathom_types::{ContentHash, DomainName, NodeName, TenantId, unix_millis};
use tracing::{debug, info};

use crate::error::RepairError;

/// Owns the persistent set of [`DegradedWriteRecord`]s.
///
/// A record lists the active domains still lacking a copy. Domains are
/// removed as recovery copies succeed and the record is deleted once none
/// remain.
pub struct DegradedWriteTracker {
    meta: Arc<MetaStore>,
    topology: Arc<Topology>,
    events: EventBus,
    /// Serializes read-modify-write updates of records.
    update: Mutex<()>,
}

impl DegradedWriteTracker {
    /// Create a tracker persisting into `meta`.
    pub fn new(meta: Arc<MetaStore>, topology: Arc<Topology>, events: EventBus) -> Self {
        Self {
            meta,
            topology,
            events,
            update: Mutex::new(()),
        }
    }

    /// Active domains not covered by any of `written`.
    pub fn missing_domains(&self, written: &[NodeName]) -> Vec<DomainName> {
        let snapshot = self.topology.snapshot();
        let covered: Vec<&DomainName> = written
            .iter()
            .filter_map(|node| snapshot.node_domain(node))
            .collect();
        snapshot
            .active_domains()
            .iter()
            .filter(|d| !covered.contains(d))
            .cloned()
            .collect()
    }

    /// Record a degraded write. Nothing is stored when every active domain
    /// already has a copy; `Ok(None)` is returned in that case.
    pub fn record(
        &self,
        hash: &ContentHash,
        written: &[NodeName],
        tenant: TenantId,
    ) -> Result<Option<DegradedWriteRecord>, RepairError> {
        let missing_domains = self.missing_domains(written);
        if missing_domains.is_empty() {
            debug!(%hash, "write covers every active domain, nothing to track");
            return Ok(None);
        }

        let record = DegradedWriteRecord {
            content_hash: hash.clone(),
            written_nodes: written.to_vec(),
            missing_domains: missing_domains.clone(),
            tenant,
            created_at_ms: unix_millis(),
        };
        {
            let _guard = self.update.lock().expect("tracker lock poisoned");
            self.meta.put_degraded(&record)?;
        }

        info!(%hash, ?missing_domains, "recorded degraded write");
        self.events.emit(DegradedWriteRecorded {
            hash: hash.clone(),
            missing_domains,
        });
        Ok(Some(record))
    }

    /// Every pending record.
    pub fn pending(&self) -> Result<Vec<DegradedWriteRecord>, RepairError> {
        Ok(self.meta.list_degraded()?)
    }

    /// Records still waiting for a copy in `domain`.
    pub fn pending_for_domain(
        &self,
        domain: &DomainName,
    ) -> Result<Vec<DegradedWriteRecord>, RepairError> {
        Ok(self
            .pending()?
            .into_iter()
            .filter(|r| r.missing_domains.contains(domain))
            .collect())
    }

    /// Remove `domain` from the record of `hash`, deleting the record when no
    /// domain is left. Returns `true` once the record is gone.
    pub fn mark_domain_synced(&self, hash: &str, domain: &DomainName) -> Result<bool, RepairError> {
        let _guard = self.update.lock().expect("tracker lock poisoned");
        let Some(mut record) = self.meta.get_degraded(hash)? else {
            return Ok(true);
        };

        record.missing_domains.retain(|d| d != domain);
        if record.missing_domains.is_empty() {
            self.meta.remove_degraded(hash)?;
            info!(hash, %domain, "degraded write fully synced");
            return Ok(true);
        }

        self.meta.put_degraded(&record)?;
        debug!(hash, %domain, remaining = ?record.missing_domains, "domain synced");
        Ok(false)
    }

    /// Drop a record regardless of its missing domains.
    pub fn remove(&self, hash: &str) -> Result<bool, RepairError> {
        let _guard = self.update.lock().expect("tracker lock poisoned");
        Ok(self.meta.remove_degraded(hash)?)
    }

    /// Number of pending records.
    pub fn pending_count(&self) -> Result<usize, RepairError> {
        Ok(self.meta.degraded_count()?)
    }
}

impl std::fmt::Debug for DegradedWriteTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DegradedWriteTracker")
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

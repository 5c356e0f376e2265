//! Cross-domain consistency repair.
//!
//! Two entry points share [`copy_object`]:
//!
//! - **Audits** compare every pair of active domains and copy objects that
//!   exist on one side only. Scheduled audits take [`AUDIT_LOCK_KEY`] so only
//!   one instance audits at a time.
//! - **Immediate repairs** copy one object the write path could not place on
//!   a target before quorum. They run in spawned tasks bounded by a permit
//!   pool and retry with exponential backoff.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use fathom_types::events::ObjectRepaired;
use fathom_types::{DomainName, NodeName, RepairConfig, hash_from_key};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::context::RepairContext;
use crate::copy::{copy_object, list_objects};

/// Lock taken by scheduled and manual audits.
pub const AUDIT_LOCK_KEY: &str = "fathom:repair:audit";

/// Outcome of one audit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RepairStats {
    /// Domain pairs compared.
    pub domain_pairs_checked: u64,
    /// Distinct objects seen across compared pairs.
    pub objects_checked: u64,
    /// Objects copied into a domain that lacked them.
    pub objects_repaired: u64,
    /// Listings or copies that failed.
    pub failures: u64,
}

impl RepairStats {
    fn merge(&mut self, other: RepairStats) {
        self.domain_pairs_checked += other.domain_pairs_checked;
        self.objects_checked += other.objects_checked;
        self.objects_repaired += other.objects_repaired;
        self.failures += other.failures;
    }
}

/// Objects held by one domain: key → first healthy node listing it.
type DomainListing = BTreeMap<String, NodeName>;

/// Audits and immediate repairs.
pub struct ConsistencyRepair {
    ctx: RepairContext,
    config: RepairConfig,
    permits: Arc<Semaphore>,
}

impl ConsistencyRepair {
    /// Create the service.
    pub fn new(ctx: RepairContext, config: RepairConfig) -> Arc<Self> {
        Arc::new(Self {
            permits: Arc::new(Semaphore::new(config.immediate_permits)),
            ctx,
            config,
        })
    }

    /// Settings in use.
    pub fn config(&self) -> &RepairConfig {
        &self.config
    }

    // ----- Audits -----

    /// Periodic audit entry point.
    ///
    /// Skipped (`None`) when repair is disabled, when only one domain is
    /// active, or when another instance holds the audit lock.
    pub async fn run_scheduled_audit(&self) -> Option<RepairStats> {
        if !self.config.enabled {
            debug!("consistency repair disabled");
            return None;
        }
        self.locked_audit().await
    }

    /// Operator-requested audit. Ignores the enabled flag but still takes
    /// the audit lock; `None` means an audit is already running.
    pub async fn trigger_manual_audit(&self) -> Option<RepairStats> {
        info!("manual consistency audit requested");
        self.locked_audit().await
    }

    async fn locked_audit(&self) -> Option<RepairStats> {
        if self.ctx.topology.is_single_domain() {
            debug!("single-domain deployment, skipping audit");
            return None;
        }

        let lease = Duration::from_secs(self.config.lock_lease_secs);
        let Some(token) = self.ctx.lock.try_acquire(AUDIT_LOCK_KEY, lease).await else {
            info!("audit already running on another instance, skipping");
            return None;
        };

        info!("starting consistency audit");
        let stats = self.audit_all().await;
        self.ctx.lock.release(AUDIT_LOCK_KEY, token).await;

        info!(
            pairs = stats.domain_pairs_checked,
            checked = stats.objects_checked,
            repaired = stats.objects_repaired,
            failures = stats.failures,
            "consistency audit finished"
        );
        Some(stats)
    }

    /// Compare every pair of active domains and copy one-sided objects.
    ///
    /// Runs without the lock; callers wanting exclusivity go through
    /// [`run_scheduled_audit`](Self::run_scheduled_audit).
    #[tracing::instrument(skip(self))]
    pub async fn audit_all(&self) -> RepairStats {
        let snapshot = self.ctx.topology.snapshot();
        let health = self.ctx.health.as_ref();
        let mut stats = RepairStats::default();

        // Domains without a healthy node cannot be compared.
        let mut listings: Vec<(DomainName, DomainListing)> = Vec::new();
        for domain in snapshot.active_domains() {
            let healthy = snapshot.healthy_nodes_in_domain(domain, health);
            if healthy.is_empty() {
                warn!(%domain, "no healthy node, domain left out of audit");
                continue;
            }
            let (listing, failures) = self.list_domain(&healthy).await;
            stats.failures += failures;
            listings.push((domain.clone(), listing));
        }

        for i in 0..listings.len() {
            for j in (i + 1)..listings.len() {
                let (a, list_a) = &listings[i];
                let (b, list_b) = &listings[j];
                stats.merge(self.repair_pair(a, list_a, b, list_b).await);
            }
        }
        stats
    }

    /// Union of the listings of `nodes`, remembering one holder per key.
    async fn list_domain(&self, nodes: &[NodeName]) -> (DomainListing, u64) {
        let mut listing = DomainListing::new();
        let mut failures = 0;
        for node in nodes {
            match list_objects(&self.ctx.pool, node, &self.ctx.limits).await {
                Ok(keys) => {
                    for key in keys {
                        listing.entry(key).or_insert_with(|| node.clone());
                    }
                }
                Err(e) => {
                    warn!(%node, error = %e, "failed to list node");
                    failures += 1;
                }
            }
        }
        (listing, failures)
    }

    async fn repair_pair(
        &self,
        a: &DomainName,
        list_a: &DomainListing,
        b: &DomainName,
        list_b: &DomainListing,
    ) -> RepairStats {
        let keys: BTreeSet<&String> = list_a.keys().chain(list_b.keys()).collect();
        let mut stats = RepairStats {
            domain_pairs_checked: 1,
            objects_checked: keys.len() as u64,
            ..Default::default()
        };

        let only_a: Vec<(&String, &NodeName)> = list_a
            .iter()
            .filter(|(k, _)| !list_b.contains_key(*k))
            .collect();
        let only_b: Vec<(&String, &NodeName)> = list_b
            .iter()
            .filter(|(k, _)| !list_a.contains_key(*k))
            .collect();

        if only_a.is_empty() && only_b.is_empty() {
            debug!(%a, %b, "domains consistent");
            return stats;
        }
        info!(%a, %b, only_a = only_a.len(), only_b = only_b.len(), "domains diverge");

        for (missing, into) in [(&only_a, b), (&only_b, a)] {
            for batch in missing.chunks(self.config.batch_size.max(1)) {
                for (key, holder) in batch {
                    if self.copy_into_domain(key, holder, into).await {
                        stats.objects_repaired += 1;
                    } else {
                        stats.failures += 1;
                    }
                }
                tokio::task::yield_now().await;
            }
        }
        stats
    }

    async fn copy_into_domain(&self, key: &str, source: &NodeName, domain: &DomainName) -> bool {
        let Some(hash) = hash_from_key(key) else {
            warn!(key, "skipping key without a content hash");
            return false;
        };
        let target = self.ctx.topology.healthy_target_in_domain(
            hash,
            domain,
            self.ctx.health.as_ref(),
        );
        let Some(target) = target else {
            warn!(key, %domain, "no healthy target in domain");
            return false;
        };

        match copy_object(&self.ctx.pool, key, source, &target, &self.ctx.limits).await {
            Ok(_) => {
                debug!(key, %source, %target, "audit copied object");
                self.emit_repaired(key, source, &target);
                true
            }
            Err(e) => {
                error!(key, %source, %target, error = %e, "audit copy failed");
                false
            }
        }
    }

    // ----- Immediate repairs -----

    /// Copy `key` from `source` to `target` in the background.
    ///
    /// Returns `false` without doing anything when every repair permit is in
    /// use.
    pub fn schedule_immediate_repair(
        self: &Arc<Self>,
        key: String,
        source: NodeName,
        target: NodeName,
    ) -> bool {
        let Ok(permit) = self.permits.clone().try_acquire_owned() else {
            warn!(key, %source, %target, "immediate repair queue full, skipping");
            return false;
        };

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = permit;
            this.repair_with_retry(&key, &source, &target).await;
        });
        true
    }

    /// Repair permits currently free.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Copy with bounded retries. Returns whether the copy succeeded.
    ///
    /// Gives up at once if `source` is offline. An offline `target` or a
    /// failed copy waits `base * 2^(attempt-1)` before the next attempt.
    #[tracing::instrument(skip(self))]
    pub async fn repair_with_retry(&self, key: &str, source: &NodeName, target: &NodeName) -> bool {
        let health = self.ctx.health.as_ref();
        let attempts = self.config.max_attempts;

        for attempt in 1..=attempts {
            if !health.is_online(source) {
                warn!(attempt, "source offline, abandoning repair");
                return false;
            }

            if !health.is_online(target) {
                warn!(attempt, "target offline");
            } else {
                match copy_object(&self.ctx.pool, key, source, target, &self.ctx.limits).await {
                    Ok(bytes) => {
                        info!(attempt, bytes, "object repaired");
                        self.emit_repaired(key, source, target);
                        return true;
                    }
                    Err(e) => warn!(attempt, error = %e, "repair attempt failed"),
                }
            }

            if attempt < attempts {
                let backoff = self.backoff(attempt);
                debug!(backoff_ms = backoff.as_millis(), "retrying repair");
                tokio::time::sleep(backoff).await;
            }
        }

        error!(attempts, "repair gave up after exhausting retries");
        false
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.config.base_backoff_ms.saturating_mul(factor))
    }

    fn emit_repaired(&self, key: &str, source: &NodeName, target: &NodeName) {
        self.ctx.events.emit(ObjectRepaired {
            key: key.to_string(),
            source: source.clone(),
            target: target.clone(),
        });
    }
}

impl std::fmt::Debug for ConsistencyRepair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsistencyRepair")
            .field("config", &self.config)
            .field("available_permits", &self.available_permits())
            .finish_non_exhaustive()
    }
}

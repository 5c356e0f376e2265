//! Domain recovery: drain degraded-write records once their missing domains
//! are reachable again.
//!
//! Two triggers feed the same [`RecoveryListener::attempt_sync`]: a
//! `NodeOnline` topology event and a periodic poll that catches anything the
//! events missed. An in-flight flag makes concurrent triggers in this process
//! no-ops, and [`RECOVERY_LOCK_KEY`] keeps other instances out while a sync
//! runs.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use fathom_types::events::{EventReceiver, NodeTopologyChanged, TopologyChange};
use fathom_types::{DegradedWriteConfig, DomainName, NodeName, ObjectPath, RecoveryConfig};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::consistency::ConsistencyRepair;
use crate::context::RepairContext;
use crate::degraded::DegradedWriteTracker;

/// Lock held while a recovery sync runs.
pub const RECOVERY_LOCK_KEY: &str = "fathom:recovery:lock";

/// What started a sync. Only used for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerSource {
    /// A node of `domain` came back online.
    NodeOnline {
        /// The node.
        node: NodeName,
        /// Its domain, if known.
        domain: Option<DomainName>,
    },
    /// Periodic sweep.
    Poll,
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NodeOnline {
                node,
                domain: Some(domain),
            } => write!(f, "node {node} online in {domain}"),
            Self::NodeOnline { node, domain: None } => write!(f, "node {node} online"),
            Self::Poll => f.write_str("poll"),
        }
    }
}

/// Result of one sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Records examined.
    pub records_checked: usize,
    /// (record, domain) pairs copied and marked synced.
    pub domains_synced: usize,
    /// Records deleted because nothing is missing any more.
    pub records_completed: usize,
    /// (record, domain) pairs left pending: no healthy source or target, or
    /// the copy failed.
    pub still_pending: usize,
}

/// Recovery for degraded writes.
pub struct RecoveryListener {
    ctx: RepairContext,
    tracker: Arc<DegradedWriteTracker>,
    repair: Arc<ConsistencyRepair>,
    degraded: DegradedWriteConfig,
    config: RecoveryConfig,
    in_flight: AtomicBool,
}

impl RecoveryListener {
    /// Create the listener.
    pub fn new(
        ctx: RepairContext,
        tracker: Arc<DegradedWriteTracker>,
        repair: Arc<ConsistencyRepair>,
        degraded: DegradedWriteConfig,
        config: RecoveryConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            tracker,
            repair,
            degraded,
            config,
            in_flight: AtomicBool::new(false),
        })
    }

    /// Whether degraded writes can exist and are tracked.
    pub fn enabled(&self) -> bool {
        self.degraded.enabled && self.degraded.track_for_sync
    }

    /// Copy every pending record into the missing domains that are reachable
    /// now.
    ///
    /// Returns `None` if a sync is already running here or on another
    /// instance.
    pub async fn attempt_sync(&self, trigger: TriggerSource) -> Option<SyncReport> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(%trigger, "recovery sync already running");
            return None;
        }

        let lease = Duration::from_secs(self.repair.config().lock_lease_secs);
        let Some(token) = self.ctx.lock.try_acquire(RECOVERY_LOCK_KEY, lease).await else {
            info!(%trigger, "recovery sync running on another instance, skipping");
            self.in_flight.store(false, Ordering::Release);
            return None;
        };

        let report = self.sync_all(&trigger).await;
        self.ctx.lock.release(RECOVERY_LOCK_KEY, token).await;
        self.in_flight.store(false, Ordering::Release);

        if report.records_checked > 0 {
            info!(
                %trigger,
                checked = report.records_checked,
                synced = report.domains_synced,
                completed = report.records_completed,
                pending = report.still_pending,
                "recovery sync finished"
            );
        }
        Some(report)
    }

    async fn sync_all(&self, trigger: &TriggerSource) -> SyncReport {
        let mut report = SyncReport::default();
        let records = match self.tracker.pending() {
            Ok(records) => records,
            Err(e) => {
                error!(%trigger, error = %e, "failed to load degraded-write records");
                return report;
            }
        };
        debug!(%trigger, count = records.len(), "recovery sync started");

        let health = self.ctx.health.as_ref();
        for record in records {
            report.records_checked += 1;
            let hash = record.content_hash.as_str();

            if record.written_nodes.is_empty() {
                warn!(hash, "degraded record has no written nodes, dropping it");
                if let Err(e) = self.tracker.remove(hash) {
                    error!(hash, error = %e, "failed to drop degraded record");
                }
                continue;
            }

            let Some(source) = record
                .written_nodes
                .iter()
                .find(|n| health.is_online(n))
                .cloned()
            else {
                debug!(hash, "no written node online yet");
                report.still_pending += record.missing_domains.len();
                continue;
            };

            let key = ObjectPath::new(record.tenant, record.content_hash.clone()).key();
            for domain in &record.missing_domains {
                let Some(target) = self.ctx.topology.healthy_target_in_domain(hash, domain, health)
                else {
                    debug!(hash, %domain, "missing domain still has no healthy node");
                    report.still_pending += 1;
                    continue;
                };

                if !self.repair.repair_with_retry(&key, &source, &target).await {
                    report.still_pending += 1;
                    continue;
                }
                match self.tracker.mark_domain_synced(hash, domain) {
                    Ok(done) => {
                        report.domains_synced += 1;
                        if done {
                            report.records_completed += 1;
                        }
                    }
                    Err(e) => {
                        error!(hash, %domain, error = %e, "failed to update degraded record");
                        report.still_pending += 1;
                    }
                }
            }
        }
        report
    }

    /// React to `NodeOnline` events until the bus closes.
    pub async fn run_event_loop(self: Arc<Self>, mut events: EventReceiver<NodeTopologyChanged>) {
        if !self.enabled() {
            info!("degraded-write tracking off, recovery listener idle");
            return;
        }
        info!("recovery listener started");

        while let Some(event) = events.recv().await {
            if event.change != TopologyChange::NodeOnline {
                continue;
            }
            let domain = event
                .domain
                .clone()
                .or_else(|| self.ctx.topology.node_domain(&event.node));
            if let Some(domain) = &domain {
                match self.tracker.pending_for_domain(domain) {
                    Ok(pending) if pending.is_empty() => {
                        debug!(node = %event.node, %domain, "nothing pending for domain");
                        continue;
                    }
                    Ok(pending) => {
                        info!(node = %event.node, %domain, pending = pending.len(), "domain has pending degraded writes");
                    }
                    Err(e) => warn!(%domain, error = %e, "failed to read pending records"),
                }
            }
            self.attempt_sync(TriggerSource::NodeOnline {
                node: event.node,
                domain,
            })
            .await;
        }
        info!("recovery listener shutting down, event bus closed");
    }

    /// Periodic backstop sweep. Never returns.
    pub async fn run_poll_loop(self: Arc<Self>) {
        if !self.enabled() {
            return;
        }
        tokio::time::sleep(Duration::from_secs(self.config.initial_delay_secs)).await;
        let mut tick = tokio::time::interval(Duration::from_secs(self.config.interval_secs.max(1)));
        loop {
            tick.tick().await;
            self.attempt_sync(TriggerSource::Poll).await;
        }
    }
}

impl fmt::Debug for RecoveryListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryListener")
            .field("enabled", &self.enabled())
            .field("in_flight", &self.in_flight.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

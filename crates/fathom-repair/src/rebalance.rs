//! Topology-driven data migration.
//!
//! [`RebalanceService`] turns topology events into copy tasks:
//!
//! | Event | Task |
//! |---|---|
//! | `NodeAdded` | [`RebalanceType::RebalanceToNew`] |
//! | `NodeRemoved`, `NodeOffline` | [`RebalanceType::MigrateFromFailed`] |
//! | `NodeDomainChanged` | [`RebalanceType::CopyToPromoted`] |
//!
//! One task runs at a time cluster-wide ([`REBALANCE_LOCK_KEY`]); a trigger
//! arriving while the lock is held is dropped. Copies are rate limited and a
//! failed copy is counted without stopping the task.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fathom_placement::{Ring, Snapshot};
use fathom_types::events::{EventReceiver, NodeTopologyChanged, TopologyChange};
use fathom_types::{DomainName, NodeName, RebalanceConfig, hash_from_key, unix_millis};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::context::RepairContext;
use crate::copy::{copy_object, list_objects, object_exists};
use crate::error::RepairError;
use crate::throttle::Throttle;

/// Lock held while a rebalance task runs.
pub const REBALANCE_LOCK_KEY: &str = "fathom:rebalance:lock";

/// Kind of rebalance task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RebalanceType {
    /// Re-create the copies a lost node owned on its domain's successors.
    MigrateFromFailed,
    /// Fill a freshly promoted standby node.
    CopyToPromoted,
    /// Move objects a new node now owns onto it.
    RebalanceToNew,
}

/// Why a manual rebalance was not started.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ManualRebalanceError {
    /// Rebalancing is switched off.
    #[error("rebalancing is disabled")]
    Disabled,
    /// The requested domain is not an active domain.
    #[error("unknown domain: {0}")]
    UnknownDomain(DomainName),
    /// Another rebalance task holds the cluster lock.
    #[error("another rebalance task is running")]
    Busy,
}

/// Progress of the current or last task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RebalanceStatus {
    /// A task is executing.
    pub running: bool,
    /// The last task completed without aborting.
    pub success: bool,
    /// Kind of the current or last task.
    pub task_type: Option<RebalanceType>,
    /// Node whose change started the task; `None` for manual runs.
    pub trigger_node: Option<NodeName>,
    /// Unix milliseconds.
    pub started_at_ms: Option<u64>,
    /// Unix milliseconds.
    pub finished_at_ms: Option<u64>,
    /// Objects copied.
    pub migrated: u64,
    /// Objects that could not be copied.
    pub failed: u64,
    /// Why the task aborted.
    pub error: Option<String>,
}

/// Copies performed on behalf of one task.
#[derive(Default)]
struct Counters {
    migrated: u64,
    failed: u64,
}

/// Executes rebalance tasks.
pub struct RebalanceService {
    ctx: RepairContext,
    config: RebalanceConfig,
    throttle: Throttle,
    status: Mutex<RebalanceStatus>,
}

impl RebalanceService {
    /// Create the service.
    pub fn new(ctx: RepairContext, config: RebalanceConfig) -> Arc<Self> {
        Arc::new(Self {
            throttle: Throttle::new(config.rate_limit_per_sec),
            ctx,
            config,
            status: Mutex::new(RebalanceStatus::default()),
        })
    }

    /// Whether rebalancing reacts to events and manual triggers.
    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Snapshot of the current or last task.
    pub fn status(&self) -> RebalanceStatus {
        self.status.lock().expect("status lock poisoned").clone()
    }

    /// Task to run for a topology event, if any.
    pub fn task_for(change: TopologyChange) -> Option<RebalanceType> {
        match change {
            TopologyChange::NodeAdded => Some(RebalanceType::RebalanceToNew),
            TopologyChange::NodeRemoved | TopologyChange::NodeOffline => {
                Some(RebalanceType::MigrateFromFailed)
            }
            TopologyChange::NodeDomainChanged => Some(RebalanceType::CopyToPromoted),
            TopologyChange::NodeOnline => None,
        }
    }

    /// Handle one event, running the resulting task to completion.
    ///
    /// Returns the task type when a task ran.
    pub async fn handle_event(&self, event: &NodeTopologyChanged) -> Option<RebalanceType> {
        if !self.config.enabled {
            info!(node = %event.node, change = ?event.change, "rebalancing disabled, ignoring topology change");
            return None;
        }
        let Some(task) = Self::task_for(event.change) else {
            info!(node = %event.node, "node online, nothing to rebalance");
            return None;
        };
        info!(node = %event.node, change = ?event.change, ?task, "topology change triggers rebalance");
        self.schedule(&event.node, task).await.then_some(task)
    }

    /// Consume topology events until the bus closes. Each task runs in its
    /// own spawned task so a long migration does not block the stream.
    pub async fn run(self: Arc<Self>, mut events: EventReceiver<NodeTopologyChanged>) {
        info!("rebalance service started");
        while let Some(event) = events.recv().await {
            let this = Arc::clone(&self);
            tokio::spawn(async move {
                this.handle_event(&event).await;
            });
        }
        info!("rebalance service shutting down, event bus closed");
    }

    /// Run one task under the cluster lock. Returns `false` if another task
    /// holds the lock.
    pub async fn schedule(&self, trigger_node: &NodeName, task: RebalanceType) -> bool {
        let lease = Duration::from_secs(self.config.lock_lease_secs);
        let Some(token) = self.ctx.lock.try_acquire(REBALANCE_LOCK_KEY, lease).await else {
            info!(node = %trigger_node, ?task, "rebalance already running, skipping");
            return false;
        };

        self.begin(Some(trigger_node.clone()), task);
        let mut counters = Counters::default();
        let result = match task {
            RebalanceType::MigrateFromFailed => {
                self.migrate_from_failed(trigger_node, &mut counters).await
            }
            RebalanceType::CopyToPromoted => {
                self.copy_to_promoted(trigger_node, &mut counters).await
            }
            RebalanceType::RebalanceToNew => self.rebalance_to_new(trigger_node, &mut counters).await,
        };
        self.finish(counters, result);

        self.ctx.lock.release(REBALANCE_LOCK_KEY, token).await;
        true
    }

    /// Rebalance every healthy node of `domain`, or of all active domains.
    ///
    /// The lock is taken before the task id is handed out, so a returned id
    /// always names a task that runs.
    pub async fn trigger_manual(
        self: &Arc<Self>,
        domain: Option<DomainName>,
    ) -> Result<String, ManualRebalanceError> {
        if !self.config.enabled {
            warn!("manual rebalance requested while rebalancing is disabled");
            return Err(ManualRebalanceError::Disabled);
        }
        let active = self.ctx.topology.active_domains();
        let domains = match domain {
            Some(d) if active.contains(&d) => vec![d],
            Some(d) => {
                warn!(domain = %d, "manual rebalance requested for unknown domain");
                return Err(ManualRebalanceError::UnknownDomain(d));
            }
            None => active,
        };

        let lease = Duration::from_secs(self.config.lock_lease_secs);
        let Some(token) = self.ctx.lock.try_acquire(REBALANCE_LOCK_KEY, lease).await else {
            info!(?domains, "rebalance already running, manual task rejected");
            return Err(ManualRebalanceError::Busy);
        };

        let task_id = format!("rebalance-{}", unix_millis());
        info!(%task_id, ?domains, "manual rebalance started");
        self.begin(None, RebalanceType::RebalanceToNew);

        let this = Arc::clone(self);
        let id = task_id.clone();
        tokio::spawn(async move {
            this.run_manual(&id, &domains).await;
            this.ctx.lock.release(REBALANCE_LOCK_KEY, token).await;
        });
        Ok(task_id)
    }

    async fn run_manual(&self, task_id: &str, domains: &[DomainName]) {
        let snapshot = self.ctx.topology.snapshot();
        let mut counters = Counters::default();
        let mut result = Ok(());
        'domains: for domain in domains {
            for node in snapshot.healthy_nodes_in_domain(domain, self.ctx.health.as_ref()) {
                if let Err(e) = self.rebalance_to_new(&node, &mut counters).await {
                    result = Err(e);
                    break 'domains;
                }
            }
        }
        self.finish(counters, result);
        info!(task_id, "manual rebalance finished");
    }

    fn begin(&self, trigger_node: Option<NodeName>, task: RebalanceType) {
        let mut status = self.status.lock().expect("status lock poisoned");
        *status = RebalanceStatus {
            running: true,
            task_type: Some(task),
            trigger_node,
            started_at_ms: Some(unix_millis()),
            ..Default::default()
        };
    }

    fn finish(&self, counters: Counters, result: Result<(), RepairError>) {
        let mut status = self.status.lock().expect("status lock poisoned");
        status.running = false;
        status.finished_at_ms = Some(unix_millis());
        status.migrated = counters.migrated;
        status.failed = counters.failed;
        match result {
            Ok(()) => {
                status.success = true;
                info!(
                    task = ?status.task_type,
                    migrated = counters.migrated,
                    failed = counters.failed,
                    "rebalance finished"
                );
            }
            Err(e) => {
                status.success = false;
                status.error = Some(e.to_string());
                error!(task = ?status.task_type, error = %e, "rebalance failed");
            }
        }
    }

    // ----- Tasks -----

    /// Copy everything `failed` owned into its domain's successor for each
    /// hash, reading from the other active domains.
    async fn migrate_from_failed(
        &self,
        failed: &NodeName,
        counters: &mut Counters,
    ) -> Result<(), RepairError> {
        let snapshot = self.ctx.topology.snapshot();
        let Some(spec) = snapshot.node_spec(failed) else {
            return Err(RepairError::failed(failed.as_str(), "unknown node"));
        };
        let domain = spec.domain.clone();
        if !snapshot.active_domains().contains(&domain) {
            debug!(node = %failed, %domain, "node not in an active domain, nothing to migrate");
            return Ok(());
        }

        // A removed node is already off the ring; put it back to see what it
        // owned.
        let Some(mut ring) = snapshot.ring(&domain).cloned() else {
            warn!(node = %failed, %domain, "no node left in domain to migrate to");
            return Ok(());
        };
        if !ring.contains(failed) {
            ring.add_node_with_weight(failed.clone(), spec.weight);
        }

        let sources = self.sources_outside(&snapshot, &domain);
        if sources.is_empty() {
            return Err(RepairError::failed(
                failed.as_str(),
                "no healthy node in any other active domain",
            ));
        }
        info!(node = %failed, %domain, sources = sources.len(), "migrating data of failed node");

        let health = self.ctx.health.as_ref();
        let mut seen = HashSet::new();
        for source in &sources {
            let Some(keys) = self.list_source(source, counters).await else {
                continue;
            };
            for key in keys {
                let Some(hash) = hash_from_key(&key) else {
                    continue;
                };
                if ring.owner(hash) != Some(failed) {
                    continue;
                }
                let Some(target) = snapshot.successor_excluding(hash, &domain, failed) else {
                    continue;
                };
                if !health.is_online(&target) || !seen.insert(key.clone()) {
                    continue;
                }
                self.copy_if_missing(&key, source, &target, counters).await;
            }
        }
        Ok(())
    }

    /// Copy to `promoted` every object it is now the ring owner of in its
    /// new domain, reading from the other active domains.
    async fn copy_to_promoted(
        &self,
        promoted: &NodeName,
        counters: &mut Counters,
    ) -> Result<(), RepairError> {
        let snapshot = self.ctx.topology.snapshot();
        let Some(domain) = snapshot.node_domain(promoted).cloned() else {
            return Err(RepairError::failed(promoted.as_str(), "unknown node"));
        };

        let sources = self.sources_outside(&snapshot, &domain);
        if sources.is_empty() {
            return Err(RepairError::failed(
                promoted.as_str(),
                "no healthy node in any other active domain",
            ));
        }
        info!(node = %promoted, %domain, sources = sources.len(), "copying data to promoted node");

        let mut seen = HashSet::new();
        for source in &sources {
            let Some(keys) = self.list_source(source, counters).await else {
                continue;
            };
            for key in keys {
                let Some(hash) = hash_from_key(&key) else {
                    continue;
                };
                if snapshot.target_node_in_domain(hash, &domain).as_ref() != Some(promoted) {
                    continue;
                }
                if seen.insert(key.clone()) {
                    self.copy_if_missing(&key, source, promoted, counters).await;
                }
            }
        }
        Ok(())
    }

    /// Copy to `new_node` every object its domain peers hold that now hashes
    /// to it.
    async fn rebalance_to_new(
        &self,
        new_node: &NodeName,
        counters: &mut Counters,
    ) -> Result<(), RepairError> {
        let snapshot = self.ctx.topology.snapshot();
        let Some(domain) = snapshot.node_domain(new_node).cloned() else {
            return Err(RepairError::failed(new_node.as_str(), "unknown node"));
        };

        let peers: Vec<NodeName> = snapshot
            .healthy_nodes_in_domain(&domain, self.ctx.health.as_ref())
            .into_iter()
            .filter(|n| n != new_node)
            .collect();
        if peers.is_empty() {
            info!(node = %new_node, %domain, "no other node in domain, nothing to rebalance");
            return Ok(());
        }
        let Some(ring) = snapshot.ring(&domain) else {
            return Ok(());
        };
        let mut before = ring.clone();
        before.remove_node(new_node);
        info!(node = %new_node, %domain, peers = peers.len(), "rebalancing onto node");

        let mut seen = HashSet::new();
        for source in &peers {
            let Some(keys) = self.list_source(source, counters).await else {
                continue;
            };
            let gained: HashSet<String> =
                Ring::diff(&before, ring, keys.iter().filter_map(|k| hash_from_key(k)))
                    .into_iter()
                    .filter(|m| &m.to == new_node)
                    .map(|m| m.hash)
                    .collect();
            for key in keys {
                let Some(hash) = hash_from_key(&key) else {
                    continue;
                };
                if gained.contains(hash) && seen.insert(key.clone()) {
                    self.copy_if_missing(&key, source, new_node, counters).await;
                }
            }
        }
        Ok(())
    }

    // ----- Helpers -----

    /// Healthy nodes of every active domain except `domain`.
    fn sources_outside(&self, snapshot: &Snapshot, domain: &DomainName) -> Vec<NodeName> {
        snapshot
            .active_domains()
            .iter()
            .filter(|d| *d != domain)
            .flat_map(|d| snapshot.healthy_nodes_in_domain(d, self.ctx.health.as_ref()))
            .collect()
    }

    async fn list_source(&self, source: &NodeName, counters: &mut Counters) -> Option<Vec<String>> {
        match list_objects(&self.ctx.pool, source, &self.ctx.limits).await {
            Ok(keys) => {
                debug!(%source, objects = keys.len(), "listed source node");
                Some(keys)
            }
            Err(e) => {
                error!(%source, error = %e, "failed to list source node");
                counters.failed += 1;
                None
            }
        }
    }

    async fn copy_if_missing(
        &self,
        key: &str,
        source: &NodeName,
        target: &NodeName,
        counters: &mut Counters,
    ) {
        let limits = &self.ctx.limits;
        if let Ok(true) = object_exists(&self.ctx.pool, target, key, limits).await {
            debug!(key, %target, "target already holds object");
            return;
        }

        self.throttle.acquire().await;
        match copy_object(&self.ctx.pool, key, source, target, limits).await {
            Ok(_) => {
                counters.migrated += 1;
                self.update_progress(counters);
            }
            Err(e) => {
                warn!(key, %source, %target, error = %e, "rebalance copy failed");
                counters.failed += 1;
                self.update_progress(counters);
            }
        }
    }

    fn update_progress(&self, counters: &Counters) {
        let mut status = self.status.lock().expect("status lock poisoned");
        status.migrated = counters.migrated;
        status.failed = counters.failed;
    }
}

impl std::fmt::Debug for RebalanceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RebalanceService")
            .field("config", &self.config)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

//! [`StorageNode`]: the engine instance that ties placement, backends and
//! background services together.
//!
//! The write path lives in `write.rs`, the read and delete paths in
//! `read.rs`. This module holds construction and the admin surface.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use fathom_cluster::HealthOracle;
use fathom_placement::Topology;
use fathom_repair::{
    ConsistencyRepair, DegradedWriteTracker, ManualRebalanceError, RebalanceService,
    RebalanceStatus, RepairContext, RepairStats,
};
use fathom_store::{NodePool, ObjectStore, StoreError};
use fathom_types::events::{EventBus, NodeTopologyChanged};
use fathom_types::{ContentHash, DegradedWriteConfig, DomainName, NodeName, ObjectPath, TenantId};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::EngineError;

/// Default ceiling on an object buffered in memory by the read path.
pub const DEFAULT_MAX_IN_MEMORY_BYTES: u64 = 100 * 1024 * 1024;

/// Configuration for a [`StorageNode`].
#[derive(Debug, Clone)]
pub struct StorageNodeConfig {
    /// Largest object the read path will buffer.
    pub max_in_memory_bytes: u64,
    /// Ceiling on the quorum wait, and on the follow-up wait after it.
    pub write_timeout: Duration,
    /// Deadline for every single backend call.
    pub node_op_timeout: Duration,
    /// Degraded-write policy.
    pub degraded: DegradedWriteConfig,
}

impl Default for StorageNodeConfig {
    fn default() -> Self {
        Self {
            max_in_memory_bytes: DEFAULT_MAX_IN_MEMORY_BYTES,
            write_timeout: Duration::from_secs(300),
            node_op_timeout: Duration::from_secs(30),
            degraded: DegradedWriteConfig::default(),
        }
    }
}

/// Health summary of one domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainStatus {
    /// No member nodes.
    Empty,
    /// Every member is online.
    Healthy,
    /// Some members are offline.
    Degraded,
    /// No member is online.
    Down,
}

/// Per-domain health report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainHealth {
    /// Member nodes.
    pub total_nodes: usize,
    /// Members currently online.
    pub healthy_nodes: usize,
    /// Summary.
    pub status: DomainStatus,
    /// Reachability of each member.
    pub nodes: BTreeMap<NodeName, bool>,
}

impl DomainStatus {
    pub(crate) fn from_counts(total: usize, healthy: usize) -> Self {
        if total == 0 {
            Self::Empty
        } else if healthy == total {
            Self::Healthy
        } else if healthy > 0 {
            Self::Degraded
        } else {
            Self::Down
        }
    }
}

/// One engine instance.
///
/// Cheap to share behind an `Arc`; every field is itself shared.
pub struct StorageNode {
    pub(crate) config: StorageNodeConfig,
    pub(crate) topology: Arc<Topology>,
    pub(crate) health: Arc<dyn HealthOracle>,
    pub(crate) pool: NodePool,
    pub(crate) events: EventBus,
    pub(crate) repair: Arc<ConsistencyRepair>,
    pub(crate) tracker: Arc<DegradedWriteTracker>,
    pub(crate) rebalance: Arc<RebalanceService>,
}

impl StorageNode {
    /// Create a node over the shared cluster handles and background services.
    pub fn new(
        config: StorageNodeConfig,
        ctx: &RepairContext,
        repair: Arc<ConsistencyRepair>,
        tracker: Arc<DegradedWriteTracker>,
        rebalance: Arc<RebalanceService>,
    ) -> Self {
        Self {
            config,
            topology: ctx.topology.clone(),
            health: ctx.health.clone(),
            pool: ctx.pool.clone(),
            events: ctx.events.clone(),
            repair,
            tracker,
            rebalance,
        }
    }

    pub fn config(&self) -> &StorageNodeConfig {
        &self.config
    }

    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    pub fn tracker(&self) -> &Arc<DegradedWriteTracker> {
        &self.tracker
    }

    /// Backend for `node`, or `Unavailable` if it is not in the pool.
    pub(crate) fn backend(&self, node: &NodeName) -> Result<Arc<dyn ObjectStore>, StoreError> {
        self.pool
            .get(node)
            .ok_or_else(|| StoreError::Unavailable(node.to_string()))
    }

    /// Run a backend call under `node_op_timeout`.
    pub(crate) async fn bounded<T>(
        &self,
        op: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        bounded(self.config.node_op_timeout, op).await
    }

    // ------------------------------------------------------------------
    // Admin
    // ------------------------------------------------------------------

    /// Reachability of every enabled node.
    pub fn cluster_health(&self) -> BTreeMap<NodeName, bool> {
        self.topology
            .enabled_nodes()
            .into_iter()
            .map(|node| {
                let online = self.health.is_online(&node);
                (node, online)
            })
            .collect()
    }

    /// Health of every active domain and of the standby pool.
    pub fn domain_health(&self) -> BTreeMap<DomainName, DomainHealth> {
        let snapshot = self.topology.snapshot();
        let mut domains = snapshot.active_domains().to_vec();
        domains.extend(snapshot.standby_domain().cloned());

        domains
            .into_iter()
            .map(|domain| {
                let nodes: BTreeMap<NodeName, bool> = snapshot
                    .nodes_in_domain(&domain)
                    .into_iter()
                    .map(|node| {
                        let online = self.health.is_online(&node);
                        (node, online)
                    })
                    .collect();
                let healthy = nodes.values().filter(|online| **online).count();
                let report = DomainHealth {
                    total_nodes: nodes.len(),
                    healthy_nodes: healthy,
                    status: DomainStatus::from_counts(nodes.len(), healthy),
                    nodes,
                };
                (domain, report)
            })
            .collect()
    }

    /// Nodes that actually hold `hash` for `tenant`, verified with `head`.
    pub async fn chunk_locations(
        &self,
        hash: &str,
        tenant: TenantId,
    ) -> Result<Vec<NodeName>, EngineError> {
        let hash = ContentHash::new(hash)?;
        let key = ObjectPath::new(tenant, hash.clone()).key();
        let candidates = self
            .topology
            .nodes_for_read(hash.as_str(), self.health.as_ref());

        let mut locations = Vec::new();
        for node in candidates {
            if !self.health.is_online(&node) {
                continue;
            }
            let Ok(store) = self.backend(&node) else {
                continue;
            };
            match self.bounded(store.head(node.as_str(), &key)).await {
                Ok(Some(_)) => locations.push(node),
                Ok(None) => debug!(%node, key, "chunk not on candidate"),
                Err(e) => warn!(%node, key, error = %e, "location check failed"),
            }
        }
        Ok(locations)
    }

    /// Start a manual rebalance, optionally scoped to one domain.
    pub async fn trigger_rebalance(
        &self,
        domain: Option<DomainName>,
    ) -> Result<String, EngineError> {
        self.rebalance
            .trigger_manual(domain)
            .await
            .map_err(|e| match e {
                ManualRebalanceError::UnknownDomain(_) => {
                    EngineError::InvalidParameter(e.to_string())
                }
                ManualRebalanceError::Disabled | ManualRebalanceError::Busy => {
                    EngineError::Disabled(e.to_string())
                }
            })
    }

    /// Progress of the current or last rebalance task.
    pub fn rebalance_status(&self) -> RebalanceStatus {
        self.rebalance.status()
    }

    /// Run a consistency audit now.
    pub async fn trigger_repair(&self) -> Result<RepairStats, EngineError> {
        self.repair.trigger_manual_audit().await.ok_or_else(|| {
            EngineError::Disabled(
                "consistency audit skipped: single domain or already running".to_string(),
            )
        })
    }

    /// Degraded-write records awaiting backfill.
    pub fn degraded_pending(&self) -> Result<usize, EngineError> {
        Ok(self.tracker.pending_count()?)
    }

    /// Enable or disable a node and publish the resulting topology change.
    ///
    /// Returns whether anything changed.
    pub fn set_node_enabled(&self, node: &NodeName, enabled: bool) -> Result<bool, EngineError> {
        if self.topology.snapshot().node_spec(node).is_none() {
            return Err(EngineError::NotFound(format!("node {node}")));
        }
        let Some(change) = self.topology.set_node_enabled(node, enabled) else {
            return Ok(false);
        };

        info!(%node, enabled, ?change, "node membership changed");
        self.events.emit(NodeTopologyChanged::new(
            node.clone(),
            self.topology.node_domain(node),
            change,
        ));
        Ok(true)
    }
}

/// `tokio::time::timeout` that maps expiry to [`StoreError::Timeout`].
pub(crate) async fn bounded<T>(
    limit: Duration,
    op: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    match tokio::time::timeout(limit, op).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(format!("no response within {limit:?}"))),
    }
}

impl std::fmt::Debug for StorageNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageNode")
            .field("config", &self.config)
            .field("nodes", &self.pool.len())
            .finish_non_exhaustive()
    }
}

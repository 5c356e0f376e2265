use std::sync::Arc;

use fathom_cluster::{ClusterLock, HealthOracle};
use fathom_placement::Topology;
use fathom_store::NodePool;
use fathom_types::events::EventBus;

use crate::copy::CopyLimits;

/// Handles shared by every background service.
#[derive(Clone)]
pub struct RepairContext {
    /// Current placement.
    pub topology: Arc<Topology>,
    /// Node liveness and load.
    pub health: Arc<dyn HealthOracle>,
    /// Backend of every node.
    pub pool: NodePool,
    /// Cluster-wide exclusivity for audits and rebalancing.
    pub lock: Arc<dyn ClusterLock>,
    /// Where repair and topology events are published.
    pub events: EventBus,
    /// Bounds applied to every copy.
    pub limits: CopyLimits,
}

impl std::fmt::Debug for RepairContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepairContext")
            .field("topology", &self.topology)
            .field("nodes", &self.pool.len())
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

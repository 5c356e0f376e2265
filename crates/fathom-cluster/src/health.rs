//! Node liveness and load tracking.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use fathom_placement::Topology;
use fathom_types::NodeName;
use fathom_types::events::{EventBus, NodeTopologyChanged, TopologyChange};
use fathom_types::health::{HealthOracle, OFFLINE_LOAD_SCORE};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Load score for online nodes without fresh metrics.
pub const DEFAULT_LOAD_SCORE: f64 = 0.5;

/// Metrics older than this are ignored.
pub const METRICS_TTL: Duration = Duration::from_secs(60);

const WEIGHT_DISK: f64 = 0.4;
const WEIGHT_INFLIGHT: f64 = 0.35;
const WEIGHT_WAITING: f64 = 0.25;

/// Load indicators reported by a backend node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetrics {
    /// Disk usage in percent.
    pub disk_usage_percent: Option<f64>,
    /// Requests currently being served.
    pub inflight_requests: Option<u64>,
    /// Requests queued behind them.
    pub waiting_requests: Option<u64>,
}

impl NodeMetrics {
    /// Weighted load in `[0, 1]`; missing indicators count as zero.
    pub fn load_score(&self) -> f64 {
        let disk = self
            .disk_usage_percent
            .map_or(0.0, |pct| (pct / 100.0).clamp(0.0, 1.0));
        let inflight = self
            .inflight_requests
            .map_or(0.0, |n| (n as f64 / 100.0).min(1.0));
        let waiting = self
            .waiting_requests
            .map_or(0.0, |n| (n as f64 / 50.0).min(1.0));
        disk * WEIGHT_DISK + inflight * WEIGHT_INFLIGHT + waiting * WEIGHT_WAITING
    }
}

#[derive(Debug, Clone, Copy)]
struct NodeHealth {
    online: bool,
    metrics: Option<(NodeMetrics, Instant)>,
}

/// In-process health oracle.
///
/// Configured nodes start online; the first probe that fails marks them
/// offline. Unknown nodes are offline. Only transitions are published on the
/// event bus.
pub struct HealthRegistry {
    nodes: RwLock<HashMap<NodeName, NodeHealth>>,
    topology: Arc<Topology>,
    events: EventBus,
}

impl HealthRegistry {
    /// Track every node the topology knows about.
    pub fn new(topology: Arc<Topology>, events: EventBus) -> Self {
        let nodes = topology
            .snapshot()
            .all_nodes()
            .into_iter()
            .map(|node| {
                (
                    node,
                    NodeHealth {
                        online: true,
                        metrics: None,
                    },
                )
            })
            .collect();
        Self {
            nodes: RwLock::new(nodes),
            topology,
            events,
        }
    }

    /// Record a probe result. Returns `true` if the status changed.
    pub fn set_online(&self, node: &NodeName, online: bool) -> bool {
        let changed = {
            let mut nodes = self.nodes.write().expect("health lock poisoned");
            let entry = nodes.entry(node.clone()).or_insert(NodeHealth {
                online: !online,
                metrics: None,
            });
            let changed = entry.online != online;
            entry.online = online;
            if !online {
                entry.metrics = None;
            }
            changed
        };

        if !changed {
            debug!(%node, online, "node status unchanged");
            return false;
        }

        let domain = self.topology.node_domain(node);
        let change = if online {
            info!(%node, ?domain, "node is now online");
            TopologyChange::NodeOnline
        } else {
            warn!(%node, ?domain, "node is now offline");
            TopologyChange::NodeOffline
        };
        self.events
            .emit(NodeTopologyChanged::new(node.clone(), domain, change));
        true
    }

    /// Store freshly fetched load indicators.
    pub fn set_metrics(&self, node: &NodeName, metrics: NodeMetrics) {
        let mut nodes = self.nodes.write().expect("health lock poisoned");
        if let Some(entry) = nodes.get_mut(node) {
            entry.metrics = Some((metrics, Instant::now()));
        }
    }

    /// Nodes currently online, sorted.
    pub fn online_nodes(&self) -> Vec<NodeName> {
        let nodes = self.nodes.read().expect("health lock poisoned");
        let mut online: Vec<NodeName> = nodes
            .iter()
            .filter(|(_, h)| h.online)
            .map(|(n, _)| n.clone())
            .collect();
        online.sort();
        online
    }
}

impl HealthOracle for HealthRegistry {
    fn is_online(&self, node: &NodeName) -> bool {
        let nodes = self.nodes.read().expect("health lock poisoned");
        nodes.get(node).is_some_and(|h| h.online)
    }

    fn load_score(&self, node: &NodeName) -> f64 {
        let nodes = self.nodes.read().expect("health lock poisoned");
        match nodes.get(node) {
            Some(h) if h.online => match h.metrics {
                Some((metrics, at)) if at.elapsed() <= METRICS_TTL => metrics.load_score(),
                _ => DEFAULT_LOAD_SCORE,
            },
            _ => OFFLINE_LOAD_SCORE,
        }
    }
}

impl std::fmt::Debug for HealthRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthRegistry")
            .field("online", &self.online_nodes().len())
            .finish_non_exhaustive()
    }
}

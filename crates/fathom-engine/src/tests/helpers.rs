//! Shared test utilities for fathom-engine tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use fathom_cluster::{HealthRegistry, MemoryLock};
use fathom_meta::MetaStore;
use fathom_placement::Topology;
use fathom_repair::{
    ConsistencyRepair, CopyLimits, DegradedWriteTracker, RebalanceService, RepairContext,
};
use fathom_store::{FaultyStore, MemoryStore, NodePool, ObjectStore};
use fathom_types::events::EventBus;
use fathom_types::*;

use crate::node::{StorageNode, StorageNodeConfig};

pub const TEST_MAX_BYTES: u64 = 1 << 24;

pub fn n(name: &str) -> NodeName {
    NodeName::from(name)
}

pub fn d(name: &str) -> DomainName {
    DomainName::from(name)
}

/// Deterministic, non-repeating test data.
pub fn test_data(size: usize) -> Bytes {
    let mut data = Vec::with_capacity(size);
    let mut state: u32 = 0xDEAD_BEEF;
    for _ in 0..size {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        data.push((state >> 16) as u8);
    }
    Bytes::from(data)
}

/// A single-process cluster: one engine over in-memory backends wrapped in
/// [`FaultyStore`].
pub struct TestCluster {
    pub node: StorageNode,
    pub topology: Arc<Topology>,
    pub health: Arc<HealthRegistry>,
    pub events: EventBus,
    pub stores: BTreeMap<NodeName, Arc<FaultyStore>>,
    /// The stores behind the fault wrappers, for assertions.
    pub backends: BTreeMap<NodeName, Arc<MemoryStore>>,
}

pub struct ClusterBuilder {
    domains: Vec<(String, Vec<String>)>,
    standby: Option<(String, Vec<String>)>,
    replication: ReplicationConfig,
    node_config: StorageNodeConfig,
    rebalance: RebalanceConfig,
    slow_writes: BTreeMap<String, u64>,
}

/// One domain per entry, named after the entry, with the given nodes.
pub fn cluster(domains: &[(&str, &[&str])]) -> ClusterBuilder {
    ClusterBuilder {
        domains: domains
            .iter()
            .map(|(dom, nodes)| {
                (
                    dom.to_string(),
                    nodes.iter().map(|s| s.to_string()).collect(),
                )
            })
            .collect(),
        standby: None,
        replication: ReplicationConfig::default(),
        node_config: StorageNodeConfig::default(),
        rebalance: RebalanceConfig {
            rate_limit_per_sec: 0,
            ..Default::default()
        },
        slow_writes: BTreeMap::new(),
    }
}

/// Three domains `a`, `b`, `c` with one node each.
pub fn three_domains() -> ClusterBuilder {
    cluster(&[("a", &["a1"]), ("b", &["b1"]), ("c", &["c1"])])
}

impl ClusterBuilder {
    pub fn standby(mut self, domain: &str, nodes: &[&str]) -> Self {
        self.standby = Some((
            domain.to_string(),
            nodes.iter().map(|s| s.to_string()).collect(),
        ));
        self
    }

    pub fn factor(mut self, factor: usize) -> Self {
        self.replication.factor = Some(factor);
        self
    }

    pub fn quorum(mut self, quorum: QuorumPolicy) -> Self {
        self.replication.quorum = quorum;
        self
    }

    pub fn degraded(mut self, min_replicas: usize) -> Self {
        self.node_config.degraded = DegradedWriteConfig {
            enabled: true,
            min_replicas,
            track_for_sync: true,
        };
        self
    }

    pub fn node_config(mut self, f: impl FnOnce(&mut StorageNodeConfig)) -> Self {
        f(&mut self.node_config);
        self
    }

    /// Every write to `node` takes `ms` milliseconds.
    pub fn slow_writes(mut self, node: &str, ms: u64) -> Self {
        self.slow_writes.insert(node.to_string(), ms);
        self
    }

    pub fn rebalance(mut self, config: RebalanceConfig) -> Self {
        self.rebalance = config;
        self
    }

    pub fn build(self) -> TestCluster {
        let mut config = TopologyConfig {
            vnodes_per_node: 50,
            ..Default::default()
        };
        for (domain, nodes) in self.domains.iter().chain(self.standby.iter()) {
            for node in nodes {
                config.nodes.push(NodeSpec::new(node.as_str(), domain.as_str()));
            }
        }
        config.active_domains = self.domains.iter().map(|(dom, _)| d(dom)).collect();
        config.standby_domain = self.standby.as_ref().map(|(dom, _)| d(dom));

        let topology = Arc::new(Topology::new(&config, self.replication).unwrap());
        let events = EventBus::new();
        let health = Arc::new(HealthRegistry::new(topology.clone(), events.clone()));

        let mut stores = BTreeMap::new();
        let mut backends = BTreeMap::new();
        let mut pool = NodePool::new();
        for spec in &config.nodes {
            let backend = Arc::new(MemoryStore::new(TEST_MAX_BYTES));
            let latency = self
                .slow_writes
                .get(spec.name.as_str())
                .copied()
                .unwrap_or(0);
            let store = Arc::new(
                FaultyStore::new(backend.clone() as Arc<dyn ObjectStore>)
                    .named(spec.name.as_str())
                    .write_latency(latency, latency),
            );
            pool.insert(spec.name.clone(), store.clone() as Arc<dyn ObjectStore>);
            stores.insert(spec.name.clone(), store);
            backends.insert(spec.name.clone(), backend);
        }

        let ctx = RepairContext {
            topology: topology.clone(),
            health: health.clone(),
            pool,
            lock: Arc::new(MemoryLock::new()),
            events: events.clone(),
            limits: CopyLimits::default(),
        };
        let repair = ConsistencyRepair::new(
            ctx.clone(),
            RepairConfig {
                base_backoff_ms: 10,
                ..Default::default()
            },
        );
        let tracker = Arc::new(DegradedWriteTracker::new(
            Arc::new(MetaStore::open_temporary().unwrap()),
            topology.clone(),
            events.clone(),
        ));
        let rebalance = RebalanceService::new(ctx.clone(), self.rebalance);
        let node = StorageNode::new(self.node_config, &ctx, repair, tracker, rebalance);

        TestCluster {
            node,
            topology,
            health,
            events,
            stores,
            backends,
        }
    }
}

impl TestCluster {
    pub fn store(&self, node: &str) -> &Arc<FaultyStore> {
        &self.stores[&n(node)]
    }

    /// Whether `node` holds `key`, bypassing injected faults.
    pub async fn holds(&self, node: &str, key: &str) -> bool {
        matches!(self.backends[&n(node)].head(node, key).await, Ok(Some(_)))
    }

    /// Total objects stored on `node`.
    pub async fn object_count(&self, node: &str) -> usize {
        self.backends[&n(node)].list(node).await.unwrap().len()
    }

    /// Put an object straight onto one backend.
    pub async fn put_raw(&self, node: &str, key: &str, data: Bytes) {
        let backend = &self.backends[&n(node)];
        backend.ensure_container(node).await.unwrap();
        backend.put(node, key, data).await.unwrap();
    }

    /// Remove an object straight from one backend.
    pub async fn delete_raw(&self, node: &str, key: &str) {
        self.backends[&n(node)].delete(node, key).await.unwrap();
    }

    pub fn set_online(&self, node: &str, online: bool) {
        self.health.set_online(&n(node), online);
    }
}

//! Shared test harness for Fathom integration tests.
//!
//! Provides [`IntegrationCluster`]: one engine with its background services
//! over in-memory backends, one per node, each wrapped in a
//! [`FaultyStore`] so tests can take nodes down and slow writes.
//!
//! Domains are named `zone-<i>` and their nodes `zone-<i>-<j>`, both
//! counting from 0 and 1 respectively. The standby domain is `spare` with
//! nodes `spare-<j>`.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use fathom_cluster::{HealthRegistry, MemoryLock};
use fathom_engine::{StorageNode, StorageNodeConfig};
use fathom_meta::MetaStore;
use fathom_placement::Topology;
use fathom_repair::{
    ConsistencyRepair, CopyLimits, DegradedWriteTracker, RebalanceService, RecoveryListener,
    RepairContext, StandbyPoolManager,
};
use fathom_store::{FaultyStore, MemoryStore, NodePool, ObjectStore};
use fathom_types::events::{EventBus, NodeTopologyChanged};
use fathom_types::*;
use tokio::task::JoinHandle;

/// Per-node capacity of the in-memory backends.
const MAX_BYTES: u64 = 1 << 30;

/// Name of active domain `i`.
pub fn domain(i: usize) -> DomainName {
    DomainName::from(format!("zone-{i}"))
}

/// Name of node `j` of active domain `i`.
pub fn node(i: usize, j: usize) -> NodeName {
    NodeName::from(format!("zone-{i}-{j}"))
}

/// Name of standby node `j`.
pub fn spare(j: usize) -> NodeName {
    NodeName::from(format!("spare-{j}"))
}

/// Deterministic test data from `seed`.
pub fn test_data_seeded(size: usize, seed: u32) -> Bytes {
    let mut data = Vec::with_capacity(size);
    let mut state = seed.wrapping_mul(2654435761).wrapping_add(1);
    for _ in 0..size {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        data.push((state >> 16) as u8);
    }
    Bytes::from(data)
}

/// Hash used for the `i`-th test object.
pub fn object_hash(i: usize) -> String {
    format!("{:016x}", (i as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

/// Poll `check` every 10 ms until it holds or `timeout` passes.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// =========================================================================
// Builder
// =========================================================================

/// Builder for [`IntegrationCluster`].
pub struct ClusterBuilder {
    domains: usize,
    nodes_per_domain: usize,
    spares: usize,
    replication: ReplicationConfig,
    node_config: StorageNodeConfig,
    repair: RepairConfig,
    rebalance: RebalanceConfig,
    slow_writes: BTreeMap<NodeName, u64>,
}

impl ClusterBuilder {
    /// Standby domain `spare` with `count` nodes.
    pub fn spares(mut self, count: usize) -> Self {
        self.spares = count;
        self
    }

    pub fn factor(mut self, factor: usize) -> Self {
        self.replication.factor = Some(factor);
        self
    }

    pub fn quorum(mut self, quorum: usize) -> Self {
        self.replication.quorum = QuorumPolicy::Fixed(quorum);
        self
    }

    /// Accept writes with at least `min_replicas` targets and track them.
    pub fn degraded(mut self, min_replicas: usize) -> Self {
        self.node_config.degraded = DegradedWriteConfig {
            enabled: true,
            min_replicas,
            track_for_sync: true,
        };
        self
    }

    /// Every write to `node` takes `ms` milliseconds.
    pub fn slow_writes(mut self, node: NodeName, ms: u64) -> Self {
        self.slow_writes.insert(node, ms);
        self
    }

    pub fn repair_backoff_ms(mut self, ms: u64) -> Self {
        self.repair.base_backoff_ms = ms;
        self
    }

    pub fn build(self) -> IntegrationCluster {
        let mut config = TopologyConfig {
            vnodes_per_node: 64,
            ..Default::default()
        };
        for i in 0..self.domains {
            for j in 1..=self.nodes_per_domain {
                config.nodes.push(NodeSpec::new(node(i, j), domain(i)));
            }
            config.active_domains.push(domain(i));
        }
        if self.spares > 0 {
            for j in 1..=self.spares {
                config.nodes.push(NodeSpec::new(spare(j), "spare"));
            }
            config.standby_domain = Some(DomainName::from("spare"));
        }

        let topology =
            Arc::new(Topology::new(&config, self.replication).expect("valid test topology"));
        let events = EventBus::new();
        let health = Arc::new(HealthRegistry::new(topology.clone(), events.clone()));

        let mut pool = NodePool::new();
        let mut stores = BTreeMap::new();
        let mut backends = BTreeMap::new();
        for spec in &config.nodes {
            let backend = Arc::new(MemoryStore::new(MAX_BYTES));
            let latency = self.slow_writes.get(&spec.name).copied().unwrap_or(0);
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
        let meta = MetaStore::open_temporary().expect("temporary metadata store");
        let repair = ConsistencyRepair::new(ctx.clone(), self.repair);
        let tracker = Arc::new(DegradedWriteTracker::new(
            Arc::new(meta),
            topology.clone(),
            events.clone(),
        ));
        let rebalance = RebalanceService::new(ctx.clone(), self.rebalance);
        let recovery = RecoveryListener::new(
            ctx.clone(),
            tracker.clone(),
            repair.clone(),
            self.node_config.degraded,
            RecoveryConfig::default(),
        );
        let standby = StandbyPoolManager::new(ctx.clone(), StandbyConfig::default());
        let engine = Arc::new(StorageNode::new(
            self.node_config,
            &ctx,
            repair.clone(),
            tracker.clone(),
            rebalance.clone(),
        ));

        IntegrationCluster {
            engine,
            topology,
            health,
            events,
            repair,
            tracker,
            rebalance,
            recovery,
            standby,
            stores,
            backends,
            tasks: Mutex::new(Vec::new()),
        }
    }
}

// =========================================================================
// IntegrationCluster
// =========================================================================

/// A whole Fathom deployment in one process.
pub struct IntegrationCluster {
    pub engine: Arc<StorageNode>,
    pub topology: Arc<Topology>,
    pub health: Arc<HealthRegistry>,
    pub events: EventBus,
    pub repair: Arc<ConsistencyRepair>,
    pub tracker: Arc<DegradedWriteTracker>,
    pub rebalance: Arc<RebalanceService>,
    pub recovery: Arc<RecoveryListener>,
    pub standby: Arc<StandbyPoolManager>,
    stores: BTreeMap<NodeName, Arc<FaultyStore>>,
    backends: BTreeMap<NodeName, Arc<MemoryStore>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl IntegrationCluster {
    /// `domains` active domains with `nodes_per_domain` nodes each.
    ///
    /// Rebalancing runs unthrottled and repairs back off for 10 ms.
    pub fn builder(domains: usize, nodes_per_domain: usize) -> ClusterBuilder {
        ClusterBuilder {
            domains,
            nodes_per_domain,
            spares: 0,
            replication: ReplicationConfig::default(),
            node_config: StorageNodeConfig::default(),
            repair: RepairConfig {
                base_backoff_ms: 10,
                ..Default::default()
            },
            rebalance: RebalanceConfig {
                rate_limit_per_sec: 0,
                ..Default::default()
            },
            slow_writes: BTreeMap::new(),
        }
    }

    /// Start the event-driven services: rebalancing and degraded-write
    /// recovery. They stop when the cluster is dropped.
    pub fn start_background(&self) {
        let mut tasks = self.tasks.lock().expect("tasks lock poisoned");

        let events = self.events.subscribe::<NodeTopologyChanged>();
        tasks.push(tokio::spawn(self.rebalance.clone().run(events)));

        let events = self.events.subscribe::<NodeTopologyChanged>();
        tasks.push(tokio::spawn(self.recovery.clone().run_event_loop(events)));
    }

    /// Take `node` down: its backend fails every call and health marks it
    /// offline.
    pub fn kill_node(&self, node: &NodeName) {
        self.stores[node].set_offline(true);
        self.health.set_online(node, false);
    }

    /// Bring `node` back.
    pub fn revive_node(&self, node: &NodeName) {
        self.stores[node].set_offline(false);
        self.health.set_online(node, true);
    }

    /// Every node of active domain `i`.
    pub fn kill_domain(&self, i: usize) {
        for node in self.topology.nodes_in_domain(&domain(i)) {
            self.kill_node(&node);
        }
    }

    pub fn revive_domain(&self, i: usize) {
        for node in self.topology.nodes_in_domain(&domain(i)) {
            self.revive_node(&node);
        }
    }

    pub fn store(&self, node: &NodeName) -> &Arc<FaultyStore> {
        &self.stores[node]
    }

    /// Whether `node` holds `key`, bypassing injected faults.
    pub async fn holds(&self, node: &NodeName, key: &str) -> bool {
        matches!(
            self.backends[node].head(node.as_str(), key).await,
            Ok(Some(_))
        )
    }

    /// Whether any node currently in active domain `i` holds `key`.
    pub async fn domain_holds(&self, i: usize, key: &str) -> bool {
        for node in self.topology.nodes_in_domain(&domain(i)) {
            if self.holds(&node, key).await {
                return true;
            }
        }
        false
    }

    /// Number of active domains holding `key`.
    pub async fn domains_holding(&self, key: &str) -> usize {
        let mut count = 0;
        for i in 0..self.topology.active_domains().len() {
            if self.domain_holds(i, key).await {
                count += 1;
            }
        }
        count
    }

    /// Remove `key` straight from one backend.
    pub async fn delete_raw(&self, node: &NodeName, key: &str) {
        self.backends[node]
            .delete(node.as_str(), key)
            .await
            .expect("raw delete");
    }

    /// Store `count` objects under [`object_hash`] names for `tenant`.
    ///
    /// Returns `(hash, path, data)` for each write that succeeded.
    pub async fn write_objects(
        &self,
        count: usize,
        tenant: TenantId,
    ) -> Vec<(String, ObjectPath, Bytes)> {
        let mut written = Vec::new();
        for i in 0..count {
            let hash = object_hash(i);
            let data = test_data_seeded(512 + i * 7, i as u32);
            if let Ok(path) = self.engine.store(data.clone(), &hash, tenant).await {
                written.push((hash, path, data));
            }
        }
        written
    }
}

impl Drop for IntegrationCluster {
    fn drop(&mut self) {
        if let Ok(tasks) = self.tasks.get_mut() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

//! Wiring of the engine and its background services from a [`DaemonConfig`].

use std::sync::Arc;

use anyhow::{Context, Result};
use fathom_cluster::{HealthRegistry, MemoryLock};
use fathom_engine::StorageNode;
use fathom_meta::MetaStore;
use fathom_placement::Topology;
use fathom_repair::{
    ConsistencyRepair, DegradedWriteTracker, RebalanceService, RecoveryListener, RepairContext,
    StandbyPoolManager,
};
use fathom_store::{FileStore, MemoryStore, NodePool, ObjectStore};
use fathom_types::events::{EventBus, NodeTopologyChanged};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::{DaemonConfig, NodeEntry};
use crate::probe;

/// Everything a running daemon holds on to.
pub struct Services {
    pub node: Arc<StorageNode>,
    pub topology: Arc<Topology>,
    pub health: Arc<HealthRegistry>,
    pub pool: NodePool,
    pub events: EventBus,
    pub repair: Arc<ConsistencyRepair>,
    pub tracker: Arc<DegradedWriteTracker>,
    pub rebalance: Arc<RebalanceService>,
    pub recovery: Arc<RecoveryListener>,
    pub standby: Arc<StandbyPoolManager>,
}

impl Services {
    /// Build topology, backends, metadata store and services.
    pub fn build(config: &DaemonConfig) -> Result<Self> {
        let topology = Arc::new(
            Topology::new(&config.topology_config(), config.replication)
                .context("invalid topology")?,
        );
        let events = EventBus::new();
        let health = Arc::new(HealthRegistry::new(topology.clone(), events.clone()));

        let mut pool = NodePool::new();
        for entry in config.node_entries() {
            let store = open_backend(config, &entry)?;
            pool.insert(entry.name.clone(), store);
        }

        let meta = if config.memory_backend() {
            info!("using temporary metadata store");
            MetaStore::open_temporary().context("failed to open temporary metadata store")?
        } else {
            let path = config.node.data_dir.join("meta");
            MetaStore::open(&path)
                .with_context(|| format!("failed to open metadata store at {}", path.display()))?
        };

        let ctx = RepairContext {
            topology: topology.clone(),
            health: health.clone(),
            pool: pool.clone(),
            lock: Arc::new(MemoryLock::new()),
            events: events.clone(),
            limits: config.copy_limits(),
        };
        let repair = ConsistencyRepair::new(ctx.clone(), config.repair);
        let tracker = Arc::new(DegradedWriteTracker::new(
            Arc::new(meta),
            topology.clone(),
            events.clone(),
        ));
        let rebalance = RebalanceService::new(ctx.clone(), config.rebalance);
        let recovery = RecoveryListener::new(
            ctx.clone(),
            tracker.clone(),
            repair.clone(),
            config.degraded_write,
            config.recovery,
        );
        let standby = StandbyPoolManager::new(ctx.clone(), config.standby);
        let node = Arc::new(StorageNode::new(
            config.storage_node_config(),
            &ctx,
            repair.clone(),
            tracker.clone(),
            rebalance.clone(),
        ));

        Ok(Self {
            node,
            topology,
            health,
            pool,
            events,
            repair,
            tracker,
            rebalance,
            recovery,
            standby,
        })
    }

    /// Start the probe, audit, recovery, standby and rebalance loops.
    pub fn spawn_background(&self, config: &DaemonConfig) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();

        tasks.push(tokio::spawn(probe::run(
            self.pool.clone(),
            self.health.clone(),
            config.health,
            config.node_op_timeout(),
        )));

        let repair = self.repair.clone();
        let interval = std::time::Duration::from_secs(config.repair.interval_secs.max(1));
        tasks.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            // The first tick fires immediately; audits start one interval in.
            tick.tick().await;
            loop {
                tick.tick().await;
                repair.run_scheduled_audit().await;
            }
        }));

        let events = self.events.subscribe::<NodeTopologyChanged>();
        tasks.push(tokio::spawn(self.rebalance.clone().run(events)));

        if self.recovery.enabled() {
            let events = self.events.subscribe::<NodeTopologyChanged>();
            tasks.push(tokio::spawn(self.recovery.clone().run_event_loop(events)));
            tasks.push(tokio::spawn(self.recovery.clone().run_poll_loop()));
        }

        if self.topology.snapshot().standby_domain().is_some() {
            tasks.push(tokio::spawn(self.standby.clone().run()));
        }

        info!(tasks = tasks.len(), "background services started");
        tasks
    }
}

fn open_backend(config: &DaemonConfig, entry: &NodeEntry) -> Result<Arc<dyn ObjectStore>> {
    let presigner = config.presigner()?;

    if config.memory_backend() {
        let mut store = MemoryStore::new(entry.capacity_bytes.unwrap_or(u64::MAX));
        if let Some(presigner) = presigner {
            store = store.with_presigner(presigner);
        }
        return Ok(Arc::new(store));
    }

    let path = config
        .node
        .data_dir
        .join("nodes")
        .join(entry.name.as_str());
    info!(node = %entry.name, path = %path.display(), "using file backend");
    let mut store = FileStore::new(&path)
        .with_context(|| format!("failed to initialize file backend at {}", path.display()))?;
    if let Some(presigner) = presigner {
        store = store.with_presigner(presigner);
    }
    Ok(Arc::new(store))
}

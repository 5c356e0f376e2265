//! Standby pool promotion.
//!
//! When an active domain has fewer healthy nodes than its `min_nodes`,
//! healthy nodes from the standby domain are moved into it. Each promotion
//! publishes a `NodeDomainChanged` event, which the rebalance service turns
//! into a copy-to-promoted task.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use fathom_types::events::{NodeTopologyChanged, TopologyChange};
use fathom_types::{DomainName, NodeName, StandbyConfig};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::context::RepairContext;

/// A standby node moved into an active domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Promotion {
    /// The promoted node.
    pub node: NodeName,
    /// Domain it left.
    pub from: DomainName,
    /// Domain it joined.
    pub to: DomainName,
}

/// Keeps active domains at their minimum size.
pub struct StandbyPoolManager {
    ctx: RepairContext,
    config: StandbyConfig,
}

impl StandbyPoolManager {
    /// Create the manager.
    pub fn new(ctx: RepairContext, config: StandbyConfig) -> Arc<Self> {
        Arc::new(Self { ctx, config })
    }

    /// One check: promote standby nodes into every domain below its minimum.
    pub fn check_and_promote(&self) -> Vec<Promotion> {
        let snapshot = self.ctx.topology.snapshot();
        let health = self.ctx.health.as_ref();

        if !snapshot.uses_fault_domains() {
            return Vec::new();
        }
        let Some(standby) = snapshot.standby_domain().cloned() else {
            return Vec::new();
        };

        let mut candidates: VecDeque<NodeName> = snapshot.healthy_standby_nodes(health).into();
        let mut promotions = Vec::new();

        for domain in snapshot.active_domains() {
            let min_nodes = snapshot.domain_spec(domain).map_or(1, |spec| spec.min_nodes);
            let healthy = snapshot.count_healthy_in_domain(domain, health);
            if healthy >= min_nodes {
                continue;
            }

            let mut deficit = min_nodes - healthy;
            warn!(%domain, healthy, min_nodes, deficit, "domain below minimum size");
            if candidates.is_empty() {
                error!(%domain, deficit, "capacity emergency: no healthy standby node to promote");
                continue;
            }

            while deficit > 0 {
                let Some(node) = candidates.pop_front() else {
                    break;
                };
                if !self.ctx.topology.change_node_domain(&node, domain) {
                    warn!(%node, %domain, "promotion failed, trying next standby node");
                    continue;
                }

                info!(%node, from = %standby, to = %domain, "promoted standby node");
                self.ctx.events.emit(NodeTopologyChanged {
                    node: node.clone(),
                    domain: Some(domain.clone()),
                    previous_domain: Some(standby.clone()),
                    change: TopologyChange::NodeDomainChanged,
                });
                promotions.push(Promotion {
                    node,
                    from: standby.clone(),
                    to: domain.clone(),
                });
                deficit -= 1;
            }

            if deficit > 0 {
                error!(%domain, deficit, "capacity emergency: standby pool exhausted");
            }
        }
        promotions
    }

    /// Periodic check. Starts after the configured offset so that health
    /// probes have run first. Never returns.
    pub async fn run(self: Arc<Self>) {
        tokio::time::sleep(Duration::from_secs(self.config.initial_delay_secs)).await;
        let mut tick = tokio::time::interval(Duration::from_secs(self.config.interval_secs.max(1)));
        info!("standby pool manager started");
        loop {
            tick.tick().await;
            let promotions = self.check_and_promote();
            if promotions.is_empty() {
                debug!("standby check: no promotion needed");
            }
        }
    }
}

impl std::fmt::Debug for StandbyPoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StandbyPoolManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

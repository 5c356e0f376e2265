//! Backend liveness probing.
//!
//! Each round calls `health_check` on every backend in the pool and feeds
//! the result to the [`HealthRegistry`], which publishes status transitions.
//! Reachable backends also report their capacity as load metrics.

use std::sync::Arc;
use std::time::Duration;

use fathom_cluster::{HealthRegistry, NodeMetrics};
use fathom_store::NodePool;
use tracing::{debug, warn};

use crate::config::HealthSection;

/// Probe every backend once. Returns how many are online.
pub async fn probe_once(pool: &NodePool, health: &HealthRegistry, timeout: Duration) -> usize {
    let mut online = 0;
    for node in pool.nodes() {
        let Some(store) = pool.get(&node) else {
            continue;
        };
        let reachable = match tokio::time::timeout(timeout, store.health_check()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(%node, error = %e, "health check failed");
                false
            }
            Err(_) => {
                warn!(%node, ?timeout, "health check timed out");
                false
            }
        };
        health.set_online(&node, reachable);
        if !reachable {
            continue;
        }
        online += 1;

        match tokio::time::timeout(timeout, store.capacity()).await {
            Ok(Ok(capacity)) => health.set_metrics(
                &node,
                NodeMetrics {
                    disk_usage_percent: capacity.usage_percent(),
                    ..Default::default()
                },
            ),
            _ => debug!(%node, "capacity unavailable"),
        }
    }
    online
}

/// Probe forever at the configured interval.
pub async fn run(pool: NodePool, health: Arc<HealthRegistry>, config: HealthSection, timeout: Duration) {
    tokio::time::sleep(Duration::from_secs(config.initial_delay_secs)).await;
    let mut tick = tokio::time::interval(Duration::from_secs(config.probe_interval_secs.max(1)));
    loop {
        tick.tick().await;
        let online = probe_once(&pool, &health, timeout).await;
        debug!(online, total = pool.len(), "health probe round finished");
    }
}

//! Admin surface: health, locations, node membership, background triggers.

use std::time::Duration;

use fathom_types::events::{NodeTopologyChanged, TopologyChange};
use fathom_types::{RebalanceConfig, TenantId};

use super::helpers::*;
use crate::{DomainStatus, EngineError, StorageEngine};

#[tokio::test]
async fn test_cluster_health() {
    let c = three_domains().build();
    c.set_online("b1", false);

    let health = c.node.cluster_health();
    assert_eq!(health.len(), 3);
    assert!(health[&n("a1")]);
    assert!(!health[&n("b1")]);
    assert!(health[&n("c1")]);
}

#[tokio::test]
async fn test_domain_health() {
    let c = cluster(&[("a", &["a1", "a2"]), ("b", &["b1"]), ("c", &["c1"])])
        .standby("spare", &["s1"])
        .build();
    c.set_online("a2", false);
    c.set_online("b1", false);

    let report = c.node.domain_health();
    assert_eq!(report.len(), 4);

    let a = &report[&d("a")];
    assert_eq!((a.total_nodes, a.healthy_nodes), (2, 1));
    assert_eq!(a.status, DomainStatus::Degraded);
    assert!(!a.nodes[&n("a2")]);

    assert_eq!(report[&d("b")].status, DomainStatus::Down);
    assert_eq!(report[&d("c")].status, DomainStatus::Healthy);
    assert_eq!(report[&d("spare")].status, DomainStatus::Healthy);
}

#[test]
fn test_domain_status_from_counts() {
    assert_eq!(DomainStatus::from_counts(0, 0), DomainStatus::Empty);
    assert_eq!(DomainStatus::from_counts(3, 3), DomainStatus::Healthy);
    assert_eq!(DomainStatus::from_counts(3, 1), DomainStatus::Degraded);
    assert_eq!(DomainStatus::from_counts(3, 0), DomainStatus::Down);
}

#[tokio::test]
async fn test_chunk_locations_are_verified() {
    let c = three_domains().build();
    let path = c
        .node
        .store(test_data(32), "h1", TenantId(2))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut all = c.node.chunk_locations("h1", TenantId(2)).await.unwrap();
    all.sort();
    assert_eq!(all, vec![n("a1"), n("b1"), n("c1")]);

    c.delete_raw("b1", &path.key()).await;
    c.set_online("c1", false);
    assert_eq!(
        c.node.chunk_locations("h1", TenantId(2)).await.unwrap(),
        vec![n("a1")]
    );

    assert!(c.node.chunk_locations("h1", TenantId(9)).await.unwrap().is_empty());
    assert!(matches!(
        c.node.chunk_locations("", TenantId(0)).await,
        Err(EngineError::InvalidParameter(_))
    ));
}

#[tokio::test]
async fn test_set_node_enabled_publishes_change() {
    let c = cluster(&[("a", &["a1", "a2"]), ("b", &["b1"])]).build();
    let mut rx = c.events.subscribe::<NodeTopologyChanged>();

    assert!(c.node.set_node_enabled(&n("a2"), false).unwrap());
    let event = rx.try_recv().unwrap();
    assert_eq!(event.node, n("a2"));
    assert_eq!(event.domain, Some(d("a")));
    assert_eq!(event.change, TopologyChange::NodeRemoved);
    assert!(!c.node.cluster_health().contains_key(&n("a2")));

    assert!(!c.node.set_node_enabled(&n("a2"), false).unwrap());
    assert!(rx.try_recv().is_none());

    assert!(c.node.set_node_enabled(&n("a2"), true).unwrap());
    assert_eq!(rx.try_recv().unwrap().change, TopologyChange::NodeAdded);

    assert!(matches!(
        c.node.set_node_enabled(&n("zz"), true),
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_rebalance_trigger_and_status() {
    let c = three_domains().build();
    let task = c.node.trigger_rebalance(None).await.unwrap();
    assert!(task.starts_with("rebalance-"));

    for _ in 0..200 {
        if c.node.rebalance_status().finished_at_ms.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let status = c.node.rebalance_status();
    assert!(!status.running);
    assert!(status.success);

    let disabled = three_domains()
        .rebalance(RebalanceConfig {
            enabled: false,
            ..Default::default()
        })
        .build();
    assert!(matches!(
        disabled.node.trigger_rebalance(None).await,
        Err(EngineError::Disabled(_))
    ));
    assert!(matches!(
        c.node.trigger_rebalance(Some(d("nowhere"))).await,
        Err(EngineError::InvalidParameter(_))
    ));
}

#[tokio::test]
async fn test_manual_repair() {
    let c = three_domains().build();
    c.put_raw("a1", "tenant/0/orphan", test_data(16)).await;

    let stats = c.node.trigger_repair().await.unwrap();
    assert_eq!(stats.domain_pairs_checked, 3);
    assert_eq!(stats.objects_repaired, 2);
    assert!(c.holds("b1", "tenant/0/orphan").await);

    let single = cluster(&[("a", &["a1", "a2"])]).build();
    assert!(matches!(
        single.node.trigger_repair().await,
        Err(EngineError::Disabled(_))
    ));
}

#[tokio::test]
async fn test_degraded_pending_through_trait() {
    let c = three_domains().degraded(1).build();
    c.set_online("c1", false);
    c.node
        .store(test_data(16), "h1", TenantId(0))
        .await
        .unwrap();

    let engine: &dyn StorageEngine = &c.node;
    assert_eq!(engine.degraded_pending().unwrap(), 1);
    assert_eq!(engine.cluster_health().len(), 3);
}

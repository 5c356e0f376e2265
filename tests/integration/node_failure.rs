//! Integration test: node failure.
//!
//! Nodes and whole domains go down; data stays readable, the rebalance
//! service moves data to the nodes that take over, and standby nodes fill
//! domains that emptied.

use std::collections::BTreeMap;
use std::time::Duration;

use fathom_integration_tests::{IntegrationCluster, domain, eventually, node, object_hash, spare};
use fathom_repair::RebalanceType;
use fathom_types::{NodeName, TenantId};
use fathom_types::events::{NodeTopologyChanged, TopologyChange};

/// 3 domains x 2 nodes, 30 objects, one domain down: all 30 still read.
/// Degraded writes are allowed down to 2 domains.
#[tokio::test]
async fn test_domain_outage_keeps_objects_readable() {
    let c = IntegrationCluster::builder(3, 2).degraded(2).build();
    let objects = c.write_objects(30, TenantId(1)).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    c.kill_domain(1);
    for (hash, path, expected) in &objects {
        let got = c.engine.fetch_bytes(&path.to_string(), hash).await.unwrap();
        assert_eq!(&got, expected, "{path} unreadable with zone-1 down");
    }

    // Writes keep going in the two remaining domains, each one recorded.
    assert_eq!(c.tracker.pending_count().unwrap(), 0);
    let extra = c.write_objects(35, TenantId(2)).await;
    assert_eq!(extra.len(), 35);
    assert_eq!(c.tracker.pending_count().unwrap(), 35);
}

/// A node going offline triggers a migration of what it owned to the next
/// node of its domain, read from the other domains.
#[tokio::test]
async fn test_offline_node_data_migrates_to_successor() {
    let c = IntegrationCluster::builder(3, 2).build();
    let objects = c.write_objects(40, TenantId(0)).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    c.start_background();

    let failed = node(0, 1);
    let owned: Vec<String> = objects
        .iter()
        .filter(|(hash, _, _)| {
            c.topology.target_node_in_domain(hash, &domain(0)).as_ref() == Some(&failed)
        })
        .map(|(_, path, _)| path.key())
        .collect();
    assert!(!owned.is_empty());

    c.kill_node(&failed);
    let successor = node(0, 2);
    let migrated = eventually(Duration::from_secs(5), || async {
        for key in &owned {
            if !c.holds(&successor, key).await {
                return false;
            }
        }
        true
    })
    .await;
    assert!(migrated, "successor did not receive the failed node's data");

    let status = c.rebalance.status();
    assert_eq!(status.task_type, Some(RebalanceType::MigrateFromFailed));
    assert_eq!(status.trigger_node, Some(failed));
}

/// Disabling a node moves only the hashes it owned; the migration that
/// follows copies exactly those to their new owners.
#[tokio::test]
async fn test_disabled_node_moves_only_its_keys() {
    let c = IntegrationCluster::builder(3, 4).build();
    let objects = c.write_objects(30, TenantId(0)).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    c.start_background();

    let hashes: Vec<String> = (0..500).map(object_hash).collect();
    let before: BTreeMap<&String, _> = hashes
        .iter()
        .map(|h| (h, c.topology.target_node_in_domain(h, &domain(0))))
        .collect();

    let removed = node(0, 2);
    assert!(c.engine.set_node_enabled(&removed, false).unwrap());

    let mut moved = 0;
    for hash in &hashes {
        let after = c.topology.target_node_in_domain(hash, &domain(0));
        if before[hash].as_ref() == Some(&removed) {
            assert_ne!(after.as_ref(), Some(&removed));
            moved += 1;
        } else {
            assert_eq!(after, before[hash], "{hash} moved without cause");
        }
    }
    assert!(moved > 0);

    let relocated: Vec<(String, NodeName)> = objects
        .iter()
        .filter(|(hash, _, _)| before[hash].as_ref() == Some(&removed))
        .filter_map(|(hash, path, _)| {
            let owner = c.topology.target_node_in_domain(hash, &domain(0))?;
            Some((path.key(), owner))
        })
        .collect();

    let migrated = eventually(Duration::from_secs(5), || async {
        for (key, owner) in &relocated {
            if !c.holds(owner, key).await {
                return false;
            }
        }
        true
    })
    .await;
    assert!(migrated, "new owners did not receive the removed node's data");
}

/// An emptied domain takes a standby node, which then receives the objects
/// it now owns from the other domains.
#[tokio::test]
async fn test_standby_promotion_backfills_domain() {
    let c = IntegrationCluster::builder(3, 1).spares(1).build();
    let objects = c.write_objects(20, TenantId(0)).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut changes = c.events.subscribe::<NodeTopologyChanged>();
    c.kill_node(&node(0, 1));

    let promotions = c.standby.check_and_promote();
    assert_eq!(promotions.len(), 1);
    assert_eq!(promotions[0].node, spare(1));
    assert_eq!(promotions[0].to, domain(0));
    assert!(c.topology.nodes_in_domain(&domain(0)).contains(&spare(1)));

    let mut promoted = None;
    while let Some(event) = changes.try_recv() {
        if event.change == TopologyChange::NodeDomainChanged {
            promoted = Some(event);
        }
    }
    let promoted = promoted.expect("promotion event");
    assert_eq!(promoted.previous_domain.as_ref().map(|d| d.as_str()), Some("spare"));
    assert_eq!(
        c.rebalance.handle_event(&promoted).await,
        Some(RebalanceType::CopyToPromoted)
    );

    let mut backfilled = 0;
    for (hash, path, _) in &objects {
        if c.topology.target_node_in_domain(hash, &domain(0)) == Some(spare(1)) {
            assert!(c.holds(&spare(1), &path.key()).await, "{path} not backfilled");
            backfilled += 1;
        }
    }
    assert!(backfilled > 0);

    // Nothing left to promote: the domain is at its minimum again.
    assert!(c.standby.check_and_promote().is_empty());

    // New writes reach zone-0 through the promoted node.
    let fresh = c
        .engine
        .store(bytes::Bytes::from_static(b"after promotion"), "fresh", TenantId(0))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(c.holds(&spare(1), &fresh.key()).await);
}

//! Integration test: write and read through the whole engine.
//!
//! Quorum acknowledgement, background completion of the remaining uploads,
//! and reads that fall back across domains.

use std::collections::BTreeMap;
use std::time::Duration;

use fathom_engine::EngineError;
use fathom_integration_tests::{IntegrationCluster, domain, node, test_data_seeded};
use fathom_types::TenantId;
use tokio::time::Instant;

/// 3 domains x 2 nodes, 50 objects over 5 tenants: every object reads back
/// and lands in every domain.
#[tokio::test]
async fn test_many_objects_round_trip() {
    let c = IntegrationCluster::builder(3, 2).build();

    let mut objects = Vec::new();
    for tenant in 0..5u64 {
        for (hash, path, data) in c.write_objects(10, TenantId(tenant)).await {
            assert_eq!(path.tenant(), TenantId(tenant));
            objects.push((hash, path, data));
        }
    }
    assert_eq!(objects.len(), 50);

    for (hash, path, expected) in &objects {
        let got = c.engine.fetch_bytes(&path.to_string(), hash).await.unwrap();
        assert_eq!(&got, expected, "data mismatch for {path}");
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    for (_, path, _) in &objects {
        assert_eq!(c.domains_holding(&path.key()).await, 3, "{path} under-replicated");
    }
    assert_eq!(c.tracker.pending_count().unwrap(), 0);
}

/// 4 domains, factor 4, quorum 2. Two domains are slow: the write returns
/// once the two fast uploads finish, the slow ones land afterwards, and no
/// degraded record is created.
#[tokio::test(start_paused = true)]
async fn test_quorum_two_of_four_returns_early() {
    let c = IntegrationCluster::builder(4, 1)
        .factor(4)
        .quorum(2)
        .degraded(3)
        .slow_writes(node(2, 1), 5_000)
        .slow_writes(node(3, 1), 5_000)
        .build();
    assert_eq!(c.topology.effective_replication_factor(), 4);
    assert_eq!(c.topology.effective_quorum(), 2);

    let data = test_data_seeded(4096, 7);
    let start = Instant::now();
    let path = c.engine.store(data.clone(), "quorum", TenantId(1)).await.unwrap();
    assert!(
        start.elapsed() < Duration::from_secs(5),
        "write waited for the slow uploads"
    );

    let key = path.key();
    assert!(c.holds(&node(0, 1), &key).await);
    assert!(c.holds(&node(1, 1), &key).await);
    assert!(!c.holds(&node(2, 1), &key).await);

    tokio::time::sleep(Duration::from_secs(6)).await;
    for i in 0..4 {
        assert!(c.holds(&node(i, 1), &key).await, "zone-{i} missing copy");
    }
    assert_eq!(c.tracker.pending_count().unwrap(), 0);
    assert_eq!(
        c.engine.fetch_bytes(&path.to_string(), "quorum").await.unwrap(),
        data
    );
}

/// A single slow domain with quorum = factor holds the write back.
#[tokio::test(start_paused = true)]
async fn test_quorum_all_waits_for_slowest() {
    let c = IntegrationCluster::builder(3, 1)
        .quorum(3)
        .slow_writes(node(1, 1), 2_000)
        .build();

    let start = Instant::now();
    c.engine
        .store(test_data_seeded(128, 1), "all", TenantId(0))
        .await
        .unwrap();
    assert!(start.elapsed() >= Duration::from_secs(2));
}

/// Reads survive losing every copy but one, whether the node is down or the
/// copy is gone.
#[tokio::test]
async fn test_read_falls_back_across_domains() {
    let c = IntegrationCluster::builder(3, 2).build();
    let objects = c.write_objects(20, TenantId(3)).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Domain 0 is down entirely.
    c.kill_domain(0);
    // Domain 1 lost its copies.
    for (_, path, _) in &objects {
        for n in c.topology.nodes_in_domain(&domain(1)) {
            c.delete_raw(&n, &path.key()).await;
        }
    }

    for (hash, path, expected) in &objects {
        let got = c.engine.fetch_bytes(&path.to_string(), hash).await.unwrap();
        assert_eq!(&got, expected);
    }

    // With domain 2 down too nothing is left.
    c.kill_domain(2);
    let (hash, path, _) = &objects[0];
    let err = c.engine.fetch_bytes(&path.to_string(), hash).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

/// Batch reads and deletes over the same set of objects.
#[tokio::test]
async fn test_batch_fetch_then_delete() {
    let c = IntegrationCluster::builder(3, 1).build();
    let objects = c.write_objects(8, TenantId(2)).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let items: Vec<(String, String)> = objects
        .iter()
        .map(|(hash, path, _)| (path.to_string(), hash.clone()))
        .collect();
    let batch = c.engine.fetch_many(&items).await.unwrap();
    for ((_, _, expected), got) in objects.iter().zip(&batch) {
        assert_eq!(expected, got);
    }

    let entries: BTreeMap<String, String> = objects
        .iter()
        .map(|(hash, path, _)| (hash.clone(), path.to_string()))
        .collect();
    c.engine.delete(&entries).await.unwrap();

    for (_, path, _) in &objects {
        assert_eq!(c.domains_holding(&path.key()).await, 0);
    }
    assert!(c.engine.fetch_many(&items).await.is_err());
}

/// The same hash under two tenants is two independent objects.
#[tokio::test]
async fn test_tenants_are_isolated() {
    let c = IntegrationCluster::builder(3, 1).build();
    let one = c
        .engine
        .store(test_data_seeded(64, 1), "shared", TenantId(1))
        .await
        .unwrap();
    let two = c
        .engine
        .store(test_data_seeded(64, 2), "shared", TenantId(2))
        .await
        .unwrap();
    assert_ne!(one.key(), two.key());

    let entries = BTreeMap::from([("shared".to_string(), one.to_string())]);
    tokio::time::sleep(Duration::from_millis(50)).await;
    c.engine.delete(&entries).await.unwrap();

    assert!(c.engine.fetch_bytes(&one.to_string(), "shared").await.is_err());
    assert_eq!(
        c.engine.fetch_bytes(&two.to_string(), "shared").await.unwrap(),
        test_data_seeded(64, 2)
    );
}

//! Integration test: cross-domain consistency repair.

use std::time::Duration;

use fathom_integration_tests::{IntegrationCluster, domain, eventually, node};
use fathom_types::TenantId;
use fathom_types::events::ObjectRepaired;

/// Copies lost from one domain come back after an audit, and a second
/// audit has nothing left to do.
#[tokio::test]
async fn test_audit_restores_lost_copies() {
    let c = IntegrationCluster::builder(3, 2).build();
    let objects = c.write_objects(20, TenantId(5)).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    for (_, path, _) in objects.iter().take(10) {
        for n in c.topology.nodes_in_domain(&domain(2)) {
            c.delete_raw(&n, &path.key()).await;
        }
    }
    for (_, path, _) in objects.iter().take(10) {
        assert_eq!(c.domains_holding(&path.key()).await, 2);
    }

    let first = c.repair.trigger_manual_audit().await.unwrap();
    assert_eq!(first.domain_pairs_checked, 3);
    assert!(first.objects_repaired >= 10);
    assert_eq!(first.failures, 0);
    for (_, path, _) in &objects {
        assert_eq!(c.domains_holding(&path.key()).await, 3, "{path} not repaired");
    }

    let second = c.repair.trigger_manual_audit().await.unwrap();
    assert_eq!(second.objects_repaired, 0);
    assert_eq!(second.objects_checked, 3 * 20);
}

/// Objects present in only one domain spread to the others.
#[tokio::test]
async fn test_audit_spreads_single_copies() {
    let c = IntegrationCluster::builder(3, 1).build();
    let objects = c.write_objects(5, TenantId(0)).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    for (_, path, _) in &objects {
        c.delete_raw(&node(1, 1), &path.key()).await;
        c.delete_raw(&node(2, 1), &path.key()).await;
    }

    let stats = c.engine.trigger_repair().await.unwrap();
    assert!(stats.objects_repaired >= 10);
    for (hash, path, data) in &objects {
        assert_eq!(c.domains_holding(&path.key()).await, 3);
        c.kill_node(&node(0, 1));
        let got = c.engine.fetch_bytes(&path.to_string(), hash).await.unwrap();
        assert_eq!(&got, data);
        c.revive_node(&node(0, 1));
    }
}

/// A domain with no healthy node is left out of the comparison.
#[tokio::test]
async fn test_audit_skips_dark_domain() {
    let c = IntegrationCluster::builder(3, 1).build();
    c.write_objects(5, TenantId(0)).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    c.kill_domain(2);
    let stats = c.repair.trigger_manual_audit().await.unwrap();
    assert_eq!(stats.domain_pairs_checked, 1);
    assert_eq!(stats.objects_repaired, 0);
}

/// An upload that fails after quorum is retried by the immediate repair
/// until the node accepts it.
#[tokio::test]
async fn test_failed_upload_repaired_in_background() {
    let c = IntegrationCluster::builder(3, 1).repair_backoff_ms(50).build();
    let mut repaired = c.events.subscribe::<ObjectRepaired>();

    let flaky = node(2, 1);
    c.store(&flaky).set_fail_writes(true);
    let path = c
        .engine
        .store(bytes::Bytes::from_static(b"retry me"), "retry", TenantId(0))
        .await
        .unwrap();
    c.store(&flaky).set_fail_writes(false);

    let healed = eventually(Duration::from_secs(5), || async {
        c.holds(&flaky, &path.key()).await
    })
    .await;
    assert!(healed, "immediate repair never reached {flaky}");
    assert!(c.store(&flaky).put_attempts() >= 2);

    let event = tokio::time::timeout(Duration::from_secs(1), repaired.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.key, path.key());
    assert_eq!(event.target, flaky);
}

//! Integration test: degraded writes and their recovery.
//!
//! 4 active domains, factor 4, degraded-write floor 3. One domain goes dark,
//! writes keep landing in the other three and are recorded; once the domain
//! is back every record drains.

use std::time::Duration;

use fathom_engine::EngineError;
use fathom_integration_tests::{IntegrationCluster, domain, eventually, node};
use fathom_repair::TriggerSource;
use fathom_types::TenantId;

fn four_domains_floor_three() -> IntegrationCluster {
    IntegrationCluster::builder(4, 1)
        .factor(4)
        .quorum(2)
        .degraded(3)
        .build()
}

/// One write with a dark domain: succeeds in 3 domains, one record with the
/// dark domain missing, drained within one sync after the domain returns.
#[tokio::test]
async fn test_degraded_write_drains_when_domain_returns() {
    let c = four_domains_floor_three();
    c.start_background();
    c.kill_node(&node(3, 1));

    let path = c
        .engine
        .store(bytes::Bytes::from_static(b"degraded"), "deg1", TenantId(9))
        .await
        .unwrap();

    let records = c.tracker.pending().unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.content_hash.as_str(), "deg1");
    assert_eq!(record.tenant, TenantId(9));
    assert_eq!(record.missing_domains, vec![domain(3)]);
    assert_eq!(record.written_nodes.len(), 3);
    assert!(!record.written_nodes.contains(&node(3, 1)));

    // NodeOnline drives the sync.
    c.revive_node(&node(3, 1));
    let drained = eventually(Duration::from_secs(5), || async {
        c.tracker.pending_count().unwrap() == 0
    })
    .await;
    assert!(drained, "degraded record still pending");
    assert!(c.holds(&node(3, 1), &path.key()).await);
    assert_eq!(c.domains_holding(&path.key()).await, 4);
}

/// Records accumulate while the domain is down and a single poll drains all
/// of them once it is back.
#[tokio::test]
async fn test_single_poll_drains_every_record() {
    let c = four_domains_floor_three();
    c.kill_node(&node(1, 1));

    let objects = c.write_objects(12, TenantId(0)).await;
    assert_eq!(objects.len(), 12);
    assert_eq!(c.tracker.pending_count().unwrap(), 12);
    for record in c.tracker.pending_for_domain(&domain(1)).unwrap() {
        assert_eq!(record.missing_domains, vec![domain(1)]);
    }

    // Still down: nothing can be synced.
    let report = c.recovery.attempt_sync(TriggerSource::Poll).await.unwrap();
    assert_eq!(report.records_checked, 12);
    assert_eq!(report.domains_synced, 0);
    assert_eq!(report.still_pending, 12);
    assert_eq!(c.tracker.pending_count().unwrap(), 12);

    c.revive_node(&node(1, 1));
    let report = c.recovery.attempt_sync(TriggerSource::Poll).await.unwrap();
    assert_eq!(report.domains_synced, 12);
    assert_eq!(report.records_completed, 12);
    assert_eq!(report.still_pending, 0);
    assert_eq!(c.tracker.pending_count().unwrap(), 0);

    for (hash, path, data) in &objects {
        assert!(c.holds(&node(1, 1), &path.key()).await);
        let got = c.engine.fetch_bytes(&path.to_string(), hash).await.unwrap();
        assert_eq!(&got, data);
    }
}

/// Two dark domains leave 2 targets, below the floor of 3.
#[tokio::test]
async fn test_write_below_floor_is_rejected() {
    let c = four_domains_floor_three();
    c.kill_node(&node(0, 1));
    c.kill_node(&node(2, 1));

    let err = c
        .engine
        .store(bytes::Bytes::from_static(b"nope"), "deg2", TenantId(0))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::InsufficientReplicas {
            available: 2,
            required: 4
        }
    ));
    for i in [1, 3] {
        assert_eq!(c.store(&node(i, 1)).put_attempts(), 0);
    }
    assert_eq!(c.tracker.pending_count().unwrap(), 0);
}

/// A record whose written nodes are all down waits; it drains once one of
/// them and the missing domain are back.
#[tokio::test]
async fn test_sync_waits_for_a_source() {
    let c = four_domains_floor_three();
    c.kill_node(&node(3, 1));
    let objects = c.write_objects(1, TenantId(0)).await;
    let (_, path, _) = &objects[0];

    for i in 0..3 {
        c.kill_node(&node(i, 1));
    }
    c.revive_node(&node(3, 1));

    let report = c.recovery.attempt_sync(TriggerSource::Poll).await.unwrap();
    assert_eq!(report.domains_synced, 0);
    assert_eq!(report.still_pending, 1);

    c.revive_node(&node(0, 1));
    let report = c.recovery.attempt_sync(TriggerSource::Poll).await.unwrap();
    assert_eq!(report.records_completed, 1);
    assert!(c.holds(&node(3, 1), &path.key()).await);
}

/// With degraded writes off a dark domain fails the write and recovery
/// stays idle.
#[tokio::test]
async fn test_degraded_writes_disabled_rejects() {
    let c = IntegrationCluster::builder(4, 1).factor(4).quorum(2).build();
    assert!(!c.recovery.enabled());
    c.kill_node(&node(3, 1));

    let err = c
        .engine
        .store(bytes::Bytes::from_static(b"strict"), "deg3", TenantId(0))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InsufficientReplicas { .. }));
}

//! Chaos test: random node kill/restart.
//!
//! 3 domains x 2 nodes. Background writers keep storing objects while a
//! chaos task takes one random node down at a time and brings it back.
//! Rebalancing and recovery run throughout. Afterwards every acknowledged
//! object must be readable and, after one audit, present in every domain.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use fathom_integration_tests::{IntegrationCluster, eventually, node, test_data_seeded};
use fathom_repair::TriggerSource;
use fathom_types::TenantId;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::Mutex;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_random_kill_no_data_loss() {
    let c = Arc::new(IntegrationCluster::builder(3, 2).degraded(2).build());
    c.start_background();

    let stop = Arc::new(AtomicBool::new(false));
    let written = Arc::new(Mutex::new(Vec::new()));

    // --- Writers ---
    let mut writers = Vec::new();
    for writer in 0..3u32 {
        let cluster = c.clone();
        let stop = stop.clone();
        let written = written.clone();
        writers.push(tokio::spawn(async move {
            let mut idx = 0u32;
            while !stop.load(Ordering::Relaxed) {
                let seed = writer * 100_000 + idx;
                let data = test_data_seeded(256 + (idx as usize % 2048), seed);
                let hash = format!("chaos-{writer}-{idx}");
                let tenant = TenantId(u64::from(writer));
                // Rejected writes were never acknowledged; only the
                // acknowledged ones must survive.
                if let Ok(path) = cluster.engine.store(data.clone(), &hash, tenant).await {
                    written.lock().await.push((hash, path, data));
                }
                idx += 1;
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        }));
    }

    // --- Chaos: one node down at a time ---
    let mut rng = StdRng::seed_from_u64(0xFA7_0A);
    for _ in 0..8 {
        let victim = node(rng.random_range(0..3), rng.random_range(1..=2));
        c.kill_node(&victim);
        tokio::time::sleep(Duration::from_millis(rng.random_range(50..150))).await;
        c.revive_node(&victim);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    stop.store(true, Ordering::Relaxed);
    for writer in writers {
        writer.await.unwrap();
    }

    let written = written.lock().await.clone();
    assert!(!written.is_empty(), "no write succeeded during chaos");

    // --- Settle ---
    // Drain degraded records, then let an audit fill whatever the follow-up
    // uploads and immediate repairs could not.
    let drained = eventually(Duration::from_secs(10), || async {
        c.recovery.attempt_sync(TriggerSource::Poll).await;
        c.tracker.pending_count().unwrap() == 0
    })
    .await;
    assert!(drained, "degraded records left after recovery");

    c.repair.trigger_manual_audit().await.unwrap();
    for (hash, path, data) in &written {
        let got = c.engine.fetch_bytes(&path.to_string(), hash).await.unwrap();
        assert_eq!(&got, data, "data mismatch for {path}");
        assert_eq!(c.domains_holding(&path.key()).await, 3, "{path} under-replicated");
    }
}

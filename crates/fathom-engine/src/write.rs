//! Quorum write.
//!
//! One upload task per target domain reports back over an mpsc channel. The
//! caller returns as soon as `quorum` uploads acknowledge; the remaining
//! uploads keep running in a follow-up task that repairs every target that
//! ends up without the object.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use fathom_repair::ConsistencyRepair;
use fathom_store::{ObjectStore, StoreError};
use fathom_types::{ContentHash, NodeName, ObjectPath, TenantId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::EngineError;
use crate::node::{StorageNode, bounded};

type UploadResult = (NodeName, Result<(), StoreError>);

/// Acknowledgements and failures seen so far for one write.
#[derive(Debug, Default)]
struct Tally {
    acknowledged: Vec<NodeName>,
    failed: Vec<NodeName>,
}

impl Tally {
    fn record(&mut self, key: &str, (node, result): UploadResult) {
        match result {
            Ok(()) => {
                debug!(key, %node, acked = self.acknowledged.len() + 1, "upload acknowledged");
                self.acknowledged.push(node);
            }
            Err(e) => {
                warn!(key, %node, error = %e, "upload failed");
                self.failed.push(node);
            }
        }
    }

    fn settled(&self) -> usize {
        self.acknowledged.len() + self.failed.len()
    }

    /// Consume results until quorum is reached or can no longer be reached.
    async fn wait_for_quorum(
        &mut self,
        key: &str,
        rx: &mut mpsc::Receiver<UploadResult>,
        quorum: usize,
        total: usize,
    ) -> bool {
        while let Some(result) = rx.recv().await {
            self.record(key, result);
            if self.acknowledged.len() >= quorum {
                return true;
            }
            if self.failed.len() > total - quorum {
                return false;
            }
        }
        self.acknowledged.len() >= quorum
    }
}

impl StorageNode {
    /// Store `data` under `hash` for `tenant` in one node per target domain.
    ///
    /// Returns the logical path once a quorum of uploads has acknowledged.
    /// Re-storing the same hash overwrites identical content.
    pub async fn store(
        &self,
        data: Bytes,
        hash: &str,
        tenant: TenantId,
    ) -> Result<ObjectPath, EngineError> {
        if data.is_empty() {
            return Err(EngineError::InvalidParameter("chunk data is empty".into()));
        }
        let hash = ContentHash::new(hash)?;

        let targets = self
            .topology
            .target_nodes_for_write(hash.as_str(), self.health.as_ref());
        let required = self.topology.effective_replication_factor();
        let quorum = self.write_quorum(&hash, targets.len(), required)?;
        let degraded = targets.len() < required;

        let path = ObjectPath::new(tenant, hash.clone());
        let key = path.key();
        info!(key, ?targets, quorum, degraded, size = data.len(), "storing chunk");

        let (tx, mut rx) = mpsc::channel(targets.len());
        let uploads: Vec<JoinHandle<()>> = targets
            .iter()
            .map(|node| self.spawn_upload(node.clone(), key.clone(), data.clone(), tx.clone()))
            .collect();
        drop(tx);

        let mut tally = Tally::default();
        let reached = match tokio::time::timeout(
            self.config.write_timeout,
            tally.wait_for_quorum(&key, &mut rx, quorum, targets.len()),
        )
        .await
        {
            Ok(reached) => reached,
            Err(_) => {
                error!(key, timeout = ?self.config.write_timeout, "quorum wait timed out");
                false
            }
        };

        if !reached {
            for upload in &uploads {
                upload.abort();
            }
            error!(
                key,
                acknowledged = tally.acknowledged.len(),
                required = quorum,
                "quorum not reached"
            );
            return Err(EngineError::QuorumNotReached {
                acknowledged: tally.acknowledged.len(),
                required: quorum,
            });
        }

        info!(
            key,
            acknowledged = tally.acknowledged.len(),
            targets = targets.len(),
            "chunk stored"
        );
        let acknowledged = tally.acknowledged.clone();

        spawn_follow_up(
            self.repair.clone(),
            self.config.write_timeout,
            key,
            targets,
            tally,
            rx,
            uploads,
        );

        if degraded && self.config.degraded.track_for_sync {
            if let Err(e) = self.tracker.record(&hash, &acknowledged, tenant) {
                error!(hash = %hash, error = %e, "failed to record degraded write");
            }
        }
        Ok(path)
    }

    /// Quorum for a write with `available` targets out of `required`.
    fn write_quorum(
        &self,
        hash: &ContentHash,
        available: usize,
        required: usize,
    ) -> Result<usize, EngineError> {
        if available >= required {
            return Ok(self.topology.effective_quorum().min(available));
        }

        let degraded = &self.config.degraded;
        if available > 0 && degraded.enabled && available >= degraded.min_replicas {
            warn!(%hash, available, required, "degraded write, quorum lowered to available targets");
            return Ok(available);
        }

        error!(
            %hash,
            available,
            required,
            degraded_enabled = degraded.enabled,
            min_replicas = degraded.min_replicas,
            "not enough healthy targets"
        );
        Err(EngineError::InsufficientReplicas {
            available,
            required,
        })
    }

    fn spawn_upload(
        &self,
        node: NodeName,
        key: String,
        data: Bytes,
        tx: mpsc::Sender<UploadResult>,
    ) -> JoinHandle<()> {
        let store = self.backend(&node);
        let limit = self.config.node_op_timeout;
        tokio::spawn(async move {
            let result = match store {
                Ok(store) => upload(store.as_ref(), &node, &key, data, limit).await,
                Err(e) => Err(e),
            };
            // The receiver is gone once the follow-up task has finished.
            let _ = tx.send((node, result)).await;
        })
    }
}

async fn upload(
    store: &dyn ObjectStore,
    node: &NodeName,
    key: &str,
    data: Bytes,
    limit: Duration,
) -> Result<(), StoreError> {
    bounded(limit, store.ensure_container(node.as_str())).await?;
    bounded(limit, store.put(node.as_str(), key, data)).await
}

/// Wait for the uploads still running after quorum, then repair every target
/// that failed or never answered from the first acknowledging node.
fn spawn_follow_up(
    repair: Arc<ConsistencyRepair>,
    limit: Duration,
    key: String,
    targets: Vec<NodeName>,
    mut tally: Tally,
    mut rx: mpsc::Receiver<UploadResult>,
    uploads: Vec<JoinHandle<()>>,
) {
    tokio::spawn(async move {
        let total = targets.len();
        let drained = tokio::time::timeout(limit, async {
            while tally.settled() < total {
                match rx.recv().await {
                    Some(result) => tally.record(&key, result),
                    None => break,
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!(key, timeout = ?limit, "uploads still pending after write timeout, cancelling");
        }
        for upload in &uploads {
            upload.abort();
        }

        let lagging: Vec<NodeName> = targets
            .into_iter()
            .filter(|node| !tally.acknowledged.contains(node))
            .collect();
        if lagging.is_empty() {
            debug!(key, "all replicas written");
            return;
        }
        let Some(source) = tally.acknowledged.first().cloned() else {
            return;
        };

        warn!(key, %source, ?lagging, "replicas missing after write, scheduling repair");
        for target in lagging {
            repair.schedule_immediate_repair(key.clone(), source.clone(), target);
        }
    });
}

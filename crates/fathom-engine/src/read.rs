//! Fallback read, presigned URLs and delete fan-out.

use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use fathom_store::StoreError;
use fathom_types::{NodeName, ObjectPath};
use tracing::{debug, error, info, warn};

use crate::error::EngineError;
use crate::node::StorageNode;

impl StorageNode {
    /// Online nodes for `hash` in try order: the least-loaded candidate
    /// first, then the other candidates as placed, then the rest of each
    /// domain's ring walk.
    fn read_order(&self, hash: &str) -> Vec<NodeName> {
        let health = self.health.as_ref();
        let snapshot = self.topology.snapshot();
        let candidates = snapshot.candidate_nodes_for_read(hash, health);
        let primary = self.topology.select_best_node_for_read(&candidates, health);
        let fallbacks = snapshot.fallback_nodes_for_read(hash, &candidates);

        let mut order: Vec<NodeName> = primary.iter().cloned().collect();
        order.extend(
            candidates
                .into_iter()
                .chain(fallbacks)
                .filter(|node| Some(node) != primary.as_ref() && health.is_online(node)),
        );
        order
    }

    /// Read the object at `path`, falling back across candidates.
    pub async fn fetch_bytes(&self, path: &str, hash: &str) -> Result<Bytes, EngineError> {
        let path = ObjectPath::parse_for(path, hash)?;
        let key = path.key();

        let order = self.read_order(hash);
        if order.is_empty() {
            error!(key, "no reachable candidate node");
        }
        for (attempt, node) in order.iter().enumerate() {
            if attempt > 0 {
                info!(key, %node, "trying fallback node");
            }
            match self.fetch_from(node, &key).await {
                Ok(Some(data)) => {
                    debug!(key, %node, size = data.len(), "chunk read");
                    return Ok(data);
                }
                Ok(None) => warn!(key, %node, "chunk missing on candidate"),
                Err(e) => warn!(key, %node, error = %e, "read from candidate failed"),
            }
        }

        error!(key, candidates = ?order, "chunk not found on any candidate");
        Err(EngineError::NotFound(key))
    }

    async fn fetch_from(&self, node: &NodeName, key: &str) -> Result<Option<Bytes>, StoreError> {
        let store = self.backend(node)?;
        let limit = self.config.max_in_memory_bytes;

        let Some(size) = self.bounded(store.head(node.as_str(), key)).await? else {
            return Ok(None);
        };
        if size > limit {
            return Err(StoreError::TooLarge { size, limit });
        }

        let Some(data) = self.bounded(store.get(node.as_str(), key)).await? else {
            return Ok(None);
        };
        if data.len() as u64 > limit {
            return Err(StoreError::TooLarge {
                size: data.len() as u64,
                limit,
            });
        }
        Ok(Some(data))
    }

    /// Mint a download URL valid for `ttl` from a node that holds the object.
    pub async fn fetch_presigned_url(
        &self,
        path: &str,
        hash: &str,
        ttl: Duration,
    ) -> Result<String, EngineError> {
        let path = ObjectPath::parse_for(path, hash)?;
        let key = path.key();

        for node in self.read_order(hash) {
            match self.presign_on(&node, &key, ttl).await {
                Ok(Some(url)) => {
                    debug!(key, %node, "presigned url issued");
                    return Ok(url);
                }
                Ok(None) => warn!(key, %node, "chunk missing on candidate, no url issued"),
                Err(e) => warn!(key, %node, error = %e, "presign on candidate failed"),
            }
        }

        error!(key, "no candidate could presign chunk");
        Err(EngineError::NotFound(key))
    }

    async fn presign_on(
        &self,
        node: &NodeName,
        key: &str,
        ttl: Duration,
    ) -> Result<Option<String>, StoreError> {
        let store = self.backend(node)?;
        if self.bounded(store.head(node.as_str(), key)).await?.is_none() {
            return Ok(None);
        }
        self.bounded(store.presign(node.as_str(), key, ttl))
            .await
            .map(Some)
    }

    /// Batch [`fetch_bytes`](Self::fetch_bytes). The first failure fails the
    /// batch.
    pub async fn fetch_many(&self, items: &[(String, String)]) -> Result<Vec<Bytes>, EngineError> {
        let mut out = Vec::with_capacity(items.len());
        for (path, hash) in items {
            out.push(self.fetch_bytes(path, hash).await?);
        }
        Ok(out)
    }

    /// Batch [`fetch_presigned_url`](Self::fetch_presigned_url).
    pub async fn fetch_presigned_urls(
        &self,
        items: &[(String, String)],
        ttl: Duration,
    ) -> Result<Vec<String>, EngineError> {
        let mut out = Vec::with_capacity(items.len());
        for (path, hash) in items {
            out.push(self.fetch_presigned_url(path, hash, ttl).await?);
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete each `hash -> path` entry from every online node that may hold
    /// it.
    ///
    /// Node failures are logged and tolerated. Entries whose path is invalid
    /// or does not embed their hash are reported together as one
    /// `InvalidParameter` after the valid entries were processed.
    pub async fn delete(&self, entries: &BTreeMap<String, String>) -> Result<(), EngineError> {
        let mut rejected = Vec::new();

        for (hash, path) in entries {
            let path = match ObjectPath::parse_for(path, hash) {
                Ok(path) => path,
                Err(e) => {
                    rejected.push(format!("{hash}: {e}"));
                    continue;
                }
            };
            let key = path.key();
            let candidates = self.topology.nodes_for_read(hash, self.health.as_ref());

            for node in &candidates {
                if !self.health.is_online(node) {
                    warn!(key, %node, "node offline, delete skipped");
                    continue;
                }
                if let Err(e) = self.delete_on(node, &key).await {
                    warn!(key, %node, error = %e, "delete on node failed");
                }
            }
            info!(key, nodes = ?candidates, "chunk deleted");
        }

        if rejected.is_empty() {
            Ok(())
        } else {
            warn!(?rejected, "some delete entries were rejected");
            Err(EngineError::InvalidParameter(rejected.join("; ")))
        }
    }

    async fn delete_on(&self, node: &NodeName, key: &str) -> Result<(), StoreError> {
        let store = self.backend(node)?;
        self.bounded(store.delete(node.as_str(), key)).await
    }
}

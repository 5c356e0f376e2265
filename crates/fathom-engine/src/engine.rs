//! [`StorageEngine`]: the interface protocol adapters depend on.
//!
//! The HTTP adapter talks to this trait instead of the concrete
//! [`StorageNode`], so it can be exercised against any implementation.

use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use fathom_repair::{RebalanceStatus, RepairStats};
use fathom_types::{DomainName, NodeName, ObjectPath, TenantId};

use crate::error::EngineError;
use crate::node::{DomainHealth, StorageNode};

/// Data-plane and admin operations of a Fathom engine.
#[async_trait::async_trait]
pub trait StorageEngine: Send + Sync {
    /// Store a chunk; returns its logical path.
    async fn store(
        &self,
        data: Bytes,
        hash: &str,
        tenant: TenantId,
    ) -> Result<ObjectPath, EngineError>;

    /// Read a chunk by logical path and hash.
    async fn fetch_bytes(&self, path: &str, hash: &str) -> Result<Bytes, EngineError>;

    /// Download URL for a chunk, valid for `ttl`.
    async fn fetch_presigned_url(
        &self,
        path: &str,
        hash: &str,
        ttl: Duration,
    ) -> Result<String, EngineError>;

    /// Read several chunks given as `(path, hash)` pairs.
    async fn fetch_many(&self, items: &[(String, String)]) -> Result<Vec<Bytes>, EngineError>;

    /// Download URLs for several chunks.
    async fn fetch_presigned_urls(
        &self,
        items: &[(String, String)],
        ttl: Duration,
    ) -> Result<Vec<String>, EngineError>;

    /// Best-effort delete of `hash -> path` entries.
    async fn delete(&self, entries: &BTreeMap<String, String>) -> Result<(), EngineError>;

    /// Reachability of every enabled node.
    fn cluster_health(&self) -> BTreeMap<NodeName, bool>;

    /// Health of each domain.
    fn domain_health(&self) -> BTreeMap<DomainName, DomainHealth>;

    /// Nodes verified to hold a chunk.
    async fn chunk_locations(
        &self,
        hash: &str,
        tenant: TenantId,
    ) -> Result<Vec<NodeName>, EngineError>;

    /// Start a manual rebalance; returns the task id.
    async fn trigger_rebalance(&self, domain: Option<DomainName>) -> Result<String, EngineError>;

    /// Current rebalance status.
    fn rebalance_status(&self) -> RebalanceStatus;

    /// Run a consistency audit now.
    async fn trigger_repair(&self) -> Result<RepairStats, EngineError>;

    /// Pending degraded-write records.
    fn degraded_pending(&self) -> Result<usize, EngineError>;

    /// Enable or disable a node; returns whether the topology changed.
    fn set_node_enabled(&self, node: &NodeName, enabled: bool) -> Result<bool, EngineError>;
}

#[async_trait::async_trait]
impl StorageEngine for StorageNode {
    async fn store(
        &self,
        data: Bytes,
        hash: &str,
        tenant: TenantId,
    ) -> Result<ObjectPath, EngineError> {
        StorageNode::store(self, data, hash, tenant).await
    }

    async fn fetch_bytes(&self, path: &str, hash: &str) -> Result<Bytes, EngineError> {
        StorageNode::fetch_bytes(self, path, hash).await
    }

    async fn fetch_presigned_url(
        &self,
        path: &str,
        hash: &str,
        ttl: Duration,
    ) -> Result<String, EngineError> {
        StorageNode::fetch_presigned_url(self, path, hash, ttl).await
    }

    async fn fetch_many(&self, items: &[(String, String)]) -> Result<Vec<Bytes>, EngineError> {
        StorageNode::fetch_many(self, items).await
    }

    async fn fetch_presigned_urls(
        &self,
        items: &[(String, String)],
        ttl: Duration,
    ) -> Result<Vec<String>, EngineError> {
        StorageNode::fetch_presigned_urls(self, items, ttl).await
    }

    async fn delete(&self, entries: &BTreeMap<String, String>) -> Result<(), EngineError> {
        StorageNode::delete(self, entries).await
    }

    fn cluster_health(&self) -> BTreeMap<NodeName, bool> {
        StorageNode::cluster_health(self)
    }

    fn domain_health(&self) -> BTreeMap<DomainName, DomainHealth> {
        StorageNode::domain_health(self)
    }

    async fn chunk_locations(
        &self,
        hash: &str,
        tenant: TenantId,
    ) -> Result<Vec<NodeName>, EngineError> {
        StorageNode::chunk_locations(self, hash, tenant).await
    }

    async fn trigger_rebalance(&self, domain: Option<DomainName>) -> Result<String, EngineError> {
        StorageNode::trigger_rebalance(self, domain).await
    }

    fn rebalance_status(&self) -> RebalanceStatus {
        StorageNode::rebalance_status(self)
    }

    async fn trigger_repair(&self) -> Result<RepairStats, EngineError> {
        StorageNode::trigger_repair(self).await
    }

    fn degraded_pending(&self) -> Result<usize, EngineError> {
        StorageNode::degraded_pending(self)
    }

    fn set_node_enabled(&self, node: &NodeName, enabled: bool) -> Result<bool, EngineError> {
        StorageNode::set_node_enabled(self, node, enabled)
    }
}

//! Node-to-node object copy.
//!
//! Every remediation path (audit, immediate repair, recovery sync and
//! rebalancing) moves bytes through [`copy_object`]. Objects live in the
//! container named after their node under the same key everywhere, so a copy
//! is fully described by `(key, source, target)`.

use std::future::Future;
use std::time::Duration;

use fathom_store::{NodePool, ObjectStore, StoreError};
use fathom_types::NodeName;
use tracing::debug;

use crate::error::RepairError;

/// Largest object buffered in memory by default (100 MiB).
pub const DEFAULT_MAX_OBJECT_BYTES: u64 = 100 * 1024 * 1024;

/// Bounds applied to each copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyLimits {
    /// Objects larger than this are refused instead of buffered.
    pub max_object_bytes: u64,
    /// Deadline for each individual backend call.
    pub op_timeout: Duration,
}

impl Default for CopyLimits {
    fn default() -> Self {
        Self {
            max_object_bytes: DEFAULT_MAX_OBJECT_BYTES,
            op_timeout: Duration::from_secs(30),
        }
    }
}

/// Run one backend call under the per-operation deadline.
async fn bounded<T>(
    limits: &CopyLimits,
    node: &NodeName,
    op: &str,
    fut: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    match tokio::time::timeout(limits.op_timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(format!("{op} on {node}"))),
    }
}

fn store_for(
    pool: &NodePool,
    node: &NodeName,
) -> Result<std::sync::Arc<dyn ObjectStore>, RepairError> {
    pool.get(node)
        .ok_or_else(|| RepairError::NodeUnreachable(node.clone()))
}

/// Copy `key` from `source`'s container into `target`'s container.
///
/// Creates the destination container when needed and checks the size with
/// `head` before downloading. Returns the number of bytes copied.
pub async fn copy_object(
    pool: &NodePool,
    key: &str,
    source: &NodeName,
    target: &NodeName,
    limits: &CopyLimits,
) -> Result<u64, RepairError> {
    let src = store_for(pool, source)?;
    let dst = store_for(pool, target)?;

    bounded(
        limits,
        target,
        "ensure_container",
        dst.ensure_container(target.as_str()),
    )
    .await?;

    let size = bounded(limits, source, "head", src.head(source.as_str(), key))
        .await?
        .ok_or_else(|| RepairError::failed(key, format!("missing on {source}")))?;
    if size > limits.max_object_bytes {
        return Err(StoreError::TooLarge {
            size,
            limit: limits.max_object_bytes,
        }
        .into());
    }

    let data = bounded(limits, source, "get", src.get(source.as_str(), key))
        .await?
        .ok_or_else(|| RepairError::failed(key, format!("vanished from {source}")))?;
    let len = data.len() as u64;

    bounded(limits, target, "put", dst.put(target.as_str(), key, data)).await?;

    debug!(key, %source, %target, bytes = len, "copied object");
    Ok(len)
}

/// Whether `node` holds `key`.
pub async fn object_exists(
    pool: &NodePool,
    node: &NodeName,
    key: &str,
    limits: &CopyLimits,
) -> Result<bool, RepairError> {
    let store = store_for(pool, node)?;
    let size = bounded(limits, node, "head", store.head(node.as_str(), key)).await?;
    Ok(size.is_some())
}

/// Every key stored on `node`.
pub async fn list_objects(
    pool: &NodePool,
    node: &NodeName,
    limits: &CopyLimits,
) -> Result<Vec<String>, RepairError> {
    let store = store_for(pool, node)?;
    Ok(bounded(limits, node, "list", store.list(node.as_str())).await?)
}

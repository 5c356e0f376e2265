//! Error types for the engine.
//!
//! Only conditions the caller can act on appear here. Per-node failures are
//! absorbed by read fallback and write-side repair.

use fathom_types::PathError;

/// Errors returned by [`StorageNode`](crate::StorageNode) operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed input: empty data, bad path, hash/path mismatch.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Not enough healthy targets, even for a degraded write.
    #[error("insufficient replicas: {available} healthy targets, {required} required")]
    InsufficientReplicas {
        /// Healthy targets found.
        available: usize,
        /// Targets the write needed.
        required: usize,
    },

    /// Uploads were issued but too few acknowledged in time.
    #[error("quorum not reached: {acknowledged} of {required} acknowledgements")]
    QuorumNotReached {
        /// Uploads that succeeded.
        acknowledged: usize,
        /// Quorum size.
        required: usize,
    },

    /// No candidate node could serve the object.
    #[error("object not found: {0}")]
    NotFound(String),

    /// Failed to access the metadata store.
    #[error("metadata error: {0}")]
    Meta(#[from] fathom_meta::MetaError),

    /// Failed to read degraded-write bookkeeping.
    #[error("repair bookkeeping error: {0}")]
    Repair(#[from] fathom_repair::RepairError),

    /// The requested feature is switched off or cannot run right now.
    #[error("unavailable: {0}")]
    Disabled(String),
}

impl From<PathError> for EngineError {
    fn from(e: PathError) -> Self {
        Self::InvalidParameter(e.to_string())
    }
}

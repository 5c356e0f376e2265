//! Error types for repair operations.

use fathom_types::NodeName;

/// Errors that can occur while copying or tracking objects.
///
/// These never reach a client: the services here log them and count them.
#[derive(Debug, thiserror::Error)]
pub enum RepairError {
    /// No backend is registered for the node, or it refused the call.
    #[error("node unreachable: {0}")]
    NodeUnreachable(NodeName),

    /// A backend call failed.
    #[error("store error: {0}")]
    Store(#[from] fathom_store::StoreError),

    /// Failed to access the metadata store.
    #[error("metadata error: {0}")]
    Meta(#[from] fathom_meta::MetaError),

    /// The repair could not be carried out.
    #[error("repair of {key} failed: {reason}")]
    RepairFailed {
        /// Object key or task being repaired.
        key: String,
        /// Why it failed.
        reason: String,
    },
}

impl RepairError {
    pub(crate) fn failed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RepairFailed {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

//! Error types for backend object operations.

/// Errors returned by an [`ObjectStore`](crate::ObjectStore).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested object does not exist.
    #[error("object not found: {container}/{key}")]
    NotFound {
        /// Container searched.
        container: String,
        /// Object key.
        key: String,
    },

    /// The container has not been created.
    #[error("container does not exist: {0}")]
    NoSuchContainer(String),

    /// The node could not be reached.
    #[error("node unavailable: {0}")]
    Unavailable(String),

    /// The object exceeds the size the caller is willing to buffer.
    #[error("object too large: {size} bytes exceeds limit of {limit}")]
    TooLarge {
        /// Object size in bytes.
        size: u64,
        /// Caller limit.
        limit: u64,
    },

    /// A backend call did not finish within its deadline.
    #[error("backend operation timed out: {0}")]
    Timeout(String),

    /// A container name or key cannot be stored by this backend.
    #[error("invalid object key: {0:?}")]
    InvalidKey(String),

    /// An I/O error occurred.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether retrying on another node could help.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_) | Self::Io(_))
    }
}

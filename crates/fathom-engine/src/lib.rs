//! The Fathom engine.
//!
//! [`StorageNode`] owns the handles to placement, health, node backends and
//! the background repair services, and exposes the quorum write path, the
//! fallback read path, delete fan-out and the admin surface.
//!
//! Protocol adapters depend on the [`StorageEngine`] trait rather than the
//! concrete node.

pub mod engine;
pub mod error;
pub mod node;
mod read;
mod write;

pub use engine::StorageEngine;
pub use error::EngineError;
pub use node::{
    DEFAULT_MAX_IN_MEMORY_BYTES, DomainHealth, DomainStatus, StorageNode, StorageNodeConfig,
};

#[cfg(test)]
mod tests;

//! Per-node object storage.
//!
//! This crate defines the [`ObjectStore`] trait through which the engine
//! talks to a backend node (one container per node, keyed objects inside),
//! along with the backends shipped in-tree:
//!
//! - [`MemoryStore`]: in-memory storage backed by a `RwLock<HashMap>`.
//! - [`FileStore`]: one file per object under a per-container directory.
//! - [`FaultyStore`]: latency and outage injection around another store.
//!
//! [`NodePool`] maps node names to their backend and [`Presigner`] issues
//! the signed URLs returned by `presign`.

mod error;
mod faulty_store;
mod file_store;
mod memory_store;
mod pool;
mod presign;
mod traits;

pub use error::StoreError;
pub use faulty_store::FaultyStore;
pub use file_store::FileStore;
pub use memory_store::MemoryStore;
pub use pool::NodePool;
pub use presign::Presigner;
pub use traits::{ObjectStore, StorageCapacity};

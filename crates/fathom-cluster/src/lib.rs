//! Cluster-level services shared by the engine and the background workers.
//!
//! - [`HealthRegistry`]: the in-process [`HealthOracle`]. Tracks which
//!   nodes are reachable and how loaded they are, and publishes
//!   `NodeOnline` / `NodeOffline` transitions on the event bus.
//! - [`ClusterLock`] / [`MemoryLock`]: leased, non-blocking exclusivity for
//!   work that must run on at most one instance at a time (audits,
//!   rebalancing).

mod health;
mod lock;

pub use fathom_types::health::{AllOnline, HealthOracle, OFFLINE_LOAD_SCORE};
pub use health::{DEFAULT_LOAD_SCORE, HealthRegistry, METRICS_TTL, NodeMetrics};
pub use lock::{ClusterLock, LockToken, MemoryLock};

//! Deterministic placement across fault domains.
//!
//! Each active domain has its own consistent hash [`Ring`]; a content hash
//! maps to one node per domain. [`Topology`] holds the rings together with
//! node and domain membership and answers placement queries against a
//! single consistent [`Snapshot`].
//!
//! Ring positions are `blake3("{node}#{i}")` truncated to u64, with
//! `vnodes_per_node * weight / 100` virtual nodes per node.

mod error;
mod ring;
mod topology;


pub use error::PlacementError;
pub use ring::{Migration, NOMINAL_WEIGHT, Ring};
pub use topology::{Snapshot, Topology, select_best_node_for_read};

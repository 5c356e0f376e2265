//! Consistent hashing ring implementation.

use std::collections::{BTreeMap, HashMap};

use fathom_types::NodeName;
use tracing::debug;

/// Weight that yields exactly `vnodes_per_node` virtual nodes.
pub const NOMINAL_WEIGHT: u32 = 100;

/// A key whose owner changes between two ring states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    /// The content hash that moves.
    pub hash: String,
    /// Owner before the change.
    pub from: NodeName,
    /// Owner after the change.
    pub to: NodeName,
}

/// Consistent hashing ring for one fault domain.
///
/// Each node is mapped to several virtual nodes on a u64 ring. A hash is
/// owned by the first virtual node found walking clockwise from the hash's
/// own position.
#[derive(Debug, Clone)]
pub struct Ring {
    /// Virtual node positions: ring position -> physical node.
    vnodes: BTreeMap<u64, NodeName>,
    /// Physical node -> weight it was added with.
    weights: HashMap<NodeName, u32>,
    /// Virtual nodes for a node of nominal weight.
    vnodes_per_node: u32,
}

impl Ring {
    /// Create a new empty ring.
    pub fn new(vnodes_per_node: u32) -> Self {
        Self {
            vnodes: BTreeMap::new(),
            weights: HashMap::new(),
            vnodes_per_node: vnodes_per_node.max(1),
        }
    }

    /// Add a node with nominal weight.
    pub fn add_node(&mut self, node: NodeName) {
        self.add_node_with_weight(node, NOMINAL_WEIGHT);
    }

    /// Add a node; it gets `vnodes_per_node * weight / 100` virtual nodes,
    /// at least one. Re-adding a node replaces its previous weight.
    pub fn add_node_with_weight(&mut self, node: NodeName, weight: u32) {
        self.remove_node(&node);

        let count = self.vnode_count_for(weight);
        for i in 0..count {
            self.vnodes.insert(vnode_position(&node, i), node.clone());
        }
        debug!(%node, weight, vnodes = count, "added node to ring");
        self.weights.insert(node, weight);
    }

    /// Remove a node. Unknown nodes are ignored.
    pub fn remove_node(&mut self, node: &NodeName) {
        let Some(weight) = self.weights.remove(node) else {
            return;
        };
        for i in 0..self.vnode_count_for(weight) {
            let pos = vnode_position(node, i);
            // Positions can collide across nodes; only drop our own.
            if self.vnodes.get(&pos) == Some(node) {
                self.vnodes.remove(&pos);
            }
        }
        debug!(%node, "removed node from ring");
    }

    /// The node owning `hash`, or `None` for an empty ring.
    pub fn owner(&self, hash: &str) -> Option<&NodeName> {
        self.walk(hash).next()
    }

    /// Distinct nodes in clockwise order starting at `hash`'s owner.
    ///
    /// The first element is the owner; the following ones are its
    /// successors, each node appearing once.
    pub fn owners_from(&self, hash: &str) -> Vec<NodeName> {
        let mut owners: Vec<NodeName> = Vec::with_capacity(self.weights.len());
        for node in self.walk(hash) {
            if !owners.contains(node) {
                owners.push(node.clone());
                if owners.len() == self.weights.len() {
                    break;
                }
            }
        }
        owners
    }

    /// Keys from `hashes` whose owner differs between `old` and `new`.
    pub fn diff<'a>(
        old: &Ring,
        new: &Ring,
        hashes: impl IntoIterator<Item = &'a str>,
    ) -> Vec<Migration> {
        hashes
            .into_iter()
            .filter_map(|hash| match (old.owner(hash), new.owner(hash)) {
                (Some(from), Some(to)) if from != to => Some(Migration {
                    hash: hash.to_string(),
                    from: from.clone(),
                    to: to.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Whether `node` is on the ring.
    pub fn contains(&self, node: &NodeName) -> bool {
        self.weights.contains_key(node)
    }

    /// Number of physical nodes.
    pub fn node_count(&self) -> usize {
        self.weights.len()
    }

    /// Number of virtual nodes.
    pub fn vnode_count(&self) -> usize {
        self.vnodes.len()
    }

    /// Whether the ring has no nodes.
    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Physical nodes, sorted by name.
    pub fn nodes(&self) -> Vec<NodeName> {
        let mut nodes: Vec<NodeName> = self.weights.keys().cloned().collect();
        nodes.sort();
        nodes
    }

    fn vnode_count_for(&self, weight: u32) -> u32 {
        let scaled = u64::from(self.vnodes_per_node) * u64::from(weight) / u64::from(NOMINAL_WEIGHT);
        scaled.clamp(1, u64::from(u32::MAX)) as u32
    }

    /// Virtual nodes clockwise from `hash`'s position, wrapping once.
    fn walk(&self, hash: &str) -> impl Iterator<Item = &NodeName> {
        let pos = key_position(hash);
        self.vnodes
            .range(pos..)
            .chain(self.vnodes.range(..pos))
            .map(|(_, node)| node)
    }
}

/// Position of a virtual node: blake3(`"{node}#{index}"`) truncated to u64.
fn vnode_position(node: &NodeName, index: u32) -> u64 {
    key_position(&format!("{node}#{index}"))
}

/// Position of a key on the ring: first 8 bytes of its blake3 hash.
fn key_position(key: &str) -> u64 {
    let hash = blake3::hash(key.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}

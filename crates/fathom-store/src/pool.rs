//! Backend lookup by node name.

use std::collections::HashMap;
use std::sync::Arc;

use fathom_types::NodeName;

use crate::traits::ObjectStore;

/// The set of backends the engine can talk to, keyed by node name.
#[derive(Clone, Default)]
pub struct NodePool {
    stores: HashMap<NodeName, Arc<dyn ObjectStore>>,
}

impl NodePool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the backend of `node`.
    pub fn insert(&mut self, node: NodeName, store: Arc<dyn ObjectStore>) {
        self.stores.insert(node, store);
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with_node(mut self, node: impl Into<NodeName>, store: Arc<dyn ObjectStore>) -> Self {
        self.insert(node.into(), store);
        self
    }

    /// Backend of `node`, if configured.
    pub fn get(&self, node: &NodeName) -> Option<Arc<dyn ObjectStore>> {
        self.stores.get(node).cloned()
    }

    /// Configured node names, sorted.
    pub fn nodes(&self) -> Vec<NodeName> {
        let mut nodes: Vec<NodeName> = self.stores.keys().cloned().collect();
        nodes.sort();
        nodes
    }

    /// Number of configured backends.
    pub fn len(&self) -> usize {
        self.stores.len()
    }

    /// Whether no backend is configured.
    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}

impl FromIterator<(NodeName, Arc<dyn ObjectStore>)> for NodePool {
    fn from_iter<I: IntoIterator<Item = (NodeName, Arc<dyn ObjectStore>)>>(iter: I) -> Self {
        Self {
            stores: iter.into_iter().collect(),
        }
    }
}

impl std::fmt::Debug for NodePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodePool")
            .field("nodes", &self.nodes())
            .finish()
    }
}

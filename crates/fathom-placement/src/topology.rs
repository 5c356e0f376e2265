//! Fault-domain topology: which node belongs to which domain, and where a
//! hash lands in each domain.
//!
//! The whole membership view lives in an immutable [`Snapshot`]. Readers
//! clone the `Arc` once per call and never observe a half-applied change;
//! writers (promotion, enable/disable) build a new snapshot and publish it
//! with a single swap.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};

use fathom_types::events::TopologyChange;
use fathom_types::health::HealthOracle;
use fathom_types::{DomainName, DomainSpec, NodeName, NodeSpec, ReplicationConfig, TopologyConfig};
use tracing::{debug, info, warn};

use crate::error::PlacementError;
use crate::ring::Ring;

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Immutable membership view.
#[derive(Debug, Clone)]
pub struct Snapshot {
    nodes: BTreeMap<NodeName, NodeSpec>,
    domains: BTreeMap<DomainName, DomainSpec>,
    active: Vec<DomainName>,
    standby: Option<DomainName>,
    rings: HashMap<DomainName, Ring>,
    vnodes_per_node: u32,
}

impl Snapshot {
    fn build(config: &TopologyConfig) -> Result<Self, PlacementError> {
        if config.active_domains.is_empty()
            && (!config.nodes.is_empty() || !config.domains.is_empty())
        {
            return Err(PlacementError::NoActiveDomains);
        }

        let mut seen = HashSet::new();
        for domain in &config.active_domains {
            if !seen.insert(domain) {
                return Err(PlacementError::DuplicateDomain(domain.clone()));
            }
        }
        if let Some(standby) = &config.standby_domain
            && config.active_domains.contains(standby)
        {
            return Err(PlacementError::StandbyIsActive(standby.clone()));
        }

        let mut domains = BTreeMap::new();
        for spec in &config.domains {
            if domains.insert(spec.name.clone(), spec.clone()).is_some() {
                return Err(PlacementError::DuplicateDomain(spec.name.clone()));
            }
        }
        for domain in config.active_domains.iter().chain(&config.standby_domain) {
            domains
                .entry(domain.clone())
                .or_insert_with(|| DomainSpec::new(domain.clone()));
        }

        let mut nodes = BTreeMap::new();
        for spec in &config.nodes {
            let placeable = config.active_domains.contains(&spec.domain)
                || config.standby_domain.as_ref() == Some(&spec.domain);
            if !placeable {
                return Err(PlacementError::UnknownDomain {
                    node: spec.name.clone(),
                    domain: spec.domain.clone(),
                });
            }
            if nodes.insert(spec.name.clone(), spec.clone()).is_some() {
                return Err(PlacementError::DuplicateNode(spec.name.clone()));
            }
        }

        let mut snapshot = Self {
            nodes,
            domains,
            active: config.active_domains.clone(),
            standby: config.standby_domain.clone(),
            rings: HashMap::new(),
            vnodes_per_node: config.vnodes_per_node,
        };
        snapshot.rebuild_rings();
        Ok(snapshot)
    }

    fn rebuild_rings(&mut self) {
        let mut rings: HashMap<DomainName, Ring> = HashMap::new();
        for spec in self.nodes.values().filter(|n| n.enabled) {
            rings
                .entry(spec.domain.clone())
                .or_insert_with(|| Ring::new(self.vnodes_per_node))
                .add_node_with_weight(spec.name.clone(), spec.weight);
        }
        self.rings = rings;
    }

    // -- domain queries -----------------------------------------------------

    /// Active domains in write-preference order.
    pub fn active_domains(&self) -> &[DomainName] {
        &self.active
    }

    /// The standby pool, if configured.
    pub fn standby_domain(&self) -> Option<&DomainName> {
        self.standby.as_ref()
    }

    /// At most one active domain: no cross-domain replication.
    pub fn is_single_domain(&self) -> bool {
        self.active.len() <= 1
    }

    /// Whether any active domain has placed nodes.
    pub fn uses_fault_domains(&self) -> bool {
        self.active
            .iter()
            .any(|d| self.rings.get(d).is_some_and(|r| !r.is_empty()))
    }

    /// Settings of a known domain.
    pub fn domain_spec(&self, domain: &DomainName) -> Option<&DomainSpec> {
        self.domains.get(domain)
    }

    /// Active domains that accept writes, in order.
    pub fn writable_domains(&self) -> impl Iterator<Item = &DomainName> {
        self.active
            .iter()
            .filter(|d| self.domains.get(*d).is_none_or(|spec| spec.accepts_writes))
    }

    /// Ring of a domain, if it has placed nodes.
    pub fn ring(&self, domain: &DomainName) -> Option<&Ring> {
        self.rings.get(domain).filter(|r| !r.is_empty())
    }

    // -- node queries -------------------------------------------------------

    /// Configuration of a node, including its current domain.
    pub fn node_spec(&self, node: &NodeName) -> Option<&NodeSpec> {
        self.nodes.get(node)
    }

    /// Current domain of a configured node.
    pub fn node_domain(&self, node: &NodeName) -> Option<&DomainName> {
        self.nodes.get(node).map(|spec| &spec.domain)
    }

    /// Enabled nodes, sorted by name.
    pub fn enabled_nodes(&self) -> Vec<NodeName> {
        self.nodes
            .values()
            .filter(|n| n.enabled)
            .map(|n| n.name.clone())
            .collect()
    }

    /// Every configured node, enabled or not.
    pub fn all_nodes(&self) -> Vec<NodeName> {
        self.nodes.keys().cloned().collect()
    }

    /// Placed (enabled) members of a domain, sorted by name.
    pub fn nodes_in_domain(&self, domain: &DomainName) -> Vec<NodeName> {
        self.rings.get(domain).map(Ring::nodes).unwrap_or_default()
    }

    /// Members of a domain the oracle reports online.
    pub fn healthy_nodes_in_domain(
        &self,
        domain: &DomainName,
        health: &dyn HealthOracle,
    ) -> Vec<NodeName> {
        self.nodes_in_domain(domain)
            .into_iter()
            .filter(|n| health.is_online(n))
            .collect()
    }

    /// Number of online members of a domain.
    pub fn count_healthy_in_domain(&self, domain: &DomainName, health: &dyn HealthOracle) -> usize {
        self.healthy_nodes_in_domain(domain, health).len()
    }

    /// Online members of the standby pool.
    pub fn healthy_standby_nodes(&self, health: &dyn HealthOracle) -> Vec<NodeName> {
        match &self.standby {
            Some(standby) => self.healthy_nodes_in_domain(standby, health),
            None => Vec::new(),
        }
    }

    // -- placement ----------------------------------------------------------

    /// Ring owner of `hash` in `domain`, regardless of health.
    pub fn target_node_in_domain(&self, hash: &str, domain: &DomainName) -> Option<NodeName> {
        self.ring(domain)?.owner(hash).cloned()
    }

    /// The ring owner if online, otherwise the first online node clockwise
    /// from it (the healthy successor).
    pub fn healthy_target_in_domain(
        &self,
        hash: &str,
        domain: &DomainName,
        health: &dyn HealthOracle,
    ) -> Option<NodeName> {
        self.ring(domain)?
            .owners_from(hash)
            .into_iter()
            .find(|n| health.is_online(n))
    }

    /// Who owns `hash` in `domain` once `excluded` is taken out of the ring.
    ///
    /// If `excluded` is no longer on the ring this is simply the owner.
    pub fn successor_excluding(
        &self,
        hash: &str,
        domain: &DomainName,
        excluded: &NodeName,
    ) -> Option<NodeName> {
        self.ring(domain)?
            .owners_from(hash)
            .into_iter()
            .find(|n| n != excluded)
    }

    /// One target per writable active domain, for the first `factor` of
    /// them. A domain with no online member contributes nothing.
    pub fn target_nodes_for_write(
        &self,
        hash: &str,
        factor: usize,
        health: &dyn HealthOracle,
    ) -> Vec<NodeName> {
        let mut targets = Vec::with_capacity(factor);
        for domain in self.writable_domains().take(factor) {
            let Some(ring) = self.ring(domain) else {
                warn!(%domain, "domain has no placed nodes");
                continue;
            };
            let owner = ring.owner(hash).cloned();
            match self.healthy_target_in_domain(hash, domain, health) {
                Some(target) => {
                    if owner.as_ref() != Some(&target) {
                        debug!(%domain, ?owner, %target, "owner offline, using healthy successor");
                    }
                    targets.push(target);
                }
                None => warn!(%domain, "no online node in domain"),
            }
        }
        targets
    }

    /// Every node that may hold `hash`: the ring owner of each active domain,
    /// followed by the healthy successor when that owner is offline.
    pub fn candidate_nodes_for_read(&self, hash: &str, health: &dyn HealthOracle) -> Vec<NodeName> {
        let mut candidates = Vec::new();
        for domain in &self.active {
            let Some(ring) = self.ring(domain) else {
                continue;
            };
            let Some(owner) = ring.owner(hash).cloned() else {
                continue;
            };
            let owner_online = health.is_online(&owner);
            candidates.push(owner);
            if !owner_online
                && let Some(successor) = self.healthy_target_in_domain(hash, domain, health)
                && !candidates.contains(&successor)
            {
                candidates.push(successor);
            }
        }
        candidates
    }

    /// The remaining placed members of each active domain, walking clockwise
    /// from `hash`, minus `candidates`.
    ///
    /// A copy written to a healthy successor stays there after the owner
    /// returns, so these still have to be tried before giving up.
    pub fn fallback_nodes_for_read(&self, hash: &str, candidates: &[NodeName]) -> Vec<NodeName> {
        let mut fallbacks = Vec::new();
        for domain in &self.active {
            let Some(ring) = self.ring(domain) else {
                continue;
            };
            for node in ring.owners_from(hash) {
                if !candidates.contains(&node) && !fallbacks.contains(&node) {
                    fallbacks.push(node);
                }
            }
        }
        fallbacks
    }

    /// Read candidates followed by the fallback walk: every placed node of
    /// every active domain, ordered by how likely it is to hold `hash`.
    pub fn nodes_for_read(&self, hash: &str, health: &dyn HealthOracle) -> Vec<NodeName> {
        let mut nodes = self.candidate_nodes_for_read(hash, health);
        let fallbacks = self.fallback_nodes_for_read(hash, &nodes);
        nodes.extend(fallbacks);
        nodes
    }
}

/// Lowest-load online node among `candidates`.
pub fn select_best_node_for_read(
    candidates: &[NodeName],
    health: &dyn HealthOracle,
) -> Option<NodeName> {
    candidates
        .iter()
        .filter(|n| health.is_online(n))
        .min_by(|a, b| health.load_score(a).total_cmp(&health.load_score(b)))
        .cloned()
}

// ---------------------------------------------------------------------------
// Topology
// ---------------------------------------------------------------------------

/// Shared, atomically updated topology.
pub struct Topology {
    current: RwLock<Arc<Snapshot>>,
    replication: ReplicationConfig,
}

impl Topology {
    /// Validate the configuration and build the initial rings.
    pub fn new(
        config: &TopologyConfig,
        replication: ReplicationConfig,
    ) -> Result<Self, PlacementError> {
        let snapshot = Snapshot::build(config)?;
        info!(
            active = ?snapshot.active,
            standby = ?snapshot.standby,
            nodes = snapshot.nodes.len(),
            "topology built"
        );
        if snapshot.active.len() == 1 {
            warn!(domain = %snapshot.active[0], "single-domain mode: objects are not replicated across domains");
        }
        Ok(Self {
            current: RwLock::new(Arc::new(snapshot)),
            replication,
        })
    }

    /// Current snapshot. Hold on to it to run several queries consistently.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.current.read().expect("topology lock poisoned"))
    }

    /// Configured replication settings.
    pub fn replication(&self) -> ReplicationConfig {
        self.replication
    }

    /// `min(configured factor, active domains)`, at least 1.
    pub fn effective_replication_factor(&self) -> usize {
        self.replication
            .effective_factor(self.snapshot().active_domains().len())
    }

    /// Acknowledgements required for a full write.
    pub fn effective_quorum(&self) -> usize {
        self.replication
            .effective_quorum(self.snapshot().active_domains().len())
    }

    /// See [`Snapshot::target_nodes_for_write`]; uses the effective factor.
    pub fn target_nodes_for_write(&self, hash: &str, health: &dyn HealthOracle) -> Vec<NodeName> {
        let snapshot = self.snapshot();
        let factor = self
            .replication
            .effective_factor(snapshot.active_domains().len());
        snapshot.target_nodes_for_write(hash, factor, health)
    }

    /// See [`Snapshot::candidate_nodes_for_read`].
    pub fn candidate_nodes_for_read(&self, hash: &str, health: &dyn HealthOracle) -> Vec<NodeName> {
        self.snapshot().candidate_nodes_for_read(hash, health)
    }

    /// See [`Snapshot::nodes_for_read`].
    pub fn nodes_for_read(&self, hash: &str, health: &dyn HealthOracle) -> Vec<NodeName> {
        self.snapshot().nodes_for_read(hash, health)
    }

    /// See [`select_best_node_for_read`].
    pub fn select_best_node_for_read(
        &self,
        candidates: &[NodeName],
        health: &dyn HealthOracle,
    ) -> Option<NodeName> {
        select_best_node_for_read(candidates, health)
    }

    pub fn target_node_in_domain(&self, hash: &str, domain: &DomainName) -> Option<NodeName> {
        self.snapshot().target_node_in_domain(hash, domain)
    }

    pub fn healthy_target_in_domain(
        &self,
        hash: &str,
        domain: &DomainName,
        health: &dyn HealthOracle,
    ) -> Option<NodeName> {
        self.snapshot().healthy_target_in_domain(hash, domain, health)
    }

    pub fn successor_excluding(
        &self,
        hash: &str,
        domain: &DomainName,
        excluded: &NodeName,
    ) -> Option<NodeName> {
        self.snapshot().successor_excluding(hash, domain, excluded)
    }

    pub fn active_domains(&self) -> Vec<DomainName> {
        self.snapshot().active_domains().to_vec()
    }

    pub fn standby_domain(&self) -> Option<DomainName> {
        self.snapshot().standby_domain().cloned()
    }

    pub fn nodes_in_domain(&self, domain: &DomainName) -> Vec<NodeName> {
        self.snapshot().nodes_in_domain(domain)
    }

    pub fn healthy_nodes_in_domain(
        &self,
        domain: &DomainName,
        health: &dyn HealthOracle,
    ) -> Vec<NodeName> {
        self.snapshot().healthy_nodes_in_domain(domain, health)
    }

    pub fn count_healthy_in_domain(&self, domain: &DomainName, health: &dyn HealthOracle) -> usize {
        self.snapshot().count_healthy_in_domain(domain, health)
    }

    pub fn healthy_standby_nodes(&self, health: &dyn HealthOracle) -> Vec<NodeName> {
        self.snapshot().healthy_standby_nodes(health)
    }

    pub fn node_domain(&self, node: &NodeName) -> Option<DomainName> {
        self.snapshot().node_domain(node).cloned()
    }

    pub fn domain_spec(&self, domain: &DomainName) -> Option<DomainSpec> {
        self.snapshot().domain_spec(domain).cloned()
    }

    pub fn is_single_domain(&self) -> bool {
        self.snapshot().is_single_domain()
    }

    pub fn uses_fault_domains(&self) -> bool {
        self.snapshot().uses_fault_domains()
    }

    pub fn enabled_nodes(&self) -> Vec<NodeName> {
        self.snapshot().enabled_nodes()
    }

    // -- mutation -----------------------------------------------------------

    /// Move a node to another domain (standby promotion).
    ///
    /// Returns `false` for an unknown node or domain and `true` when the node
    /// is already there. Lookups running concurrently see either the old or
    /// the new rings, never a mix.
    pub fn change_node_domain(&self, node: &NodeName, domain: &DomainName) -> bool {
        let mut current = self.current.write().expect("topology lock poisoned");

        let Some(spec) = current.nodes.get(node) else {
            warn!(%node, "cannot change domain of unknown node");
            return false;
        };
        if !current.domains.contains_key(domain) {
            warn!(%node, %domain, "cannot move node to unknown domain");
            return false;
        }
        if &spec.domain == domain {
            debug!(%node, %domain, "node already in domain");
            return true;
        }

        let mut next = Snapshot::clone(&current);
        let Some(entry) = next.nodes.get_mut(node) else {
            return false;
        };
        let previous = std::mem::replace(&mut entry.domain, domain.clone());
        let (enabled, weight) = (entry.enabled, entry.weight);
        if enabled {
            if let Some(ring) = next.rings.get_mut(&previous) {
                ring.remove_node(node);
            }
            next.rings
                .entry(domain.clone())
                .or_insert_with(|| Ring::new(next.vnodes_per_node))
                .add_node_with_weight(node.clone(), weight);
        }

        *current = Arc::new(next);
        info!(%node, from = %previous, to = %domain, "node changed domain");
        true
    }

    /// Place or unplace a node. Nodes are never forgotten.
    ///
    /// Returns the resulting change, or `None` if the node is unknown or
    /// already in the requested state.
    pub fn set_node_enabled(&self, node: &NodeName, enabled: bool) -> Option<TopologyChange> {
        let mut current = self.current.write().expect("topology lock poisoned");

        let spec = current.nodes.get(node)?;
        if spec.enabled == enabled {
            return None;
        }

        let mut next = Snapshot::clone(&current);
        let spec = next.nodes.get_mut(node)?;
        spec.enabled = enabled;
        let (domain, weight) = (spec.domain.clone(), spec.weight);

        let change = if enabled {
            next.rings
                .entry(domain.clone())
                .or_insert_with(|| Ring::new(next.vnodes_per_node))
                .add_node_with_weight(node.clone(), weight);
            TopologyChange::NodeAdded
        } else {
            if let Some(ring) = next.rings.get_mut(&domain) {
                ring.remove_node(node);
            }
            TopologyChange::NodeRemoved
        };

        *current = Arc::new(next);
        info!(%node, %domain, enabled, "node placement changed");
        Some(change)
    }
}

impl std::fmt::Debug for Topology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("Topology")
            .field("active", &snapshot.active)
            .field("standby", &snapshot.standby)
            .field("nodes", &snapshot.nodes.len())
            .field("replication", &self.replication)
            .finish()
    }
}

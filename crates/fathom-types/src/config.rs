//! Storage configuration: topology, replication, degraded writes and the
//! background services.
//!
//! Every struct uses `#[serde(default)]` so the daemon's TOML file only needs
//! to mention the fields it overrides.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{DomainName, NodeName};

// ---------------------------------------------------------------------------
// Replication
// ---------------------------------------------------------------------------

/// How many successful uploads a write needs before it is acknowledged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "QuorumRepr", into = "QuorumRepr")]
pub enum QuorumPolicy {
    /// All replicas for factor <= 2, a majority above.
    #[default]
    Auto,
    /// `factor / 2 + 1`.
    Majority,
    /// Every replica.
    All,
    /// A fixed count, clamped to `[1, factor]`.
    Fixed(usize),
}

impl QuorumPolicy {
    /// Resolve the policy for a given effective replication factor.
    pub fn resolve(self, factor: usize) -> usize {
        let factor = factor.max(1);
        match self {
            Self::Auto if factor <= 2 => factor,
            Self::Auto | Self::Majority => factor / 2 + 1,
            Self::All => factor,
            Self::Fixed(n) => n.clamp(1, factor),
        }
    }
}

/// Error returned when parsing a [`QuorumPolicy`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid quorum policy {0:?}: expected auto, majority, all or a number")]
pub struct InvalidQuorum(pub String);

impl FromStr for QuorumPolicy {
    type Err = InvalidQuorum;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "majority" => Ok(Self::Majority),
            "all" => Ok(Self::All),
            other => other
                .parse::<usize>()
                .map(Self::Fixed)
                .map_err(|_| InvalidQuorum(s.to_string())),
        }
    }
}

impl fmt::Display for QuorumPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Majority => f.write_str("majority"),
            Self::All => f.write_str("all"),
            Self::Fixed(n) => write!(f, "{n}"),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum QuorumRepr {
    Number(usize),
    Name(String),
}

impl TryFrom<QuorumRepr> for QuorumPolicy {
    type Error = InvalidQuorum;

    fn try_from(repr: QuorumRepr) -> Result<Self, Self::Error> {
        match repr {
            QuorumRepr::Number(n) => Ok(Self::Fixed(n)),
            QuorumRepr::Name(name) => name.parse(),
        }
    }
}

impl From<QuorumPolicy> for QuorumRepr {
    fn from(policy: QuorumPolicy) -> Self {
        match policy {
            QuorumPolicy::Fixed(n) => Self::Number(n),
            other => Self::Name(other.to_string()),
        }
    }
}

/// Replication factor and write quorum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Copies per object. `None` means one per active domain.
    pub factor: Option<usize>,
    /// Acknowledgements required per write.
    pub quorum: QuorumPolicy,
}

impl ReplicationConfig {
    /// `min(configured, active domains)`, never below 1.
    pub fn effective_factor(&self, active_domains: usize) -> usize {
        let active = active_domains.max(1);
        self.factor.unwrap_or(active).clamp(1, active)
    }

    /// Quorum for the effective factor.
    pub fn effective_quorum(&self, active_domains: usize) -> usize {
        self.quorum.resolve(self.effective_factor(active_domains))
    }
}

/// Behaviour when fewer targets than the replication factor are available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DegradedWriteConfig {
    /// Accept writes below the replication factor.
    pub enabled: bool,
    /// Fewest targets a degraded write may use.
    pub min_replicas: usize,
    /// Record degraded writes so recovery can fill the gaps.
    pub track_for_sync: bool,
}

impl Default for DegradedWriteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_replicas: 1,
            track_for_sync: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Background services
// ---------------------------------------------------------------------------

/// Cross-domain consistency repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    /// Run scheduled audits.
    pub enabled: bool,
    /// Seconds between scheduled audits.
    pub interval_secs: u64,
    /// Objects copied per batch during an audit.
    pub batch_size: usize,
    /// Lease held on the audit lock.
    pub lock_lease_secs: u64,
    /// Concurrent immediate repairs.
    pub immediate_permits: usize,
    /// Attempts per immediate repair.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after each failure.
    pub base_backoff_ms: u64,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 3_600,
            batch_size: 100,
            lock_lease_secs: 600,
            immediate_permits: 10,
            max_attempts: 3,
            base_backoff_ms: 1_000,
        }
    }
}

/// Topology-driven data migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RebalanceConfig {
    /// React to topology events and accept manual triggers.
    pub enabled: bool,
    /// Object copies per second.
    pub rate_limit_per_sec: u32,
    /// Lease held on the rebalance lock.
    pub lock_lease_secs: u64,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rate_limit_per_sec: 10,
            lock_lease_secs: 3_600,
        }
    }
}

/// Standby pool promotion loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StandbyConfig {
    /// Seconds between checks.
    pub interval_secs: u64,
    /// Delay before the first check.
    pub initial_delay_secs: u64,
}

impl Default for StandbyConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            initial_delay_secs: 10,
        }
    }
}

/// Degraded-write recovery poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Seconds between polls.
    pub interval_secs: u64,
    /// Delay before the first poll.
    pub initial_delay_secs: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            initial_delay_secs: 60,
        }
    }
}

// ---------------------------------------------------------------------------
// Topology
// ---------------------------------------------------------------------------

/// A configured backend node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Node name, also the name of its container.
    pub name: NodeName,
    /// Domain the node starts in.
    pub domain: DomainName,
    /// Disabled nodes are known but not placed.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Relative placement weight; 100 is nominal.
    #[serde(default = "default_weight")]
    pub weight: u32,
}

impl NodeSpec {
    /// An enabled node with nominal weight.
    pub fn new(name: impl Into<NodeName>, domain: impl Into<DomainName>) -> Self {
        Self {
            name: name.into(),
            domain: domain.into(),
            enabled: true,
            weight: default_weight(),
        }
    }
}

/// A configured fault domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainSpec {
    /// Domain name.
    pub name: DomainName,
    /// Healthy nodes below which standby promotion kicks in.
    #[serde(default = "default_min_nodes")]
    pub min_nodes: usize,
    /// Read-only domains are skipped as write targets.
    #[serde(default = "default_true")]
    pub accepts_writes: bool,
}

impl DomainSpec {
    /// A writable domain with `min_nodes = 1`.
    pub fn new(name: impl Into<DomainName>) -> Self {
        Self {
            name: name.into(),
            min_nodes: default_min_nodes(),
            accepts_writes: true,
        }
    }
}

/// Nodes, domains and ring parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    /// All configured nodes.
    pub nodes: Vec<NodeSpec>,
    /// Per-domain settings; domains without an entry use defaults.
    pub domains: Vec<DomainSpec>,
    /// Domains that hold replicas, in write-preference order.
    pub active_domains: Vec<DomainName>,
    /// Pool of spare nodes.
    pub standby_domain: Option<DomainName>,
    /// Virtual nodes per node at weight 100.
    pub vnodes_per_node: u32,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            domains: Vec::new(),
            active_domains: Vec::new(),
            standby_domain: None,
            vnodes_per_node: 150,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_weight() -> u32 {
    100
}

fn default_min_nodes() -> usize {
    1
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

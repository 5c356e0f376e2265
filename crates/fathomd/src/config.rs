//! TOML configuration for the Fathom daemon.
//!
//! Every section is optional. Without any `[[nodes]]` the daemon starts a
//! local layout of three single-node domains, see
//! [`DaemonConfig::topology_config`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use fathom_engine::{DEFAULT_MAX_IN_MEMORY_BYTES, StorageNodeConfig};
use fathom_repair::CopyLimits;
use fathom_store::Presigner;
use fathom_types::{
    DegradedWriteConfig, DomainName, DomainSpec, NodeName, NodeSpec, RebalanceConfig,
    RecoveryConfig, RepairConfig, ReplicationConfig, StandbyConfig, TopologyConfig,
};
use serde::Deserialize;

/// Domains used when no node is configured.
const LOCAL_DOMAINS: [&str; 3] = ["zone-a", "zone-b", "zone-c"];

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Data directory and listen address.
    pub node: NodeSection,
    /// Backend type, buffering and timeouts.
    pub storage: StorageSection,
    /// Liveness probing of the backends.
    pub health: HealthSection,
    /// Backend nodes.
    pub nodes: Vec<NodeEntry>,
    /// Per-domain settings.
    pub domains: Vec<DomainSpec>,
    /// Active and standby domains, ring parameters.
    pub topology: TopologySection,
    /// Replication factor and quorum.
    pub replication: ReplicationConfig,
    /// Writes below the replication factor.
    pub degraded_write: DegradedWriteConfig,
    /// Consistency audit and immediate repair.
    pub repair: RepairConfig,
    /// Topology-driven migration.
    pub rebalance: RebalanceConfig,
    /// Standby promotion loop.
    pub standby: StandbyConfig,
    /// Degraded-write backfill.
    pub recovery: RecoveryConfig,
    /// Logging.
    pub log: LogSection,
}

/// `[node]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// Directory for the metadata store and file backends.
    pub data_dir: PathBuf,
    /// Address of the HTTP API.
    pub listen_addr: String,
}

impl Default for NodeSection {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .map(|d| d.join("fathom"))
            .unwrap_or_else(|| PathBuf::from(".fathom"));
        Self {
            data_dir,
            listen_addr: "0.0.0.0:4830".to_string(),
        }
    }
}

/// `[storage]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Backend type: `"file"` (default) or `"memory"`.
    pub backend: String,
    /// Largest object buffered by reads and copies.
    pub max_in_memory_bytes: u64,
    /// Ceiling on a write's quorum wait.
    pub write_timeout_secs: u64,
    /// Deadline for each backend call.
    pub node_op_timeout_secs: u64,
    /// Base URL of presigned links; defaults to the backend's own.
    pub presign_endpoint: Option<String>,
    /// Secret presigned links are signed with.
    pub presign_secret: Option<String>,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: "file".to_string(),
            max_in_memory_bytes: DEFAULT_MAX_IN_MEMORY_BYTES,
            write_timeout_secs: 300,
            node_op_timeout_secs: 30,
            presign_endpoint: None,
            presign_secret: None,
        }
    }
}

/// `[health]` section.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct HealthSection {
    /// Seconds between probes of every backend.
    pub probe_interval_secs: u64,
    /// Delay before the first probe.
    pub initial_delay_secs: u64,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            probe_interval_secs: 30,
            initial_delay_secs: 15,
        }
    }
}

/// One `[[nodes]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeEntry {
    pub name: NodeName,
    pub domain: DomainName,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Capacity of a memory backend; unbounded when omitted.
    pub capacity_bytes: Option<u64>,
}

impl NodeEntry {
    fn spec(&self) -> NodeSpec {
        NodeSpec {
            name: self.name.clone(),
            domain: self.domain.clone(),
            enabled: self.enabled,
            weight: self.weight,
        }
    }
}

/// `[topology]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TopologySection {
    /// Write-preference order. Defaults to every node domain except the
    /// standby one, in order of first appearance.
    pub active_domains: Vec<DomainName>,
    /// Pool of spare nodes.
    pub standby_domain: Option<DomainName>,
    /// Virtual nodes per node at weight 100.
    pub vnodes_per_node: u32,
}

impl Default for TopologySection {
    fn default() -> Self {
        Self {
            active_domains: Vec::new(),
            standby_domain: None,
            vnodes_per_node: TopologyConfig::default().vnodes_per_node,
        }
    }
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`, `"fathom_repair=debug"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_weight() -> u32 {
    100
}

impl DaemonConfig {
    /// Load config from a TOML file, or use defaults if no path given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("failed to read {}", p.display()))?;
                Self::from_toml(&content)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a TOML string.
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(s).context("invalid configuration")?;
        config.presigner()?;
        Ok(config)
    }

    /// Signer for `[storage] presign_endpoint`, if one is configured.
    ///
    /// An endpoint without a non-empty `presign_secret` is rejected.
    pub fn presigner(&self) -> anyhow::Result<Option<Presigner>> {
        let Some(endpoint) = &self.storage.presign_endpoint else {
            return Ok(None);
        };
        match self.storage.presign_secret.as_deref() {
            Some(secret) if !secret.is_empty() => {
                Ok(Some(Presigner::new(endpoint.as_str(), secret)))
            }
            _ => anyhow::bail!("[storage] presign_endpoint is set but presign_secret is missing"),
        }
    }

    pub fn memory_backend(&self) -> bool {
        self.storage.backend == "memory"
    }

    /// Configured nodes, or the local three-domain layout.
    pub fn node_entries(&self) -> Vec<NodeEntry> {
        if !self.nodes.is_empty() {
            return self.nodes.clone();
        }
        LOCAL_DOMAINS
            .iter()
            .map(|domain| NodeEntry {
                name: NodeName::from(format!("{domain}-1")),
                domain: DomainName::from(*domain),
                enabled: true,
                weight: default_weight(),
                capacity_bytes: None,
            })
            .collect()
    }

    /// Placement input assembled from `[[nodes]]`, `[[domains]]` and
    /// `[topology]`.
    pub fn topology_config(&self) -> TopologyConfig {
        let nodes: Vec<NodeSpec> = self.node_entries().iter().map(NodeEntry::spec).collect();
        let standby = self.topology.standby_domain.clone();

        let active_domains = if self.topology.active_domains.is_empty() {
            let mut domains: Vec<DomainName> = Vec::new();
            for node in &nodes {
                if Some(&node.domain) != standby.as_ref() && !domains.contains(&node.domain) {
                    domains.push(node.domain.clone());
                }
            }
            domains
        } else {
            self.topology.active_domains.clone()
        };

        TopologyConfig {
            nodes,
            domains: self.domains.clone(),
            active_domains,
            standby_domain: standby,
            vnodes_per_node: self.topology.vnodes_per_node,
        }
    }

    pub fn node_op_timeout(&self) -> Duration {
        Duration::from_secs(self.storage.node_op_timeout_secs.max(1))
    }

    pub fn storage_node_config(&self) -> StorageNodeConfig {
        StorageNodeConfig {
            max_in_memory_bytes: self.storage.max_in_memory_bytes,
            write_timeout: Duration::from_secs(self.storage.write_timeout_secs.max(1)),
            node_op_timeout: self.node_op_timeout(),
            degraded: self.degraded_write,
        }
    }

    pub fn copy_limits(&self) -> CopyLimits {
        CopyLimits {
            max_object_bytes: self.storage.max_in_memory_bytes,
            op_timeout: self.node_op_timeout(),
        }
    }
}

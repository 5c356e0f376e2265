//! Topology configuration errors.

use fathom_types::{DomainName, NodeName};

/// Rejected topology configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlacementError {
    /// Nodes or domains are configured but no active domain is.
    #[error("active_domains must list at least one domain when nodes or domains are configured")]
    NoActiveDomains,

    /// A node references a domain that is neither active nor the standby pool.
    #[error("node {node} is assigned to unknown domain {domain}")]
    UnknownDomain {
        /// Offending node.
        node: NodeName,
        /// Domain it references.
        domain: DomainName,
    },

    /// The same node name appears twice.
    #[error("node {0} is configured more than once")]
    DuplicateNode(NodeName),

    /// The same domain appears twice in `active_domains` or `domains`.
    #[error("domain {0} is configured more than once")]
    DuplicateDomain(DomainName),

    /// The standby domain is also listed as active.
    #[error("standby domain {0} cannot also be an active domain")]
    StandbyIsActive(DomainName),
}

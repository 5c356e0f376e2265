//! Shared types and identifiers for Fathom.
//!
//! This crate defines the vocabulary used across the workspace:
//! names ([`NodeName`], [`DomainName`]), content addressing
//! ([`ContentHash`], [`TenantId`], [`ObjectPath`]), storage configuration
//! (see [`config`]), the [`health::HealthOracle`] seam and the typed
//! intra-process [`events::EventBus`].

pub mod config;
pub mod events;
pub mod health;

use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use config::{
    DegradedWriteConfig, DomainSpec, NodeSpec, QuorumPolicy, RebalanceConfig, RecoveryConfig,
    RepairConfig, ReplicationConfig, StandbyConfig, TopologyConfig,
};

// ---------------------------------------------------------------------------
// Name types
// ---------------------------------------------------------------------------

macro_rules! define_name {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a name.
            pub fn new(name: impl Into<String>) -> Self {
                Self(name.into())
            }

            /// Borrow the name as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(name: &str) -> Self {
                Self(name.to_string())
            }
        }

        impl From<String> for $name {
            fn from(name: String) -> Self {
                Self(name)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

define_name!(
    /// Name of a backend storage node. Also the name of the node's container.
    NodeName
);

define_name!(
    /// Name of a fault domain (rack, zone, ...).
    DomainName
);

// ---------------------------------------------------------------------------
// Content addressing
// ---------------------------------------------------------------------------

/// Errors produced while parsing hashes and logical paths.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// The content hash was empty.
    #[error("content hash is empty")]
    EmptyHash,

    /// The content hash contained characters that cannot appear in a key.
    #[error("invalid content hash: {0:?}")]
    InvalidHash(String),

    /// The logical path does not follow `tenant/{tenantId}/{hash}`.
    #[error("malformed object path: {0:?}")]
    Malformed(String),

    /// The hash given by the caller differs from the one embedded in the path.
    #[error("hash {given} does not match path hash {embedded}")]
    HashMismatch {
        /// Hash supplied alongside the path.
        given: String,
        /// Hash found in the path.
        embedded: String,
    },
}

/// Content hash of a stored chunk, as supplied by the caller.
///
/// The engine does not recompute it; it only requires the value to be usable
/// as the final segment of an object key.
#[derive(Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Validate and wrap a content hash.
    pub fn new(hash: impl Into<String>) -> Result<Self, PathError> {
        let hash = hash.into();
        if hash.is_empty() {
            return Err(PathError::EmptyHash);
        }
        if hash.contains('/') || hash.chars().any(char::is_whitespace) {
            return Err(PathError::InvalidHash(hash));
        }
        // `.` and `..` are path components, not file names.
        if hash.chars().all(|c| c == '.') {
            return Err(PathError::InvalidHash(hash));
        }
        Ok(Self(hash))
    }

    /// Borrow the hash as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ContentHash {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}

impl FromStr for ContentHash {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for ContentHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.0)
    }
}

/// Tenant that owns an object. Tenant `0` is the default tenant.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TenantId(pub u64);

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical, node-independent location of an object:
/// `tenant/{tenantId}/{contentHash}`.
///
/// The rendered path is also the object key inside every node container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectPath {
    tenant: TenantId,
    hash: ContentHash,
}

const TENANT_PREFIX: &str = "tenant";

impl ObjectPath {
    /// Build the path for a tenant and content hash.
    pub fn new(tenant: TenantId, hash: ContentHash) -> Self {
        Self { tenant, hash }
    }

    /// Parse a rendered logical path.
    pub fn parse(path: &str) -> Result<Self, PathError> {
        let malformed = || PathError::Malformed(path.to_string());

        let mut parts = path.split('/');
        let (Some(prefix), Some(tenant), Some(hash), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(malformed());
        };

        if prefix != TENANT_PREFIX {
            return Err(malformed());
        }
        let tenant = tenant.parse::<u64>().map_err(|_| malformed())?;
        let hash = ContentHash::new(hash)?;

        Ok(Self {
            tenant: TenantId(tenant),
            hash,
        })
    }

    /// Parse a path and check that it embeds `expected`.
    pub fn parse_for(path: &str, expected: &str) -> Result<Self, PathError> {
        let parsed = Self::parse(path)?;
        if parsed.hash.as_str() != expected {
            return Err(PathError::HashMismatch {
                given: expected.to_string(),
                embedded: parsed.hash.to_string(),
            });
        }
        Ok(parsed)
    }

    /// Tenant owning the object.
    pub fn tenant(&self) -> TenantId {
        self.tenant
    }

    /// Content hash of the object.
    pub fn hash(&self) -> &ContentHash {
        &self.hash
    }

    /// Object key used inside node containers.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{TENANT_PREFIX}/{}/{}", self.tenant, self.hash)
    }
}

/// Extract the content hash from an object key (its last path segment).
///
/// Returns `None` for empty keys and keys ending in `/` (directory markers).
pub fn hash_from_key(key: &str) -> Option<&str> {
    if key.is_empty() || key.ends_with('/') {
        return None;
    }
    Some(key.rsplit('/').next().unwrap_or(key))
}

/// Milliseconds since the Unix epoch.
pub fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Core types used throughout the data grid.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// Physical placement of a node, used by topology-aware hashing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopologyLocation {
    pub site_id: Option<String>,
    pub rack_id: Option<String>,
    pub machine_id: Option<String>,
}

impl TopologyLocation {
    /// Create a location from its three components.
    pub fn new(
        site_id: Option<String>,
        rack_id: Option<String>,
        machine_id: Option<String>,
    ) -> Self {
        Self {
            site_id,
            rack_id,
            machine_id,
        }
    }

    /// Whether any component is set.
    pub fn is_specified(&self) -> bool {
        self.site_id.is_some() || self.rack_id.is_some() || self.machine_id.is_some()
    }
}

/// Opaque identifier of a cluster node.
///
/// Equality and hashing use only the unique id. Addresses carry no ordering of
/// their own; the position in a view's member list is the only order.
#[derive(Clone, Serialize, Deserialize)]
pub struct Address {
    id: Uuid,
    name: String,
    location: Option<TopologyLocation>,
}

impl Address {
    /// Create a new address with a fresh unique id.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            location: None,
        }
    }

    /// Attach a topology location to this address.
    pub fn with_location(mut self, location: TopologyLocation) -> Self {
        self.location = Some(location);
        self
    }

    /// Unique id of the node.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Logical node name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Topology location, if the node advertises one.
    pub fn location(&self) -> Option<&TopologyLocation> {
        self.location.as_ref()
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Clustering mode of a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheMode {
    /// Not clustered.
    Local,
    /// Every node holds every entry, writes wait for acknowledgements.
    ReplSync,
    /// Every node holds every entry, writes are fire-and-forget.
    ReplAsync,
    /// Writes invalidate remote copies synchronously.
    InvalidationSync,
    /// Writes invalidate remote copies asynchronously.
    InvalidationAsync,
    /// Entries live on `num_owners` nodes, writes wait for acknowledgements.
    DistSync,
    /// Entries live on `num_owners` nodes, writes are fire-and-forget.
    DistAsync,
    /// Single primary owner per segment with scattered backups.
    ScatteredSync,
}

impl CacheMode {
    pub fn is_clustered(&self) -> bool {
        !matches!(self, CacheMode::Local)
    }

    pub fn is_distributed(&self) -> bool {
        matches!(self, CacheMode::DistSync | CacheMode::DistAsync)
    }

    pub fn is_replicated(&self) -> bool {
        matches!(self, CacheMode::ReplSync | CacheMode::ReplAsync)
    }

    pub fn is_invalidation(&self) -> bool {
        matches!(self, CacheMode::InvalidationSync | CacheMode::InvalidationAsync)
    }

    pub fn is_scattered(&self) -> bool {
        matches!(self, CacheMode::ScatteredSync)
    }

    /// Whether remote writes wait for acknowledgements.
    pub fn is_synchronous(&self) -> bool {
        matches!(
            self,
            CacheMode::ReplSync
                | CacheMode::InvalidationSync
                | CacheMode::DistSync
                | CacheMode::ScatteredSync
        )
    }
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CacheMode::Local => "LOCAL",
            CacheMode::ReplSync => "REPL_SYNC",
            CacheMode::ReplAsync => "REPL_ASYNC",
            CacheMode::InvalidationSync => "INVALIDATION_SYNC",
            CacheMode::InvalidationAsync => "INVALIDATION_ASYNC",
            CacheMode::DistSync => "DIST_SYNC",
            CacheMode::DistAsync => "DIST_ASYNC",
            CacheMode::ScatteredSync => "SCATTERED_SYNC",
        };
        f.write_str(name)
    }
}

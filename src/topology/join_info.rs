//! Parameters a node sends when joining a cache.

use crate::partitioning::HashFunction;
use crate::topology::ConsistentHashFactory;
use crate::types::CacheMode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Join-time parameters for one cache on one node.
///
/// The topology coordinator uses the first joiner's parameters to build the
/// initial consistent hash and checks later joiners against them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheJoinInfo {
    pub factory: ConsistentHashFactory,
    pub hash_function: HashFunction,
    pub num_segments: usize,
    pub num_owners: usize,
    pub timeout: Duration,
    pub total_order: bool,
    pub cache_mode: CacheMode,
    /// 0.0 for nodes that hold no data.
    pub capacity_factor: f32,
    pub persistent_uuid: Uuid,
    /// Checksum of the state persisted by a previous incarnation, if any.
    pub persistent_state_checksum: Option<u32>,
}

impl CacheJoinInfo {
    /// Whether the joining node is willing to own segments.
    pub fn is_data_node(&self) -> bool {
        self.capacity_factor > 0.0
    }
}

/// Cluster-wide rebalancing state of a cache, as reported by the topology coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RebalancingStatus {
    Suspended,
    Pending,
    InProgress,
    Complete,
}

impl fmt::Display for RebalancingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RebalancingStatus::Suspended => "SUSPENDED",
            RebalancingStatus::Pending => "PENDING",
            RebalancingStatus::InProgress => "IN_PROGRESS",
            RebalancingStatus::Complete => "COMPLETE",
        };
        f.write_str(name)
    }
}

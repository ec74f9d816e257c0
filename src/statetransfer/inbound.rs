//! Admission of inbound commands for one cache.

use crate::commands::ReplicableCommand;
use std::sync::atomic::{AtomicI32, Ordering};

/// Sentinel for "not yet a member of any topology".
const NOT_A_MEMBER: i32 = i32::MAX;

/// Tracks from which topology on the local node accepts commands for a cache.
///
/// Commands stamped with a topology older than the first one the node was a
/// member of were routed without this node in mind and are rejected.
#[derive(Debug)]
pub struct PerCacheInboundHandler {
    first_topology_as_member: AtomicI32,
}

impl PerCacheInboundHandler {
    pub fn new() -> Self {
        Self {
            first_topology_as_member: AtomicI32::new(NOT_A_MEMBER),
        }
    }

    /// First topology id in which the local node was a member, or
    /// `i32::MAX` if it never was.
    pub fn first_topology_as_member(&self) -> i32 {
        self.first_topology_as_member.load(Ordering::Acquire)
    }

    pub fn set_first_topology_as_member(&self, topology_id: i32) {
        self.first_topology_as_member.store(topology_id, Ordering::Release);
    }

    /// Whether a command stamped with `topology_id` may be processed.
    pub fn accepts(&self, topology_id: i32) -> bool {
        let first = self.first_topology_as_member();
        first != NOT_A_MEMBER && topology_id >= first
    }

    pub fn accepts_command(&self, command: &ReplicableCommand) -> bool {
        let accepted = self.accepts(command.topology_id);
        if !accepted {
            tracing::trace!(
                cache = %command.cache_name,
                topology_id = command.topology_id,
                first_topology_as_member = self.first_topology_as_member(),
                "Rejecting command from topology older than local membership"
            );
        }
        accepted
    }
}

impl Default for PerCacheInboundHandler {
    fn default() -> Self {
        Self::new()
    }
}

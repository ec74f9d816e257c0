//! Consistent hash ring with virtual nodes.
//!
//! The ring is the placement engine behind the segment-based consistent hash
//! factories. Each physical node is represented by a number of virtual nodes
//! proportional to its capacity factor; a segment's owners are found by walking
//! the ring clockwise from the segment's fixed position.

use crate::types::{Address, TopologyLocation};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use twox_hash::XxHash64;

/// Number of virtual nodes for a node with capacity factor 1.0.
/// More vnodes = more even distribution but higher memory usage.
pub const DEFAULT_VNODES_PER_NODE: usize = 256;

/// A consistent hash ring for distributing segments across nodes.
#[derive(Debug, Clone)]
pub struct HashRing {
    /// Virtual nodes keyed by their position on the ring.
    vnodes: BTreeMap<u64, Address>,

    /// Virtual nodes for a node with capacity factor 1.0.
    vnodes_per_node: usize,

    /// Physical nodes in insertion order.
    nodes: Vec<Address>,
}

impl HashRing {
    /// Create a new empty hash ring.
    pub fn new() -> Self {
        Self::with_vnodes(DEFAULT_VNODES_PER_NODE)
    }

    /// Create a new hash ring with custom vnode count.
    pub fn with_vnodes(vnodes_per_node: usize) -> Self {
        Self {
            vnodes: BTreeMap::new(),
            vnodes_per_node: vnodes_per_node.max(1),
            nodes: Vec::new(),
        }
    }

    /// Get the number of physical nodes in the ring.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Get all physical nodes in the ring.
    pub fn nodes(&self) -> &[Address] {
        &self.nodes
    }

    /// Check if a node is in the ring.
    pub fn contains_node(&self, node: &Address) -> bool {
        self.nodes.contains(node)
    }

    /// Add a node weighted by its capacity factor.
    ///
    /// Nodes with a non-positive capacity factor never own anything and are
    /// not added. Returns whether the node was added.
    pub fn add_node(&mut self, node: &Address, capacity_factor: f32) -> bool {
        if capacity_factor <= 0.0 || self.nodes.contains(node) {
            return false;
        }

        let count = ((self.vnodes_per_node as f32) * capacity_factor).round().max(1.0) as usize;

        self.nodes.push(node.clone());
        for i in 0..count {
            let vnode_key = format!("{}:{}", node.id(), i);
            self.vnodes.insert(hash_bytes(vnode_key.as_bytes()), node.clone());
        }
        true
    }

    /// Remove a node from the ring.
    pub fn remove_node(&mut self, node: &Address) {
        if !self.nodes.contains(node) {
            return;
        }

        self.nodes.retain(|n| n != node);
        self.vnodes.retain(|_, owner| owner != node);
    }

    /// Fixed ring position of a segment.
    pub fn segment_position(segment: usize, num_segments: usize) -> u64 {
        let width = u64::MAX / num_segments.max(1) as u64;
        width * segment as u64 + width / 2
    }

    /// Up to `count` distinct nodes found walking clockwise from `position`.
    pub fn owners_at(&self, position: u64, count: usize) -> Vec<Address> {
        let mut owners = Vec::with_capacity(count.min(self.nodes.len()));
        if count == 0 {
            return owners;
        }

        for node in self.walk(position) {
            if !owners.contains(node) {
                owners.push(node.clone());
                if owners.len() >= count || owners.len() >= self.nodes.len() {
                    break;
                }
            }
        }

        owners
    }

    /// Like [`owners_at`](Self::owners_at), but nodes at a location not yet
    /// covered by the chosen owners are preferred over nodes sharing one.
    pub fn owners_at_spread(&self, position: u64, count: usize) -> Vec<Address> {
        let candidates = self.owners_at(position, self.nodes.len());
        let mut owners: Vec<Address> = Vec::with_capacity(count.min(candidates.len()));
        let mut used: Vec<Option<&TopologyLocation>> = Vec::new();

        for candidate in &candidates {
            if owners.len() >= count {
                break;
            }
            let location = candidate.location();
            if !used.contains(&location) {
                used.push(location);
                owners.push(candidate.clone());
            }
        }

        for candidate in candidates {
            if owners.len() >= count {
                break;
            }
            if !owners.contains(&candidate) {
                owners.push(candidate);
            }
        }

        owners
    }

    /// Vnodes clockwise from `position`, wrapping around once.
    fn walk(&self, position: u64) -> impl Iterator<Item = &Address> {
        self.vnodes
            .range(position..)
            .chain(self.vnodes.range(..position))
            .map(|(_, node)| node)
    }
}

impl Default for HashRing {
    fn default() -> Self {
        Self::new()
    }
}

/// Hash arbitrary bytes using xxHash64.
pub(crate) fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    bytes.hash(&mut hasher);
    hasher.finish()
}

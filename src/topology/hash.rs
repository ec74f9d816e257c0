//! Segment-based consistent hashes and the factories that build them.

use crate::error::{Error, Result};
use crate::partitioning::{HashFunction, HashPartitioner, HashRing, KeyPartitioner};
use crate::types::Address;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// Immutable mapping from segment to ordered owner list.
///
/// The first owner of a segment is its primary owner. Keys are routed to
/// segments by the attached [`KeyPartitioner`]; attaching a different
/// partitioner produces a new hash and leaves this one untouched.
#[derive(Clone)]
pub struct ConsistentHash {
    members: Arc<Vec<Address>>,
    num_owners: usize,
    segment_owners: Arc<Vec<Vec<Address>>>,
    capacity_factors: Option<Arc<HashMap<Address, f32>>>,
    partitioner: Arc<dyn KeyPartitioner>,
}

impl ConsistentHash {
    /// Create a hash from explicit segment owners.
    pub fn new(
        members: Vec<Address>,
        num_owners: usize,
        segment_owners: Vec<Vec<Address>>,
        hash_function: HashFunction,
    ) -> Self {
        let partitioner = Arc::new(HashPartitioner::new(hash_function, segment_owners.len()));
        Self {
            members: Arc::new(members),
            num_owners,
            segment_owners: Arc::new(segment_owners),
            capacity_factors: None,
            partitioner,
        }
    }

    /// Attach the capacity factors the hash was computed with.
    pub fn with_capacity_factors(mut self, capacity_factors: HashMap<Address, f32>) -> Self {
        self.capacity_factors = Some(Arc::new(capacity_factors));
        self
    }

    /// Derive a hash that routes keys through `partitioner`.
    pub fn with_partitioner(&self, partitioner: Arc<dyn KeyPartitioner>) -> Result<Self> {
        if partitioner.num_segments() != self.num_segments() {
            return Err(Error::Config(format!(
                "key partitioner has {} segments, consistent hash has {}",
                partitioner.num_segments(),
                self.num_segments()
            )));
        }

        Ok(Self {
            partitioner,
            ..self.clone()
        })
    }

    pub fn members(&self) -> &[Address] {
        &self.members
    }

    pub fn num_owners(&self) -> usize {
        self.num_owners
    }

    pub fn num_segments(&self) -> usize {
        self.segment_owners.len()
    }

    pub fn capacity_factor(&self, member: &Address) -> Option<f32> {
        self.capacity_factors
            .as_ref()
            .and_then(|factors| factors.get(member).copied())
    }

    pub fn partitioner(&self) -> &Arc<dyn KeyPartitioner> {
        &self.partitioner
    }

    /// Segment a key belongs to.
    pub fn segment_for(&self, key: &[u8]) -> usize {
        self.partitioner.segment(key)
    }

    /// Owners of a segment, primary first.
    pub fn locate_owners_for_segment(&self, segment: usize) -> &[Address] {
        self.segment_owners
            .get(segment)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn locate_primary_owner_for_segment(&self, segment: usize) -> Option<&Address> {
        self.locate_owners_for_segment(segment).first()
    }

    /// Owners of a key, primary first.
    pub fn locate_owners(&self, key: &[u8]) -> &[Address] {
        self.locate_owners_for_segment(self.segment_for(key))
    }

    pub fn locate_primary_owner(&self, key: &[u8]) -> Option<&Address> {
        self.locate_owners(key).first()
    }

    pub fn is_key_local_to(&self, address: &Address, key: &[u8]) -> bool {
        self.locate_owners(key).contains(address)
    }

    /// Segments owned (as primary or backup) by `owner`.
    pub fn segments_for_owner(&self, owner: &Address) -> BTreeSet<usize> {
        self.segment_owners
            .iter()
            .enumerate()
            .filter(|(_, owners)| owners.contains(owner))
            .map(|(segment, _)| segment)
            .collect()
    }

    /// Segments for which `owner` is the primary owner.
    pub fn primary_segments_for_owner(&self, owner: &Address) -> BTreeSet<usize> {
        self.segment_owners
            .iter()
            .enumerate()
            .filter(|(_, owners)| owners.first() == Some(owner))
            .map(|(segment, _)| segment)
            .collect()
    }

    /// Hash owning, for every segment, the owners of both `self` and `other`.
    ///
    /// Owners of `self` come first in each segment. Both hashes must have the
    /// same number of segments.
    pub fn union(&self, other: &ConsistentHash) -> Result<ConsistentHash> {
        if self.num_segments() != other.num_segments() {
            return Err(Error::Internal(format!(
                "cannot union hashes with {} and {} segments",
                self.num_segments(),
                other.num_segments()
            )));
        }

        let mut members = self.members.to_vec();
        for member in other.members() {
            if !members.contains(member) {
                members.push(member.clone());
            }
        }

        let segment_owners = self
            .segment_owners
            .iter()
            .zip(other.segment_owners.iter())
            .map(|(mine, theirs)| {
                let mut owners = mine.clone();
                owners.extend(theirs.iter().filter(|o| !mine.contains(o)).cloned());
                owners
            })
            .collect();

        let capacity_factors = match (&self.capacity_factors, &other.capacity_factors) {
            (Some(mine), Some(theirs)) => {
                let mut merged = theirs.as_ref().clone();
                merged.extend(mine.iter().map(|(a, f)| (a.clone(), *f)));
                Some(Arc::new(merged))
            }
            (Some(factors), None) | (None, Some(factors)) => Some(factors.clone()),
            (None, None) => None,
        };

        Ok(ConsistentHash {
            members: Arc::new(members),
            num_owners: self.num_owners.max(other.num_owners),
            segment_owners: Arc::new(segment_owners),
            capacity_factors,
            partitioner: self.partitioner.clone(),
        })
    }
}

impl fmt::Debug for ConsistentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsistentHash")
            .field("members", &self.members)
            .field("num_owners", &self.num_owners)
            .field("num_segments", &self.num_segments())
            .finish()
    }
}

impl PartialEq for ConsistentHash {
    fn eq(&self, other: &Self) -> bool {
        self.members == other.members
            && self.num_owners == other.num_owners
            && self.segment_owners == other.segment_owners
    }
}

/// Strategy that assigns segment owners.
///
/// A closed set of variants; the variant for a cache is selected from its
/// cache mode and whether nodes advertise topology information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConsistentHashFactory {
    /// Capacity-weighted ring placement.
    Sync,
    /// Ring placement spreading owners across sites, racks and machines.
    TopologyAwareSync,
    /// Every data node owns every segment; primaries rotate.
    SyncReplicated,
    /// One owner per segment.
    Scattered,
}

impl ConsistentHashFactory {
    /// Compute a hash for `members`.
    ///
    /// Members whose capacity factor is zero are kept as members but never
    /// own segments. Missing capacity factors default to 1.0.
    pub fn create(
        &self,
        hash_function: HashFunction,
        num_owners: usize,
        num_segments: usize,
        members: &[Address],
        capacity_factors: Option<&HashMap<Address, f32>>,
    ) -> ConsistentHash {
        let num_segments = num_segments.max(1);
        let capacity = |member: &Address| {
            capacity_factors
                .and_then(|factors| factors.get(member).copied())
                .unwrap_or(1.0)
        };

        let (num_owners, segment_owners) = match self {
            ConsistentHashFactory::SyncReplicated => {
                let data_members: Vec<Address> = members
                    .iter()
                    .filter(|&m| capacity(m) > 0.0)
                    .cloned()
                    .collect();
                let owners = (0..num_segments)
                    .map(|segment| {
                        if data_members.is_empty() {
                            return Vec::new();
                        }
                        let mut owners = data_members.clone();
                        owners.rotate_left(segment % data_members.len());
                        owners
                    })
                    .collect();
                (data_members.len().max(1), owners)
            }
            ConsistentHashFactory::Sync
            | ConsistentHashFactory::TopologyAwareSync
            | ConsistentHashFactory::Scattered => {
                let mut ring = HashRing::new();
                for member in members {
                    ring.add_node(member, capacity(member));
                }

                let num_owners = match self {
                    ConsistentHashFactory::Scattered => 1,
                    _ => num_owners.max(1),
                };

                let owners = (0..num_segments)
                    .map(|segment| {
                        let position = HashRing::segment_position(segment, num_segments);
                        match self {
                            ConsistentHashFactory::TopologyAwareSync => {
                                ring.owners_at_spread(position, num_owners)
                            }
                            _ => ring.owners_at(position, num_owners),
                        }
                    })
                    .collect();
                (num_owners, owners)
            }
        };

        let ch = ConsistentHash::new(members.to_vec(), num_owners, segment_owners, hash_function);
        match capacity_factors {
            Some(factors) => ch.with_capacity_factors(factors.clone()),
            None => ch,
        }
    }
}

impl fmt::Display for ConsistentHashFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConsistentHashFactory::Sync => "SyncConsistentHashFactory",
            ConsistentHashFactory::TopologyAwareSync => "TopologyAwareSyncConsistentHashFactory",
            ConsistentHashFactory::SyncReplicated => "SyncReplicatedConsistentHashFactory",
            ConsistentHashFactory::Scattered => "ScatteredConsistentHashFactory",
        };
        f.write_str(name)
    }
}

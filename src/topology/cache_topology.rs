//! Cache topologies: one step of a cache's ownership history.

use crate::error::Result;
use crate::partitioning::KeyPartitioner;
use crate::topology::ConsistentHash;
use crate::types::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Rebalance phase of a topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// No rebalance in progress; only the current hash exists.
    NoRebalance,
    /// Scattered-cache transition: reads use the current hash, writes the union.
    Transitory,
    /// Data is moving; reads use the old owners, writes go to old and new owners.
    ReadOldWriteAll,
    /// Data has moved; reads and writes go to old and new owners.
    ReadAllWriteAll,
    /// Old owners are being retired; reads use the new owners.
    ReadNewWriteAll,
}

impl Phase {
    /// Whether the phase is part of a rebalance and must be confirmed back to
    /// the topology coordinator once local state transfer finishes.
    pub fn is_rebalance(&self) -> bool {
        !matches!(self, Phase::NoRebalance)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::NoRebalance => "NO_REBALANCE",
            Phase::Transitory => "TRANSITORY",
            Phase::ReadOldWriteAll => "READ_OLD_WRITE_ALL",
            Phase::ReadAllWriteAll => "READ_ALL_WRITE_ALL",
            Phase::ReadNewWriteAll => "READ_NEW_WRITE_ALL",
        };
        f.write_str(name)
    }
}

/// Immutable snapshot of a cache's ownership.
///
/// Transitions replace the whole topology; nothing here is ever mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheTopology {
    topology_id: i32,
    rebalance_id: i32,
    current_ch: ConsistentHash,
    pending_ch: Option<ConsistentHash>,
    union_ch: Option<ConsistentHash>,
    phase: Phase,
    actual_members: Vec<Address>,
    persistent_uuids: Vec<Uuid>,
}

impl CacheTopology {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        topology_id: i32,
        rebalance_id: i32,
        current_ch: ConsistentHash,
        pending_ch: Option<ConsistentHash>,
        union_ch: Option<ConsistentHash>,
        phase: Phase,
        actual_members: Vec<Address>,
        persistent_uuids: Vec<Uuid>,
    ) -> Self {
        Self {
            topology_id,
            rebalance_id,
            current_ch,
            pending_ch,
            union_ch,
            phase,
            actual_members,
            persistent_uuids,
        }
    }

    /// A topology with no rebalance in progress.
    pub fn stable(topology_id: i32, rebalance_id: i32, current_ch: ConsistentHash) -> Self {
        let actual_members = current_ch.members().to_vec();
        Self::new(
            topology_id,
            rebalance_id,
            current_ch,
            None,
            None,
            Phase::NoRebalance,
            actual_members,
            Vec::new(),
        )
    }

    pub fn topology_id(&self) -> i32 {
        self.topology_id
    }

    pub fn rebalance_id(&self) -> i32 {
        self.rebalance_id
    }

    pub fn current_ch(&self) -> &ConsistentHash {
        &self.current_ch
    }

    pub fn pending_ch(&self) -> Option<&ConsistentHash> {
        self.pending_ch.as_ref()
    }

    pub fn union_ch(&self) -> Option<&ConsistentHash> {
        self.union_ch.as_ref()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Members that are actually present in the cluster.
    pub fn actual_members(&self) -> &[Address] {
        &self.actual_members
    }

    pub fn members_persistent_uuids(&self) -> &[Uuid] {
        &self.persistent_uuids
    }

    /// Hash used to locate the owners to read from.
    pub fn read_consistent_hash(&self) -> &ConsistentHash {
        match self.phase {
            Phase::NoRebalance | Phase::Transitory | Phase::ReadOldWriteAll => &self.current_ch,
            Phase::ReadAllWriteAll => self.union_ch.as_ref().unwrap_or(&self.current_ch),
            Phase::ReadNewWriteAll => self.pending_ch.as_ref().unwrap_or(&self.current_ch),
        }
    }

    /// Hash used to locate the owners to write to.
    pub fn write_consistent_hash(&self) -> &ConsistentHash {
        match self.phase {
            Phase::NoRebalance => &self.current_ch,
            _ => self.union_ch.as_ref().unwrap_or(&self.current_ch),
        }
    }

    /// Members of the widest hash in this topology.
    pub fn members(&self) -> &[Address] {
        self.union_ch
            .as_ref()
            .or(self.pending_ch.as_ref())
            .unwrap_or(&self.current_ch)
            .members()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.members().contains(address)
    }

    /// Union of the write owners of `keys`.
    pub fn write_owners<K: AsRef<[u8]>>(&self, keys: &[K]) -> HashSet<Address> {
        let ch = self.write_consistent_hash();
        keys.iter()
            .flat_map(|key| ch.locate_owners(key.as_ref()).iter().cloned())
            .collect()
    }

    pub fn is_write_owner(&self, address: &Address, key: &[u8]) -> bool {
        self.write_consistent_hash().is_key_local_to(address, key)
    }

    pub fn is_read_owner(&self, address: &Address, key: &[u8]) -> bool {
        self.read_consistent_hash().is_key_local_to(address, key)
    }

    /// Derive a topology whose hashes route keys through `partitioner`.
    pub fn with_partitioner(&self, partitioner: &Arc<dyn KeyPartitioner>) -> Result<Self> {
        let decorate = |ch: &ConsistentHash| ch.with_partitioner(partitioner.clone());

        Ok(Self {
            current_ch: decorate(&self.current_ch)?,
            pending_ch: self.pending_ch.as_ref().map(decorate).transpose()?,
            union_ch: self.union_ch.as_ref().map(decorate).transpose()?,
            ..self.clone()
        })
    }
}

impl fmt::Display for CacheTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheTopology{{id={}, rebalance_id={}, phase={}, members={:?}}}",
            self.topology_id,
            self.rebalance_id,
            self.phase,
            self.members()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partitioning::{GroupingPartitioner, HashFunction, HashTagGrouper};
    use crate::topology::ConsistentHashFactory;

    fn rebalancing_topology(phase: Phase) -> (CacheTopology, Vec<Address>) {
        let members: Vec<Address> = (0..3).map(|i| Address::named(format!("n{}", i))).collect();
        let current = ConsistentHashFactory::Sync.create(HashFunction::default(), 1, 16, &members[..1], None);
        let pending = ConsistentHashFactory::Sync.create(HashFunction::default(), 1, 16, &members, None);
        let union = current.union(&pending).unwrap();

        let topology = CacheTopology::new(
            5,
            2,
            current,
            Some(pending),
            Some(union),
            phase,
            members.clone(),
            Vec::new(),
        );
        (topology, members)
    }

    #[test]
    fn test_phase_hash_selection() {
        let (t, _) = rebalancing_topology(Phase::ReadOldWriteAll);
        assert_eq!(t.read_consistent_hash(), t.current_ch());
        assert_eq!(Some(t.write_consistent_hash()), t.union_ch());

        let (t, _) = rebalancing_topology(Phase::ReadAllWriteAll);
        assert_eq!(Some(t.read_consistent_hash()), t.union_ch());

        let (t, _) = rebalancing_topology(Phase::ReadNewWriteAll);
        assert_eq!(Some(t.read_consistent_hash()), t.pending_ch());
        assert_eq!(Some(t.write_consistent_hash()), t.union_ch());

        let (t, _) = rebalancing_topology(Phase::Transitory);
        assert_eq!(t.read_consistent_hash(), t.current_ch());
    }

    #[test]
    fn test_members_use_widest_hash() {
        let (t, members) = rebalancing_topology(Phase::ReadOldWriteAll);
        assert_eq!(t.members().len(), 3);
        assert!(t.contains(&members[2]));
        assert_eq!(t.current_ch().members().len(), 1);
    }

    #[test]
    fn test_write_owners_include_old_and_new() {
        let (t, members) = rebalancing_topology(Phase::ReadOldWriteAll);
        let keys: Vec<String> = (0..64).map(|i| format!("k{}", i)).collect();

        let owners = t.write_owners(&keys);
        // The old sole owner is a write owner for every key
        assert!(owners.contains(&members[0]));
        assert!(owners.len() > 1);
        assert!(t.is_write_owner(&members[0], b"k1"));
        assert!(t.is_read_owner(&members[0], b"k1"));
    }

    #[test]
    fn test_phase_requires_confirmation() {
        assert!(!Phase::NoRebalance.is_rebalance());
        for phase in [
            Phase::Transitory,
            Phase::ReadOldWriteAll,
            Phase::ReadAllWriteAll,
            Phase::ReadNewWriteAll,
        ] {
            assert!(phase.is_rebalance());
        }
    }

    #[test]
    fn test_with_partitioner_keeps_original() {
        let (t, _) = rebalancing_topology(Phase::ReadAllWriteAll);
        let partitioner: Arc<dyn KeyPartitioner> = Arc::new(GroupingPartitioner::new(
            t.current_ch().partitioner().clone(),
            vec![Arc::new(HashTagGrouper)],
        ));

        let decorated = t.with_partitioner(&partitioner).unwrap();
        assert_eq!(decorated, t);
        assert_eq!(decorated.topology_id(), 5);
        assert_eq!(
            decorated.union_ch().unwrap().segment_for(b"x{g}"),
            t.union_ch().unwrap().segment_for(b"g")
        );
        assert_eq!(
            decorated.pending_ch().unwrap().segment_for(b"x{g}"),
            t.pending_ch().unwrap().segment_for(b"g")
        );
    }
}

//! Scripted cluster topology coordinator for tests.
//!
//! Computes topologies the way a cluster-wide coordinator would: the first
//! joiner gets a stable topology, every later joiner starts a rebalance that
//! walks through the write-all phases as members confirm them. Updates are
//! delivered by a single dispatcher task, so each node sees them in order and
//! never re-entrantly.

use crate::error::{Error, Result};
use crate::statetransfer::{CacheTopologyHandler, LocalTopologyManager, PartitionHandlingManager};
use crate::topology::{CacheJoinInfo, CacheTopology, ConsistentHash, Phase, RebalancingStatus};
use crate::types::Address;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// A phase confirmation received from a node.
#[derive(Debug, Clone, PartialEq)]
pub struct Confirmation {
    pub node: Address,
    pub cache_name: String,
    pub topology_id: i32,
    pub rebalance_id: i32,
    pub error: Option<String>,
}

struct Dispatch {
    handler: Arc<dyn CacheTopologyHandler>,
    topology: CacheTopology,
    is_rebalance: bool,
}

#[derive(Default)]
struct CacheState {
    join_info: Option<CacheJoinInfo>,
    members: Vec<Address>,
    capacity_factors: HashMap<Address, f32>,
    persistent_uuids: HashMap<Address, Uuid>,
    handlers: HashMap<Address, Arc<dyn CacheTopologyHandler>>,
    topology: Option<CacheTopology>,
    awaiting_confirmation: HashSet<Address>,
}

impl CacheState {
    fn create_hash(&self, members: &[Address]) -> Option<ConsistentHash> {
        let info = self.join_info.as_ref()?;
        Some(info.factory.create(
            info.hash_function,
            info.num_owners,
            info.num_segments,
            members,
            Some(&self.capacity_factors),
        ))
    }

    fn uuids(&self, members: &[Address]) -> Vec<Uuid> {
        members
            .iter()
            .filter_map(|m| self.persistent_uuids.get(m).copied())
            .collect()
    }
}

/// In-memory topology coordinator shared by every node of a test cluster.
pub struct TestTopologyCoordinator {
    caches: Mutex<HashMap<String, CacheState>>,
    rebalancing_enabled: AtomicBool,
    confirmations: Mutex<Vec<Confirmation>>,
    dispatch_errors: Arc<Mutex<Vec<String>>>,
    dispatcher: mpsc::UnboundedSender<Dispatch>,
}

impl TestTopologyCoordinator {
    /// Create a coordinator. Must be called inside a tokio runtime.
    pub fn new() -> Arc<Self> {
        let (dispatcher, mut rx) = mpsc::unbounded_channel::<Dispatch>();
        let dispatch_errors = Arc::new(Mutex::new(Vec::new()));

        let errors = dispatch_errors.clone();
        tokio::spawn(async move {
            while let Some(dispatch) = rx.recv().await {
                let topology_id = dispatch.topology.topology_id();
                let result = if dispatch.is_rebalance {
                    dispatch.handler.rebalance(dispatch.topology).await
                } else {
                    dispatch.handler.update_consistent_hash(dispatch.topology).await
                };
                if let Err(e) = result {
                    tracing::warn!(topology_id, error = %e, "Topology update failed");
                    errors.lock().push(e.to_string());
                }
            }
        });

        Arc::new(Self {
            caches: Mutex::new(HashMap::new()),
            rebalancing_enabled: AtomicBool::new(true),
            confirmations: Mutex::new(Vec::new()),
            dispatch_errors,
            dispatcher,
        })
    }

    /// Topology manager facade for the node at `address`.
    pub fn manager_for(self: &Arc<Self>, address: Address) -> Arc<TestTopologyManager> {
        Arc::new(TestTopologyManager {
            coordinator: self.clone(),
            address,
            persistent_uuid: Uuid::new_v4(),
        })
    }

    pub fn set_rebalancing_enabled(&self, enabled: bool) {
        self.rebalancing_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_rebalancing_enabled(&self) -> bool {
        self.rebalancing_enabled.load(Ordering::SeqCst)
    }

    pub fn confirmations(&self) -> Vec<Confirmation> {
        self.confirmations.lock().clone()
    }

    pub fn dispatch_errors(&self) -> Vec<String> {
        self.dispatch_errors.lock().clone()
    }

    pub fn topology(&self, cache_name: &str) -> Option<CacheTopology> {
        self.caches
            .lock()
            .get(cache_name)
            .and_then(|c| c.topology.clone())
    }

    /// Send `topology` to `node` as if the coordinator had computed it.
    pub fn push_topology(&self, cache_name: &str, node: &Address, topology: CacheTopology, is_rebalance: bool) -> bool {
        let handler = self
            .caches
            .lock()
            .get(cache_name)
            .and_then(|c| c.handlers.get(node).cloned());
        match handler {
            Some(handler) => self
                .dispatcher
                .send(Dispatch {
                    handler,
                    topology,
                    is_rebalance,
                })
                .is_ok(),
            None => false,
        }
    }

    fn broadcast(&self, state: &CacheState, topology: &CacheTopology, is_rebalance: bool) {
        for member in topology.actual_members() {
            if let Some(handler) = state.handlers.get(member) {
                let _ = self.dispatcher.send(Dispatch {
                    handler: handler.clone(),
                    topology: topology.clone(),
                    is_rebalance,
                });
            }
        }
    }

    fn join(
        &self,
        cache_name: &str,
        node: &Address,
        join_info: CacheJoinInfo,
        persistent_uuid: Uuid,
        handler: Arc<dyn CacheTopologyHandler>,
    ) -> Result<Option<CacheTopology>> {
        let mut caches = self.caches.lock();
        let state = caches.entry(cache_name.to_string()).or_default();

        if let Some(existing) = &state.join_info {
            if existing.num_segments != join_info.num_segments {
                return Err(Error::Config(format!(
                    "{} joined with {} segments, cache has {}",
                    node, join_info.num_segments, existing.num_segments
                )));
            }
        }

        tracing::debug!(cache = cache_name, %node, data_node = join_info.is_data_node(), "Node joining cache");
        state
            .capacity_factors
            .insert(node.clone(), join_info.capacity_factor);
        state.persistent_uuids.insert(node.clone(), persistent_uuid);
        state.handlers.insert(node.clone(), handler);
        if state.join_info.is_none() {
            state.join_info = Some(join_info);
        }
        if !state.members.contains(node) {
            state.members.push(node.clone());
        }

        let topology = match state.topology.clone() {
            None => {
                let members = state.members.clone();
                let ch = state
                    .create_hash(&members)
                    .ok_or_else(|| Error::Internal("missing join info".into()))?;
                let topology = CacheTopology::new(
                    0,
                    0,
                    ch,
                    None,
                    None,
                    Phase::NoRebalance,
                    members.clone(),
                    state.uuids(&members),
                );
                state.topology = Some(topology.clone());
                self.broadcast(state, &topology, false);
                topology
            }
            Some(current) => {
                self.maybe_start_rebalance(state);
                state.topology.clone().unwrap_or(current)
            }
        };
        Ok(Some(topology))
    }

    fn maybe_start_rebalance(&self, state: &mut CacheState) {
        let Some(current) = state.topology.clone() else {
            return;
        };
        if current.phase() != Phase::NoRebalance
            || current.current_ch().members() == state.members.as_slice()
        {
            return;
        }

        let members = state.members.clone();
        let current_ch = current.current_ch().clone();

        if !self.is_rebalancing_enabled() {
            let topology = CacheTopology::new(
                current.topology_id() + 1,
                current.rebalance_id(),
                current_ch,
                None,
                None,
                Phase::NoRebalance,
                members.clone(),
                state.uuids(&members),
            );
            state.topology = Some(topology.clone());
            self.broadcast(state, &topology, false);
            return;
        }

        let Some(pending) = state.create_hash(&members) else {
            return;
        };
        let union = match current_ch.union(&pending) {
            Ok(union) => union,
            Err(e) => {
                self.dispatch_errors.lock().push(e.to_string());
                return;
            }
        };

        let topology = CacheTopology::new(
            current.topology_id() + 1,
            current.rebalance_id() + 1,
            current_ch,
            Some(pending),
            Some(union),
            Phase::ReadOldWriteAll,
            members.clone(),
            state.uuids(&members),
        );
        state.awaiting_confirmation = topology.members().iter().cloned().collect();
        state.topology = Some(topology.clone());
        self.broadcast(state, &topology, true);
    }

    fn leave(&self, cache_name: &str, node: &Address) {
        let mut caches = self.caches.lock();
        let Some(state) = caches.get_mut(cache_name) else {
            return;
        };
        state.members.retain(|m| m != node);
        state.handlers.remove(node);
        state.capacity_factors.remove(node);
        state.awaiting_confirmation.remove(node);

        let Some(current) = state.topology.clone() else {
            return;
        };
        if state.members.is_empty() {
            state.topology = None;
            return;
        }

        let members = state.members.clone();
        let Some(ch) = state.create_hash(&members) else {
            return;
        };
        let topology = CacheTopology::new(
            current.topology_id() + 1,
            current.rebalance_id(),
            ch,
            None,
            None,
            Phase::NoRebalance,
            members.clone(),
            state.uuids(&members),
        );
        state.awaiting_confirmation.clear();
        state.topology = Some(topology.clone());
        self.broadcast(state, &topology, false);
    }

    fn confirm(&self, confirmation: Confirmation) {
        self.confirmations.lock().push(confirmation.clone());

        let mut caches = self.caches.lock();
        let Some(state) = caches.get_mut(&confirmation.cache_name) else {
            return;
        };
        let Some(current) = state.topology.clone() else {
            return;
        };
        if current.topology_id() != confirmation.topology_id {
            return;
        }

        state.awaiting_confirmation.remove(&confirmation.node);
        if !state.awaiting_confirmation.is_empty() {
            return;
        }

        let next = match current.phase() {
            Phase::ReadOldWriteAll => Phase::ReadAllWriteAll,
            Phase::ReadAllWriteAll => Phase::ReadNewWriteAll,
            Phase::Transitory | Phase::ReadNewWriteAll => Phase::NoRebalance,
            Phase::NoRebalance => return,
        };

        let members = current.actual_members().to_vec();
        let uuids = current.members_persistent_uuids().to_vec();
        if next == Phase::NoRebalance {
            let Some(pending) = current.pending_ch().cloned() else {
                return;
            };
            let topology = CacheTopology::new(
                current.topology_id() + 1,
                current.rebalance_id(),
                pending,
                None,
                None,
                Phase::NoRebalance,
                members,
                uuids,
            );
            state.topology = Some(topology.clone());
            self.broadcast(state, &topology, false);
            self.maybe_start_rebalance(state);
        } else {
            let topology = CacheTopology::new(
                current.topology_id() + 1,
                current.rebalance_id(),
                current.current_ch().clone(),
                current.pending_ch().cloned(),
                current.union_ch().cloned(),
                next,
                members,
                uuids,
            );
            state.awaiting_confirmation = topology.members().iter().cloned().collect();
            state.topology = Some(topology.clone());
            self.broadcast(state, &topology, true);
        }
    }
}

/// Per-node facade over a [`TestTopologyCoordinator`].
pub struct TestTopologyManager {
    coordinator: Arc<TestTopologyCoordinator>,
    address: Address,
    persistent_uuid: Uuid,
}

#[async_trait::async_trait]
impl LocalTopologyManager for TestTopologyManager {
    async fn join(
        &self,
        cache_name: &str,
        join_info: CacheJoinInfo,
        handler: Arc<dyn CacheTopologyHandler>,
        _partition_handling: Arc<dyn PartitionHandlingManager>,
    ) -> Result<Option<CacheTopology>> {
        self.coordinator
            .join(cache_name, &self.address, join_info, self.persistent_uuid, handler)
    }

    async fn leave(&self, cache_name: &str, _timeout: Duration) -> Result<()> {
        self.coordinator.leave(cache_name, &self.address);
        Ok(())
    }

    async fn confirm_rebalance_phase(
        &self,
        cache_name: &str,
        topology_id: i32,
        rebalance_id: i32,
        error: Option<String>,
    ) -> Result<()> {
        self.coordinator.confirm(Confirmation {
            node: self.address.clone(),
            cache_name: cache_name.to_string(),
            topology_id,
            rebalance_id,
            error,
        });
        Ok(())
    }

    async fn is_cache_rebalancing_enabled(&self, _cache_name: &str) -> Result<bool> {
        Ok(self.coordinator.is_rebalancing_enabled())
    }

    async fn rebalancing_status(&self, cache_name: &str) -> Result<RebalancingStatus> {
        if !self.coordinator.is_rebalancing_enabled() {
            return Ok(RebalancingStatus::Suspended);
        }
        Ok(match self.coordinator.topology(cache_name) {
            Some(t) if t.phase() != Phase::NoRebalance => RebalancingStatus::InProgress,
            Some(_) => RebalancingStatus::Complete,
            None => RebalancingStatus::Pending,
        })
    }

    fn persistent_uuid(&self) -> Uuid {
        self.persistent_uuid
    }
}

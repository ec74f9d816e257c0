//! Per-cache state transfer manager.

use crate::commands::ReplicableCommand;
use crate::config::{CacheConfig, GlobalConfig};
use crate::error::{Error, Result};
use crate::gate::Gate;
use crate::partitioning::KeyPartitioner;
use crate::statetransfer::collaborators::{
    CacheNotifier, CacheTopologyHandler, GlobalStateManager, LocalTopologyManager,
    PartitionHandlingManager, StateConsumer, StateProvider,
};
use crate::statetransfer::inbound::PerCacheInboundHandler;
use crate::topology::{CacheJoinInfo, CacheTopology, ConsistentHashFactory, Phase, RebalancingStatus};
use crate::transport::{DeliverOrder, Response, ResponseMode, RpcOptions, Transport};
use crate::types::{Address, CacheMode};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, trace, warn};

/// Collaborators wired into a [`StateTransferManager`].
#[derive(Clone)]
pub struct StateTransferComponents {
    pub topology_manager: Arc<dyn LocalTopologyManager>,
    pub consumer: Arc<dyn StateConsumer>,
    pub provider: Arc<dyn StateProvider>,
    pub partition_handling: Arc<dyn PartitionHandlingManager>,
    pub notifier: Arc<dyn CacheNotifier>,
    /// Local persistent store; `None` when the node keeps no global state.
    pub global_state: Option<Arc<dyn GlobalStateManager>>,
    /// Routes keys to segments. Must have as many segments as the cache.
    pub key_partitioner: Arc<dyn KeyPartitioner>,
    pub inbound: Arc<PerCacheInboundHandler>,
}

/// Joins one cache to the cluster and installs the topologies the
/// coordinator sends.
///
/// Topology updates for a cache are serialized by the topology coordinator,
/// so the installed topology has a single writer and is replaced wholesale.
pub struct StateTransferManager {
    cache_name: String,
    global: GlobalConfig,
    config: CacheConfig,
    transport: Arc<Transport>,
    components: StateTransferComponents,
    topology: RwLock<Option<Arc<CacheTopology>>>,
    persistent_state_checksum: RwLock<Option<u32>>,
    /// Opens once the local node holds its initial data, or on stop.
    initial_transfer: Gate,
}

impl StateTransferManager {
    pub fn new(
        cache_name: impl Into<String>,
        global: GlobalConfig,
        config: CacheConfig,
        transport: Arc<Transport>,
        components: StateTransferComponents,
    ) -> Arc<Self> {
        Arc::new(Self {
            cache_name: cache_name.into(),
            global,
            config,
            transport,
            components,
            topology: RwLock::new(None),
            persistent_state_checksum: RwLock::new(None),
            initial_transfer: Gate::new(),
        })
    }

    /// Factory for a cache mode when none is configured.
    pub fn pick_consistent_hash_factory(
        mode: CacheMode,
        topology_aware: bool,
    ) -> Result<ConsistentHashFactory> {
        match mode {
            CacheMode::DistSync | CacheMode::DistAsync if topology_aware => {
                Ok(ConsistentHashFactory::TopologyAwareSync)
            }
            CacheMode::DistSync | CacheMode::DistAsync => Ok(ConsistentHashFactory::Sync),
            CacheMode::ReplSync
            | CacheMode::ReplAsync
            | CacheMode::InvalidationSync
            | CacheMode::InvalidationAsync => Ok(ConsistentHashFactory::SyncReplicated),
            CacheMode::ScatteredSync => Ok(ConsistentHashFactory::Scattered),
            CacheMode::Local => Err(Error::Config(format!(
                "unexpected cache mode for state transfer: {}",
                mode
            ))),
        }
    }

    /// Join the cluster for this cache.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        trace!(cache = %self.cache_name, address = ?self.transport.address(), "Starting state transfer manager");

        let checksum = self
            .components
            .global_state
            .as_ref()
            .and_then(|state| state.read_scoped_state(&self.cache_name))
            .map(|state| state.checksum());
        *self.persistent_state_checksum.write() = checksum;

        let capacity_factor = if self.global.zero_capacity_node {
            0.0
        } else {
            self.config.hash.capacity_factor
        };

        let factory = match self.config.hash.consistent_hash_factory {
            Some(factory) => factory,
            None => {
                Self::pick_consistent_hash_factory(self.config.mode, self.global.has_topology_info())?
            }
        };

        let join_info = CacheJoinInfo {
            factory,
            hash_function: self.config.hash.hash_function,
            num_segments: self.config.hash.num_segments,
            num_owners: self.config.hash.num_owners,
            timeout: self.config.state_transfer.timeout,
            total_order: self.config.transaction.protocol.is_total_order(),
            cache_mode: self.config.mode,
            capacity_factor,
            persistent_uuid: self.components.topology_manager.persistent_uuid(),
            persistent_state_checksum: checksum,
        };

        let handler: Arc<dyn CacheTopologyHandler> = Arc::new(TopologyHandler {
            manager: Arc::downgrade(self),
        });

        let initial = self
            .components
            .topology_manager
            .join(
                &self.cache_name,
                join_info,
                handler,
                self.components.partition_handling.clone(),
            )
            .await?;

        info!(
            cache = %self.cache_name,
            %factory,
            capacity_factor,
            initial_topology_id = initial.as_ref().map(|t| t.topology_id()),
            "Joined cache"
        );
        Ok(())
    }

    /// Install `new_topology`.
    ///
    /// Fails with [`Error::InvariantViolation`] if its id is lower than the
    /// installed one. Migration failures are reported to the coordinator with
    /// the phase confirmation and do not fail the update.
    pub async fn do_topology_update(&self, new_topology: CacheTopology, is_rebalance: bool) -> Result<()> {
        let old_topology = self.topology.read().clone();
        let topology_id = new_topology.topology_id();

        if let Some(old) = &old_topology {
            if old.topology_id() > topology_id {
                error!(
                    cache = %self.cache_name,
                    old_topology_id = old.topology_id(),
                    topology_id,
                    "Received topology older than the installed one"
                );
                return Err(Error::InvariantViolation(format!(
                    "old topology is higher: old={}, new={}",
                    old, new_topology
                )));
            }
        }

        debug!(cache = %self.cache_name, topology = %new_topology, is_rebalance, "Installing new cache topology");

        let new_topology = Arc::new(new_topology.with_partitioner(&self.components.key_partitioner)?);

        let local = self.transport.address();
        if let Some(local) = &local {
            let was_member = old_topology.as_ref().is_some_and(|old| old.contains(local));
            if new_topology.contains(local) && !was_member {
                trace!(cache = %self.cache_name, topology_id, "First topology in which the local node is a member");
                self.components.inbound.set_first_topology_as_member(topology_id);
            }
        }
        let rebalance_id = new_topology.rebalance_id();
        let phase = new_topology.phase();

        self.components.notifier.notify_topology_changed(
            old_topology.as_deref(),
            &new_topology,
            topology_id,
            true,
        );

        *self.topology.write() = Some(new_topology.clone());

        let (consumed, provided) = tokio::join!(
            self.components.consumer.on_topology_update(&new_topology, is_rebalance),
            self.components.provider.on_topology_update(&new_topology, is_rebalance),
        );

        let failures: Vec<String> = [consumed, provided]
            .into_iter()
            .filter_map(|r| r.err())
            .map(|e| e.to_string())
            .collect();
        let failure = if failures.is_empty() {
            None
        } else {
            warn!(cache = %self.cache_name, topology_id, ?failures, "State transfer failed");
            Some(failures.join("; "))
        };

        if phase.is_rebalance() {
            trace!(cache = %self.cache_name, topology_id, rebalance_id, %phase, "Confirming rebalance phase");
            if let Err(e) = self
                .components
                .topology_manager
                .confirm_rebalance_phase(&self.cache_name, topology_id, rebalance_id, failure)
                .await
            {
                warn!(cache = %self.cache_name, topology_id, error = %e, "Failed to confirm rebalance phase");
            }
        }

        self.components.notifier.notify_topology_changed(
            old_topology.as_deref(),
            &new_topology,
            topology_id,
            false,
        );

        if !self.initial_transfer.is_released() && phase == Phase::NoRebalance {
            let joined = local
                .as_ref()
                .is_some_and(|l| new_topology.read_consistent_hash().members().contains(l));
            if joined && self.initial_transfer.release() {
                debug!(cache = %self.cache_name, topology_id, "Initial state transfer complete");
            }
        }

        self.components.partition_handling.on_topology_update(&new_topology);
        Ok(())
    }

    /// Block until the local node received its initial state.
    ///
    /// Returns immediately when the cache does not await initial transfer or
    /// when cluster-wide rebalancing is disabled.
    pub async fn wait_for_initial_state_transfer_to_complete(&self) -> Result<()> {
        if !self.config.state_transfer.await_initial_transfer {
            return Ok(());
        }

        let rebalancing_enabled = self
            .components
            .topology_manager
            .is_cache_rebalancing_enabled(&self.cache_name)
            .await
            .map_err(|e| Error::StateTransfer(e.to_string()))?;
        if !rebalancing_enabled {
            self.initial_transfer.release();
        }

        trace!(cache = %self.cache_name, "Waiting for initial state transfer to finish");
        let timeout = self.config.state_transfer.timeout;
        if !self.initial_transfer.wait(Some(timeout)).await {
            return Err(Error::StateTransfer(format!(
                "initial state transfer timed out for cache {} on {:?}",
                self.cache_name,
                self.transport.address()
            )));
        }
        Ok(())
    }

    /// Re-send a command routed with an outdated topology to the owners of
    /// its keys in the installed topology.
    ///
    /// The local node and `origin` are never targeted. Returns an empty map
    /// when no topology is installed, the command is current, or no other
    /// owner remains.
    pub async fn forward_command_if_needed<K: AsRef<[u8]>>(
        &self,
        command: &mut ReplicableCommand,
        affected_keys: &[K],
        origin: &Address,
    ) -> Result<HashMap<Address, Response>> {
        let Some(topology) = self.cache_topology() else {
            trace!(command = command.command.name(), "Not forwarding command, no topology installed");
            return Ok(HashMap::new());
        };

        let local_topology_id = topology.topology_id();
        trace!(
            command_topology_id = command.topology_id,
            local_topology_id,
            "Checking whether command must be forwarded"
        );
        if command.topology_id >= local_topology_id {
            return Ok(HashMap::new());
        }

        let mut targets = topology.write_owners(affected_keys);
        if let Some(local) = self.transport.address() {
            targets.remove(&local);
        }
        targets.remove(origin);
        if targets.is_empty() {
            return Ok(HashMap::new());
        }

        command.topology_id = local_topology_id;
        let targets: Vec<Address> = targets.into_iter().collect();
        debug!(command = command.command.name(), ?targets, "Forwarding command to new owners");

        let options = RpcOptions::new(ResponseMode::Asynchronous, self.config.remote_timeout)
            .with_deliver_order(DeliverOrder::None);
        self.transport.invoke_remotely(Some(targets.as_slice()), command, &options).await
    }

    /// Release waiters and leave the cluster.
    pub async fn stop(&self) -> Result<()> {
        trace!(cache = %self.cache_name, address = ?self.transport.address(), "Shutting down state transfer manager");
        self.initial_transfer.release();
        self.components
            .topology_manager
            .leave(&self.cache_name, self.config.remote_timeout)
            .await
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    /// Whether a topology has been installed.
    pub fn is_join_complete(&self) -> bool {
        self.topology.read().is_some()
    }

    /// Currently installed topology.
    pub fn cache_topology(&self) -> Option<Arc<CacheTopology>> {
        self.topology.read().clone()
    }

    pub fn persistent_state_checksum(&self) -> Option<u32> {
        *self.persistent_state_checksum.read()
    }

    pub fn is_initial_transfer_complete(&self) -> bool {
        self.initial_transfer.is_released()
    }

    pub async fn rebalancing_status(&self) -> Result<RebalancingStatus> {
        self.components
            .topology_manager
            .rebalancing_status(&self.cache_name)
            .await
    }

    pub fn is_state_transfer_in_progress(&self) -> bool {
        self.components.consumer.is_state_transfer_in_progress()
    }

    pub fn is_state_transfer_in_progress_for_key(&self, key: &[u8]) -> bool {
        self.components.consumer.is_state_transfer_in_progress_for_key(key)
    }

    pub fn owns_data(&self) -> bool {
        self.components.consumer.owns_data()
    }

    pub fn first_topology_as_member(&self) -> i32 {
        self.components.inbound.first_topology_as_member()
    }
}

impl fmt::Debug for StateTransferManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateTransferManager")
            .field("cache_name", &self.cache_name)
            .field("address", &self.transport.address())
            .field(
                "topology_id",
                &self.topology.read().as_ref().map(|t| t.topology_id()),
            )
            .finish()
    }
}

/// Routes coordinator callbacks into the manager without keeping it alive.
struct TopologyHandler {
    manager: Weak<StateTransferManager>,
}

#[async_trait::async_trait]
impl CacheTopologyHandler for TopologyHandler {
    async fn update_consistent_hash(&self, topology: CacheTopology) -> Result<()> {
        match self.manager.upgrade() {
            Some(manager) => manager.do_topology_update(topology, false).await,
            None => Ok(()),
        }
    }

    async fn rebalance(&self, topology: CacheTopology) -> Result<()> {
        match self.manager.upgrade() {
            Some(manager) => manager.do_topology_update(topology, true).await,
            None => Ok(()),
        }
    }
}

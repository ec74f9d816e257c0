//! Components the state transfer manager coordinates but does not own.

use crate::error::Result;
use crate::topology::{CacheJoinInfo, CacheTopology, RebalancingStatus, ScopedPersistentState};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Node-local view of the cluster-wide topology coordinator.
#[async_trait::async_trait]
pub trait LocalTopologyManager: Send + Sync {
    /// Join `cache_name`. Topology updates for the cache are delivered to
    /// `handler` from now on; the initial topology is returned if the
    /// coordinator already has one.
    async fn join(
        &self,
        cache_name: &str,
        join_info: CacheJoinInfo,
        handler: Arc<dyn CacheTopologyHandler>,
        partition_handling: Arc<dyn PartitionHandlingManager>,
    ) -> Result<Option<CacheTopology>>;

    async fn leave(&self, cache_name: &str, timeout: Duration) -> Result<()>;

    /// Tell the coordinator this node finished the given rebalance phase.
    /// `error` carries the local migration failure, if any.
    async fn confirm_rebalance_phase(
        &self,
        cache_name: &str,
        topology_id: i32,
        rebalance_id: i32,
        error: Option<String>,
    ) -> Result<()>;

    async fn is_cache_rebalancing_enabled(&self, cache_name: &str) -> Result<bool>;

    async fn rebalancing_status(&self, cache_name: &str) -> Result<RebalancingStatus>;

    /// Identity of this node that survives restarts.
    fn persistent_uuid(&self) -> Uuid;
}

/// Receives topology updates for one cache.
#[async_trait::async_trait]
pub trait CacheTopologyHandler: Send + Sync {
    /// A topology change that is not part of a rebalance.
    async fn update_consistent_hash(&self, topology: CacheTopology) -> Result<()>;

    /// A topology that starts or advances a rebalance.
    async fn rebalance(&self, topology: CacheTopology) -> Result<()>;
}

/// Pulls the segments this node gains in a topology.
#[async_trait::async_trait]
pub trait StateConsumer: Send + Sync {
    /// Resolves once inbound transfers for `topology` are done.
    async fn on_topology_update(&self, topology: &CacheTopology, is_rebalance: bool) -> Result<()>;

    fn is_state_transfer_in_progress(&self) -> bool;

    fn is_state_transfer_in_progress_for_key(&self, key: &[u8]) -> bool;

    /// Whether this node holds data for the cache.
    fn owns_data(&self) -> bool;
}

/// Serves the segments other nodes gain in a topology.
#[async_trait::async_trait]
pub trait StateProvider: Send + Sync {
    /// Resolves once outbound transfers for `topology` are set up.
    async fn on_topology_update(&self, topology: &CacheTopology, is_rebalance: bool) -> Result<()>;
}

/// Local persistent store of node-level state.
pub trait GlobalStateManager: Send + Sync {
    /// State persisted for `scope` by a previous run, if any.
    fn read_scoped_state(&self, scope: &str) -> Option<ScopedPersistentState>;
}

/// Decides availability when the cluster splits.
pub trait PartitionHandlingManager: Send + Sync {
    fn on_topology_update(&self, topology: &CacheTopology);
}

/// Cache-level listener notifications.
pub trait CacheNotifier: Send + Sync {
    /// Called once before (`pre`) and once after a topology is installed.
    fn notify_topology_changed(
        &self,
        old: Option<&CacheTopology>,
        new: &CacheTopology,
        topology_id: i32,
        pre: bool,
    );
}

/// Partition handling that never degrades availability.
pub struct NoOpPartitionHandling;

impl PartitionHandlingManager for NoOpPartitionHandling {
    fn on_topology_update(&self, _topology: &CacheTopology) {}
}

/// Notifier that logs topology changes.
pub struct LoggingCacheNotifier;

impl CacheNotifier for LoggingCacheNotifier {
    fn notify_topology_changed(
        &self,
        old: Option<&CacheTopology>,
        new: &CacheTopology,
        topology_id: i32,
        pre: bool,
    ) {
        tracing::debug!(
            topology_id,
            pre,
            old_topology_id = old.map(|t| t.topology_id()),
            phase = %new.phase(),
            "Topology changed"
        );
    }
}

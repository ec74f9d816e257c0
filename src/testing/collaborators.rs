//! Recording implementations of the state transfer collaborators.

use crate::cluster::CacheManagerNotifier;
use crate::error::{Error, Result};
use crate::statetransfer::{
    CacheNotifier, GlobalStateManager, PartitionHandlingManager, StateConsumer, StateProvider,
};
use crate::topology::{CacheTopology, ScopedPersistentState};
use crate::types::Address;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Barrier;

/// Shared behaviour of the recording consumer and provider.
#[derive(Default)]
struct TransferScript {
    updates: Mutex<Vec<(i32, bool)>>,
    failure: Mutex<Option<String>>,
    barrier: Mutex<Option<Arc<Barrier>>>,
    in_progress: AtomicBool,
}

impl TransferScript {
    async fn run(&self, topology: &CacheTopology, is_rebalance: bool) -> Result<()> {
        self.in_progress.store(true, Ordering::SeqCst);
        self.updates
            .lock()
            .push((topology.topology_id(), is_rebalance));

        let barrier = self.barrier.lock().clone();
        if let Some(barrier) = barrier {
            barrier.wait().await;
        }

        self.in_progress.store(false, Ordering::SeqCst);
        match self.failure.lock().clone() {
            Some(reason) => Err(Error::StateTransfer(reason)),
            None => Ok(()),
        }
    }
}

/// State consumer that records the topologies it is handed.
#[derive(Default)]
pub struct RecordingConsumer {
    script: TransferScript,
    owns_data: AtomicBool,
    keys_in_transfer: Mutex<Vec<Vec<u8>>>,
}

impl RecordingConsumer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// (topology id, is rebalance) of every update received.
    pub fn updates(&self) -> Vec<(i32, bool)> {
        self.script.updates.lock().clone()
    }

    /// Fail every following update with `reason`.
    pub fn fail_with(&self, reason: impl Into<String>) {
        *self.script.failure.lock() = Some(reason.into());
    }

    /// Wait on `barrier` during every following update.
    pub fn wait_on(&self, barrier: Arc<Barrier>) {
        *self.script.barrier.lock() = Some(barrier);
    }

    pub fn set_owns_data(&self, owns_data: bool) {
        self.owns_data.store(owns_data, Ordering::SeqCst);
    }

    pub fn mark_key_in_transfer(&self, key: &[u8]) {
        self.keys_in_transfer.lock().push(key.to_vec());
    }
}

#[async_trait::async_trait]
impl StateConsumer for RecordingConsumer {
    async fn on_topology_update(&self, topology: &CacheTopology, is_rebalance: bool) -> Result<()> {
        self.script.run(topology, is_rebalance).await
    }

    fn is_state_transfer_in_progress(&self) -> bool {
        self.script.in_progress.load(Ordering::SeqCst) || !self.keys_in_transfer.lock().is_empty()
    }

    fn is_state_transfer_in_progress_for_key(&self, key: &[u8]) -> bool {
        self.keys_in_transfer.lock().iter().any(|k| k == key)
    }

    fn owns_data(&self) -> bool {
        self.owns_data.load(Ordering::SeqCst)
    }
}

/// State provider that records the topologies it is handed.
#[derive(Default)]
pub struct RecordingProvider {
    script: TransferScript,
}

impl RecordingProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn updates(&self) -> Vec<(i32, bool)> {
        self.script.updates.lock().clone()
    }

    pub fn fail_with(&self, reason: impl Into<String>) {
        *self.script.failure.lock() = Some(reason.into());
    }

    pub fn wait_on(&self, barrier: Arc<Barrier>) {
        *self.script.barrier.lock() = Some(barrier);
    }
}

#[async_trait::async_trait]
impl StateProvider for RecordingProvider {
    async fn on_topology_update(&self, topology: &CacheTopology, is_rebalance: bool) -> Result<()> {
        self.script.run(topology, is_rebalance).await
    }
}

/// One topology notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyNotification {
    pub old_topology_id: Option<i32>,
    pub topology_id: i32,
    pub pre: bool,
}

/// Cache notifier that records topology notifications.
#[derive(Default)]
pub struct RecordingCacheNotifier {
    events: Mutex<Vec<TopologyNotification>>,
}

impl RecordingCacheNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<TopologyNotification> {
        self.events.lock().clone()
    }
}

impl CacheNotifier for RecordingCacheNotifier {
    fn notify_topology_changed(
        &self,
        old: Option<&CacheTopology>,
        _new: &CacheTopology,
        topology_id: i32,
        pre: bool,
    ) {
        self.events.lock().push(TopologyNotification {
            old_topology_id: old.map(|t| t.topology_id()),
            topology_id,
            pre,
        });
    }
}

/// Partition handling that records the topologies it is told about.
#[derive(Default)]
pub struct RecordingPartitionHandling {
    topology_ids: Mutex<Vec<i32>>,
}

impl RecordingPartitionHandling {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn topology_ids(&self) -> Vec<i32> {
        self.topology_ids.lock().clone()
    }
}

impl PartitionHandlingManager for RecordingPartitionHandling {
    fn on_topology_update(&self, topology: &CacheTopology) {
        self.topology_ids.lock().push(topology.topology_id());
    }
}

/// Global state kept in memory.
#[derive(Default)]
pub struct InMemoryGlobalState {
    scopes: Mutex<HashMap<String, ScopedPersistentState>>,
}

impl InMemoryGlobalState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn write_scoped_state(&self, state: ScopedPersistentState) {
        self.scopes.lock().insert(state.scope().to_string(), state);
    }
}

impl GlobalStateManager for InMemoryGlobalState {
    fn read_scoped_state(&self, scope: &str) -> Option<ScopedPersistentState> {
        self.scopes.lock().get(scope).cloned()
    }
}

/// A view notification received by [`RecordingViewNotifier`].
#[derive(Debug, Clone, PartialEq)]
pub struct ViewNotification {
    pub members: Vec<Address>,
    pub old_members: Vec<Address>,
    pub local: Option<Address>,
    pub view_id: i64,
    pub subgroups: Option<Vec<Vec<Address>>>,
}

/// Cache-manager notifier that records view notifications.
#[derive(Default)]
pub struct RecordingViewNotifier {
    events: Mutex<Vec<ViewNotification>>,
}

impl RecordingViewNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<ViewNotification> {
        self.events.lock().clone()
    }
}

impl CacheManagerNotifier for RecordingViewNotifier {
    fn notify_view_change(
        &self,
        members: &[Address],
        old_members: &[Address],
        local: Option<&Address>,
        view_id: i64,
    ) {
        self.events.lock().push(ViewNotification {
            members: members.to_vec(),
            old_members: old_members.to_vec(),
            local: local.cloned(),
            view_id,
            subgroups: None,
        });
    }

    fn notify_merge(
        &self,
        members: &[Address],
        old_members: &[Address],
        local: Option<&Address>,
        view_id: i64,
        subgroups: &[Vec<Address>],
    ) {
        self.events.lock().push(ViewNotification {
            members: members.to_vec(),
            old_members: old_members.to_vec(),
            local: local.cloned(),
            view_id,
            subgroups: Some(subgroups.to_vec()),
        });
    }
}

use crate::cluster::NoopNotifier;
use crate::config::{CacheConfig, GlobalConfig};
use crate::partitioning::{GroupingPartitioner, HashPartitioner, HashTagGrouper, KeyPartitioner};
use crate::statetransfer::{GlobalStateManager, PerCacheInboundHandler, StateTransferComponents, StateTransferManager};
use crate::testing::{
    LocalChannel, LocalGroup, RecordingCacheNotifier, RecordingConsumer, RecordingPartitionHandling,
    RecordingProvider, TestTopologyCoordinator,
};
use crate::transport::Transport;
use crate::types::Address;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub(crate) const CACHE_NAME: &str = "orders";

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// Poll `condition` until it holds or `timeout` elapses.
pub(crate) async fn wait_for<F>(condition: F, timeout: Duration) -> bool
where
    F: Fn() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Connect a transport for `name` on `group`.
pub(crate) async fn connect_transport(group: &Arc<LocalGroup>, name: &str) -> (Arc<LocalChannel>, Arc<Transport>) {
    let channel = group.channel(name);
    let transport = Transport::new(
        GlobalConfig::new("test-cluster").with_connect_timeout(Duration::from_secs(5)),
        channel.clone(),
        Arc::new(NoopNotifier),
    );
    transport.start().await.unwrap();
    (channel, transport)
}

/// One node of a test cluster running a single cache.
pub(crate) struct TestNode {
    pub address: Address,
    pub transport: Arc<Transport>,
    pub manager: Arc<StateTransferManager>,
    pub consumer: Arc<RecordingConsumer>,
    pub provider: Arc<RecordingProvider>,
    pub notifier: Arc<RecordingCacheNotifier>,
    pub partition_handling: Arc<RecordingPartitionHandling>,
}

impl TestNode {
    /// Connect a node and build its state transfer manager without joining the cache.
    pub(crate) async fn create(
        group: &Arc<LocalGroup>,
        coordinator: &Arc<TestTopologyCoordinator>,
        name: &str,
        config: CacheConfig,
    ) -> Self {
        Self::create_with(group, coordinator, name, config, GlobalConfig::new("test-cluster"), None).await
    }

    /// Like [`TestNode::create`] with explicit node settings and global state.
    pub(crate) async fn create_with(
        group: &Arc<LocalGroup>,
        coordinator: &Arc<TestTopologyCoordinator>,
        name: &str,
        config: CacheConfig,
        global: GlobalConfig,
        global_state: Option<Arc<dyn GlobalStateManager>>,
    ) -> Self {
        let (_, transport) = connect_transport(group, name).await;
        let address = transport.address().unwrap();

        let consumer = RecordingConsumer::new();
        let provider = RecordingProvider::new();
        let notifier = RecordingCacheNotifier::new();
        let partition_handling = RecordingPartitionHandling::new();

        let inner: Arc<dyn KeyPartitioner> = Arc::new(HashPartitioner::new(
            config.hash.hash_function,
            config.hash.num_segments,
        ));
        let key_partitioner: Arc<dyn KeyPartitioner> =
            Arc::new(GroupingPartitioner::new(inner, vec![Arc::new(HashTagGrouper)]));

        let components = StateTransferComponents {
            topology_manager: coordinator.manager_for(address.clone()),
            consumer: consumer.clone(),
            provider: provider.clone(),
            partition_handling: partition_handling.clone(),
            notifier: notifier.clone(),
            global_state,
            key_partitioner,
            inbound: Arc::new(PerCacheInboundHandler::new()),
        };

        let manager = StateTransferManager::new(
            CACHE_NAME,
            global,
            config,
            transport.clone(),
            components,
        );

        Self {
            address,
            transport,
            manager,
            consumer,
            provider,
            notifier,
            partition_handling,
        }
    }

    /// Connect a node and join the cache.
    pub(crate) async fn start(
        group: &Arc<LocalGroup>,
        coordinator: &Arc<TestTopologyCoordinator>,
        name: &str,
        config: CacheConfig,
    ) -> Self {
        let node = Self::create(group, coordinator, name, config).await;
        node.manager.start().await.unwrap();
        node
    }

    pub(crate) fn topology_id(&self) -> Option<i32> {
        self.manager.cache_topology().map(|t| t.topology_id())
    }
}

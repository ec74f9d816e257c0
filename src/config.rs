//! Configuration types for the data grid core.

use crate::partitioning::HashFunction;
use crate::topology::ConsistentHashFactory;
use crate::types::{CacheMode, TopologyLocation};
use std::time::Duration;

/// Node-wide configuration shared by every cache.
#[derive(Debug, Clone)]
pub struct GlobalConfig {
    /// Name of the group to join.
    pub cluster_name: String,

    /// Logical node name. A random suffix is appended when connecting.
    pub node_name: Option<String>,

    /// Whether this node stores no data (zero capacity for every cache).
    pub zero_capacity_node: bool,

    /// Site this node runs in.
    pub site_id: Option<String>,

    /// Rack this node runs in.
    pub rack_id: Option<String>,

    /// Machine this node runs on.
    pub machine_id: Option<String>,

    /// Maximum time to wait for the first view after connecting.
    pub connect_timeout: Duration,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            cluster_name: "datagrid".to_string(),
            node_name: None,
            zero_capacity_node: false,
            site_id: None,
            rack_id: None,
            machine_id: None,
            connect_timeout: Duration::from_secs(60),
        }
    }
}

impl GlobalConfig {
    /// Create a configuration for the given cluster.
    pub fn new(cluster_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            ..Default::default()
        }
    }

    /// Set the logical node name.
    pub fn with_node_name(mut self, name: impl Into<String>) -> Self {
        self.node_name = Some(name.into());
        self
    }

    /// Mark this node as a zero-capacity (non-data) node.
    pub fn with_zero_capacity(mut self, zero_capacity: bool) -> Self {
        self.zero_capacity_node = zero_capacity;
        self
    }

    /// Set the topology location of this node.
    pub fn with_location(
        mut self,
        site_id: Option<String>,
        rack_id: Option<String>,
        machine_id: Option<String>,
    ) -> Self {
        self.site_id = site_id;
        self.rack_id = rack_id;
        self.machine_id = machine_id;
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Whether the transport advertises topology (site/rack/machine) information.
    pub fn has_topology_info(&self) -> bool {
        self.site_id.is_some() || self.rack_id.is_some() || self.machine_id.is_some()
    }

    /// Topology location built from the site/rack/machine ids.
    pub fn location(&self) -> TopologyLocation {
        TopologyLocation::new(
            self.site_id.clone(),
            self.rack_id.clone(),
            self.machine_id.clone(),
        )
    }
}

/// Per-cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Clustering mode.
    pub mode: CacheMode,

    /// Consistent hash settings.
    pub hash: HashConfig,

    /// State transfer settings.
    pub state_transfer: StateTransferConfig,

    /// Transaction settings.
    pub transaction: TransactionConfig,

    /// Timeout for remote calls made on behalf of this cache.
    pub remote_timeout: Duration,

    /// Timeout for synchronous replication.
    pub sync_repl_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            mode: CacheMode::DistSync,
            hash: HashConfig::default(),
            state_transfer: StateTransferConfig::default(),
            transaction: TransactionConfig::default(),
            remote_timeout: Duration::from_secs(15),
            sync_repl_timeout: Duration::from_secs(15),
        }
    }
}

impl CacheConfig {
    /// Create a configuration for the given cache mode.
    pub fn new(mode: CacheMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    /// Set hash configuration.
    pub fn with_hash(mut self, hash: HashConfig) -> Self {
        self.hash = hash;
        self
    }

    /// Set the number of owners per segment.
    pub fn with_num_owners(mut self, num_owners: usize) -> Self {
        self.hash.num_owners = num_owners;
        self
    }

    /// Set the number of segments.
    pub fn with_num_segments(mut self, num_segments: usize) -> Self {
        self.hash.num_segments = num_segments;
        self
    }

    /// Set state transfer configuration.
    pub fn with_state_transfer(mut self, state_transfer: StateTransferConfig) -> Self {
        self.state_transfer = state_transfer;
        self
    }

    /// Set the transaction protocol.
    pub fn with_transaction_protocol(mut self, protocol: TransactionProtocol) -> Self {
        self.transaction.protocol = protocol;
        self
    }

    /// Set the remote call timeout.
    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    /// Set the synchronous replication timeout.
    pub fn with_sync_repl_timeout(mut self, timeout: Duration) -> Self {
        self.sync_repl_timeout = timeout;
        self
    }
}

/// Consistent hash configuration.
#[derive(Debug, Clone)]
pub struct HashConfig {
    /// Number of copies of each entry.
    pub num_owners: usize,

    /// Number of keyspace segments.
    pub num_segments: usize,

    /// Relative share of segments this node should own.
    pub capacity_factor: f32,

    /// Hash function routing keys to segments.
    pub hash_function: HashFunction,

    /// Explicit factory, bypassing selection by cache mode.
    pub consistent_hash_factory: Option<ConsistentHashFactory>,
}

impl Default for HashConfig {
    fn default() -> Self {
        Self {
            num_owners: 2,
            num_segments: 256,
            capacity_factor: 1.0,
            hash_function: HashFunction::default(),
            consistent_hash_factory: None,
        }
    }
}

impl HashConfig {
    /// Set the capacity factor.
    pub fn with_capacity_factor(mut self, capacity_factor: f32) -> Self {
        self.capacity_factor = capacity_factor;
        self
    }

    /// Force a specific consistent hash factory.
    pub fn with_factory(mut self, factory: ConsistentHashFactory) -> Self {
        self.consistent_hash_factory = Some(factory);
        self
    }
}

/// State transfer configuration.
#[derive(Debug, Clone)]
pub struct StateTransferConfig {
    /// Maximum time for the initial state transfer (and join) to complete.
    pub timeout: Duration,

    /// Whether cache startup waits for the initial state transfer.
    pub await_initial_transfer: bool,
}

impl Default for StateTransferConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(240),
            await_initial_transfer: true,
        }
    }
}

impl StateTransferConfig {
    /// Set the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enable or disable waiting for the initial transfer.
    pub fn with_await_initial_transfer(mut self, await_initial_transfer: bool) -> Self {
        self.await_initial_transfer = await_initial_transfer;
        self
    }
}

/// Transaction configuration.
#[derive(Debug, Clone, Default)]
pub struct TransactionConfig {
    /// Commit protocol.
    pub protocol: TransactionProtocol,
}

/// Commit protocol for transactional caches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransactionProtocol {
    /// Two-phase commit over ordinary broadcast.
    #[default]
    Default,
    /// Prepare is delivered through totally-ordered broadcast.
    TotalOrder,
}

impl TransactionProtocol {
    pub fn is_total_order(&self) -> bool {
        matches!(self, TransactionProtocol::TotalOrder)
    }
}

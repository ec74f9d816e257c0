//! State transfer: joining a cache and installing topology transitions.
//!
//! # Topology installation
//!
//! ```text
//! coordinator ──update/rebalance──▶ do_topology_update
//!                                      │ 1. reject topology id regression
//!                                      │ 2. record first topology as member
//!                                      │ 3. attach key partitioner
//!                                      │ 4. notify (pre)
//!                                      │ 5. consumer ║ provider   (joined)
//!                                      │ 6. confirm phase (rebalance phases only)
//!                                      │ 7. notify (post)
//!                                      │ 8. release initial-transfer gate
//!                                      ▼ 9. partition handling
//! ```

mod collaborators;
mod inbound;
mod manager;

pub use collaborators::{
    CacheNotifier, CacheTopologyHandler, GlobalStateManager, LocalTopologyManager,
    LoggingCacheNotifier, NoOpPartitionHandling, PartitionHandlingManager, StateConsumer,
    StateProvider,
};
pub use inbound::PerCacheInboundHandler;
pub use manager::{StateTransferComponents, StateTransferManager};

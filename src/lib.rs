//! Cluster core of a distributed in-memory data grid.
//!
//! This crate provides the pieces a grid node needs to take part in a cluster:
//! - **Transport** over a group-communication channel: membership tracking,
//!   coordinator identity and remote invocation with per-call response modes
//! - **Topology model**: consistent hashes, rebalance phases and the cache
//!   topology a node installs
//! - **State transfer coordination**: joining a cache, installing topologies
//!   in order and confirming rebalance phases
//! - **Total order replication**: broadcasting transaction prepares through
//!   a totally-ordered channel
//!
//! # Example
//!
//! ```rust,ignore
//! use datagrid::{CacheConfig, CacheMode, GlobalConfig, StateTransferManager, Transport};
//! use std::sync::Arc;
//!
//! let transport = Transport::new(GlobalConfig::new("grid"), channel, notifier);
//! transport.start().await?;
//!
//! let manager = StateTransferManager::new(
//!     "orders",
//!     GlobalConfig::new("grid"),
//!     CacheConfig::new(CacheMode::DistSync).with_num_owners(2),
//!     transport.clone(),
//!     components,
//! );
//! manager.start().await?;
//! manager.wait_for_initial_state_transfer_to_complete().await?;
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │         Cache (outside this crate)          │
//! └─────────────────────────────────────────────┘
//!            │                      │
//!            ▼                      ▼
//! ┌─────────────────────┐  ┌──────────────────────┐
//! │ StateTransferManager│  │ TotalOrderReplicator │
//! │  • join / leave     │  │  • broadcast_prepare │
//! │  • topology updates │  └──────────────────────┘
//! │  • forwarding       │             │
//! └─────────────────────┘             │
//!      │           │                  │
//!      ▼           ▼                  ▼
//! ┌──────────┐ ┌─────────────────────────────────┐
//! │ Topology │ │            Transport            │
//! │  model   │ │  • membership  • invoke_remotely│
//! └──────────┘ └─────────────────────────────────┘
//!                            │
//!                            ▼
//!                    GroupChannel (group layer)
//! ```
//!
//! # Consistency Model
//!
//! - **Topologies**: installed in strictly non-decreasing id order per cache
//! - **Rebalances**: every phase is confirmed by every member before the
//!   coordinator moves on
//! - **Total order**: every member delivers prepares in the same order

pub mod cluster;
pub mod commands;
pub mod config;
pub mod error;
pub mod gate;
pub mod partitioning;
pub mod replication;
pub mod statetransfer;
pub mod testing;
pub mod topology;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use config::{CacheConfig, GlobalConfig, HashConfig, StateTransferConfig, TransactionProtocol};
pub use error::{ChannelError, Error, MembershipError, Result};
pub use types::{Address, CacheMode, TopologyLocation};

// Re-export transport types
pub use transport::{
    DeliverOrder, GroupChannel, MembershipListener, Response, ResponseMode, RpcOptions, Transport,
};

// Re-export topology types
pub use topology::{CacheTopology, ConsistentHash, ConsistentHashFactory, Phase, View};

// Re-export state transfer types
pub use statetransfer::{StateTransferComponents, StateTransferManager};

// Re-export replication types
pub use commands::{CacheCommand, GlobalTransaction, PrepareCommand, ReplicableCommand};
pub use replication::{TotalOrderReplicator, TransactionTable};

// Re-export cluster types
pub use cluster::{CacheManagerNotifier, ViewChangeEvent};

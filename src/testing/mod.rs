//! Testing utilities for the data grid core.
//!
//! This module provides in-memory stand-ins for everything outside the crate
//! so the transport, the state transfer coordinator and the total order
//! replicator can be exercised end to end:
//! - an in-memory group layer with fault injection
//! - a topology coordinator driving rebalances through their phases
//! - recording consumers, providers and notifiers
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Testing Framework                          │
//! │                                                                 │
//! │  ┌──────────────┐   views/messages   ┌──────────────────────┐   │
//! │  │  LocalGroup  │ ─────────────────▶ │ LocalChannel (1/node)│   │
//! │  │  - faults    │                    └──────────┬───────────┘   │
//! │  │  - sequencer │                               │               │
//! │  └──────────────┘                               ▼               │
//! │                                          Transport (1/node)     │
//! │                                                                 │
//! │  ┌─────────────────────────┐  join/confirm  ┌────────────────┐  │
//! │  │ TestTopologyCoordinator │ ◀────────────▶ │ StateTransfer  │  │
//! │  │  - phase progression    │  update/       │ Manager        │  │
//! │  │  - confirmations        │  rebalance     └────────────────┘  │
//! │  └─────────────────────────┘                                    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

mod collaborators;
mod local_group;
mod topology_coordinator;

#[cfg(test)]
mod utils;

mod state_transfer_tests;

pub use collaborators::{
    InMemoryGlobalState, RecordingCacheNotifier, RecordingConsumer, RecordingPartitionHandling,
    RecordingProvider, RecordingViewNotifier, TopologyNotification, ViewNotification,
};
pub use local_group::{InboundHandler, LocalChannel, LocalGroup, NodeFault};
pub use topology_coordinator::{Confirmation, TestTopologyCoordinator, TestTopologyManager};

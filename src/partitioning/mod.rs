//! Partitioning module for distributing keys across cluster nodes.
//!
//! Keys are routed to a fixed number of segments by a [`KeyPartitioner`];
//! segments are the unit of ownership and transfer. Segment owners are placed
//! by walking a [`HashRing`] of capacity-weighted virtual nodes.
//!
//! # Architecture
//!
//! ```text
//! key "user:{42}:cart"
//!        │
//!        ▼
//! ┌──────────────────────┐   group key "42"   ┌───────────────────┐
//! │ GroupingPartitioner  │ ─────────────────▶ │  HashPartitioner  │ ─▶ segment 17
//! └──────────────────────┘                    └───────────────────┘
//!                                                       │
//!                                                       ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         HashRing                            │
//! │  segment 17 position → VN(A) → VN(C) → VN(A) → VN(B) ...    │
//! │  owners = [A, C]   (num_owners = 2)                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod hashring;
mod partitioner;

pub use hashring::{HashRing, DEFAULT_VNODES_PER_NODE};
pub use partitioner::{
    Grouper, GroupingPartitioner, HashFunction, HashPartitioner, HashTagGrouper, KeyPartitioner,
};

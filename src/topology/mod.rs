//! Topology model: immutable values describing membership and ownership.
//!
//! A [`View`] is what the group channel reports; a [`CacheTopology`] is what the
//! topology coordinator computes from it for one cache. Each topology holds up
//! to three [`ConsistentHash`]es while a rebalance moves through its phases:
//!
//! ```text
//!   NO_REBALANCE ──▶ READ_OLD_WRITE_ALL ──▶ READ_ALL_WRITE_ALL ──▶ READ_NEW_WRITE_ALL ──▶ NO_REBALANCE
//!   (current)        (current + pending,    (reads from union)     (reads from pending)    (pending
//!                     writes to union)                                                      becomes current)
//! ```
//!
//! None of these types is mutated after construction; transitions replace the
//! whole value.

mod cache_topology;
mod hash;
mod join_info;
mod persistent_state;
mod view;

pub use cache_topology::{CacheTopology, Phase};
pub use hash::{ConsistentHash, ConsistentHashFactory};
pub use join_info::{CacheJoinInfo, RebalancingStatus};
pub use persistent_state::ScopedPersistentState;
pub use view::View;

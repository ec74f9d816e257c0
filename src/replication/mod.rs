//! Replication of transaction prepares.
//!
//! Prepares flagged for total order rely on the group layer to deliver them in
//! the same sequence everywhere, including back to the originator. The
//! originator therefore never waits for acknowledgements; on synchronous
//! caches it waits for its own local delivery instead.

mod total_order;
mod transaction;

pub use total_order::{TotalOrderReplicator, TxInvocationContext};
pub use transaction::{LocalTransaction, TransactionTable};

//! Cluster transport: membership tracking and remote command fan-out.
//!
//! # Architecture
//!
//! ```text
//!                       ┌──────────────────────────┐
//!   invoke_remotely ──▶ │        Transport         │ ──▶ CacheManagerNotifier
//!                       │  membership snapshot     │      (view / merge)
//!                       │  first-view gate         │
//!                       └────────────┬─────────────┘
//!                         send │     ▲ view_accepted
//!                              ▼     │
//!                       ┌──────────────────────────┐
//!                       │       GroupChannel       │  (external group layer)
//!                       └──────────────────────────┘
//! ```
//!
//! Response modes map onto channel delivery modes:
//!
//! | response mode | delivery | leavers |
//! |---|---|---|
//! | `Asynchronous`, `AsynchronousWithSyncMarshalling` | `GetNone` | n/a |
//! | `Synchronous` | `GetAll` | must be members |
//! | `SynchronousIgnoreLeavers` | `GetAll` | ignored |
//! | `WaitForValidResponse` | `GetFirst` | ignored |

pub mod channel;
mod group;
pub mod rpc;

pub use channel::{
    DeliveryMode, GroupChannel, MembershipListener, NodeOutcome, NodeResponse, SendOptions,
};
pub use group::Transport;
pub use rpc::{
    BincodeMarshaller, DeliverOrder, Marshaller, Response, ResponseFilter, ResponseMode,
    RpcOptions,
};

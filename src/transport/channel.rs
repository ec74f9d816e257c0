//! Boundary to the group-communication layer.
//!
//! The group layer detects membership, installs views and delivers messages
//! reliably; this crate only consumes those primitives through
//! [`GroupChannel`] and [`MembershipListener`].

use crate::error::Result;
use crate::topology::View;
use crate::transport::rpc::{DeliverOrder, ResponseFilter};
use crate::types::Address;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// How many responses the channel waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryMode {
    /// Return as soon as the message is handed off.
    GetNone,
    /// Wait for every recipient.
    GetAll,
    /// Wait for the first acceptable response.
    GetFirst,
}

/// Delivery options for one message.
#[derive(Clone)]
pub struct SendOptions {
    pub delivery: DeliveryMode,
    /// Per-recipient response deadline.
    pub timeout: Duration,
    /// Out-of-band delivery.
    pub oob: bool,
    /// Send point-to-point to each target instead of multicasting.
    pub anycast: bool,
    /// Marshal the payload off the calling task.
    pub async_marshalling: bool,
    pub support_replay: bool,
    pub deliver_order: DeliverOrder,
    pub filter: Option<Arc<dyn ResponseFilter>>,
}

impl fmt::Debug for SendOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendOptions")
            .field("delivery", &self.delivery)
            .field("timeout", &self.timeout)
            .field("oob", &self.oob)
            .field("anycast", &self.anycast)
            .field("async_marshalling", &self.async_marshalling)
            .field("support_replay", &self.support_replay)
            .field("deliver_order", &self.deliver_order)
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

/// What happened at one recipient of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOutcome {
    Value(Bytes),
    Exception(String),
    /// The recipient left the group before responding.
    Suspected,
    /// No response arrived before the deadline.
    NotReceived,
}

/// Outcome of one recipient, tagged with its address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeResponse {
    pub sender: Address,
    pub outcome: NodeOutcome,
}

impl NodeResponse {
    pub fn new(sender: Address, outcome: NodeOutcome) -> Self {
        Self { sender, outcome }
    }
}

/// Receives membership callbacks from the group layer.
///
/// Callbacks run on a task owned by the group layer and must not block.
pub trait MembershipListener: Send + Sync {
    /// A new view was installed.
    fn view_accepted(&self, view: View);

    /// A member is suspected of having failed.
    fn suspect(&self, _member: &Address) {}

    /// The group is about to flush; senders should pause.
    fn block(&self) {}

    /// The flush completed.
    fn unblock(&self) {}
}

/// Group-communication channel.
#[async_trait::async_trait]
pub trait GroupChannel: Send + Sync {
    /// Join the group, registering `listener` for membership callbacks.
    async fn connect(&self, cluster_name: &str, listener: Arc<dyn MembershipListener>) -> Result<()>;

    /// Whether the channel is currently joined.
    fn is_connected(&self) -> bool;

    /// Address of the local member, once known.
    fn address(&self) -> Option<Address>;

    /// Latest view installed by the group layer.
    fn view(&self) -> Option<View>;

    /// Set the logical name used for the next connect.
    fn set_name(&self, name: &str);

    /// Send `payload` to `targets`, or to every member when `None`.
    ///
    /// Returns `None` when no responses are expected: either the delivery
    /// mode is [`DeliveryMode::GetNone`] or there was no remote recipient.
    async fn send(
        &self,
        targets: Option<&[Address]>,
        payload: Bytes,
        options: &SendOptions,
    ) -> Result<Option<Vec<NodeResponse>>>;

    /// Leave the group.
    async fn disconnect(&self);
}

//! RPC option and response types.

use crate::commands::ReplicableCommand;
use crate::error::Result;
use crate::transport::channel::DeliveryMode;
use crate::types::Address;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// How the caller of a remote invocation waits for responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseMode {
    /// Fire and forget; the payload is marshalled off the calling task.
    Asynchronous,
    /// Fire and forget; the payload is marshalled before returning.
    AsynchronousWithSyncMarshalling,
    /// Wait for all recipients. Recipients must be members.
    Synchronous,
    /// Wait for all recipients; recipients that leave are dropped.
    SynchronousIgnoreLeavers,
    /// Wait for the first valid response.
    WaitForValidResponse,
}

impl ResponseMode {
    pub fn is_asynchronous(&self) -> bool {
        matches!(
            self,
            ResponseMode::Asynchronous | ResponseMode::AsynchronousWithSyncMarshalling
        )
    }

    pub fn is_synchronous(&self) -> bool {
        !self.is_asynchronous()
    }

    /// Whether recipients that leave mid-call are silently dropped.
    pub fn ignore_leavers(&self) -> bool {
        matches!(
            self,
            ResponseMode::SynchronousIgnoreLeavers | ResponseMode::WaitForValidResponse
        )
    }

    /// Channel delivery mode this response mode maps to.
    pub fn delivery_mode(&self) -> DeliveryMode {
        match self {
            ResponseMode::Asynchronous | ResponseMode::AsynchronousWithSyncMarshalling => {
                DeliveryMode::GetNone
            }
            ResponseMode::Synchronous | ResponseMode::SynchronousIgnoreLeavers => {
                DeliveryMode::GetAll
            }
            ResponseMode::WaitForValidResponse => DeliveryMode::GetFirst,
        }
    }
}

/// Ordering guarantee requested for one message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum DeliverOrder {
    /// No ordering; may be delivered out of band.
    #[default]
    None,
    /// FIFO per sender.
    PerSender,
    /// Identical order on every member.
    Total,
}

/// Outcome reported by one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// The command ran and returned a (possibly empty) value.
    Value(Bytes),
    /// The command failed on the recipient.
    Exception(String),
}

impl Response {
    /// Whether this response counts towards a successful call.
    pub fn is_valid(&self) -> bool {
        matches!(self, Response::Value(_))
    }
}

/// Decides which responses a call accepts and when it may stop waiting.
pub trait ResponseFilter: Send + Sync {
    /// Whether `response` from `sender` is acceptable.
    fn is_acceptable(&self, response: &Response, sender: &Address) -> bool;

    /// Whether the call should keep waiting for further responses.
    fn need_more_responses(&self) -> bool;
}

/// Per-call invocation options.
#[derive(Clone)]
pub struct RpcOptions {
    pub mode: ResponseMode,
    pub timeout: Duration,
    /// Deliver out of band, bypassing regular ordering.
    pub use_priority_queue: bool,
    pub filter: Option<Arc<dyn ResponseFilter>>,
    /// Allow the receiver to replay the command after a topology change.
    pub support_replay: bool,
    pub deliver_order: DeliverOrder,
}

impl RpcOptions {
    pub fn new(mode: ResponseMode, timeout: Duration) -> Self {
        Self {
            mode,
            timeout,
            use_priority_queue: false,
            filter: None,
            support_replay: false,
            deliver_order: DeliverOrder::None,
        }
    }

    pub fn with_priority_queue(mut self, use_priority_queue: bool) -> Self {
        self.use_priority_queue = use_priority_queue;
        self
    }

    pub fn with_filter(mut self, filter: Arc<dyn ResponseFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_support_replay(mut self, support_replay: bool) -> Self {
        self.support_replay = support_replay;
        self
    }

    pub fn with_deliver_order(mut self, deliver_order: DeliverOrder) -> Self {
        self.deliver_order = deliver_order;
        self
    }
}

impl fmt::Debug for RpcOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcOptions")
            .field("mode", &self.mode)
            .field("timeout", &self.timeout)
            .field("use_priority_queue", &self.use_priority_queue)
            .field("has_filter", &self.filter.is_some())
            .field("support_replay", &self.support_replay)
            .field("deliver_order", &self.deliver_order)
            .finish()
    }
}

/// Encodes commands for the wire.
pub trait Marshaller: Send + Sync {
    fn encode(&self, command: &ReplicableCommand) -> Result<Bytes>;

    fn decode(&self, data: &[u8]) -> Result<ReplicableCommand>;
}

/// Default marshaller using bincode.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeMarshaller;

impl Marshaller for BincodeMarshaller {
    fn encode(&self, command: &ReplicableCommand) -> Result<Bytes> {
        Ok(Bytes::from(command.to_bytes()?))
    }

    fn decode(&self, data: &[u8]) -> Result<ReplicableCommand> {
        ReplicableCommand::from_bytes(data)
    }
}

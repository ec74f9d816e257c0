//! In-memory group communication for tests.
//!
//! A [`LocalGroup`] plays the role of the group layer: it installs views when
//! channels connect or disconnect and delivers messages synchronously to the
//! recipients' [`InboundHandler`]s. Faults are injected per node, in the
//! spirit of a chaos controller.

use crate::error::{ChannelError, Result};
use crate::topology::View;
use crate::transport::{
    DeliverOrder, DeliveryMode, GroupChannel, MembershipListener, NodeOutcome, NodeResponse,
    Response, SendOptions,
};
use crate::types::Address;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Handles messages delivered to one node.
pub trait InboundHandler: Send + Sync {
    /// Process `payload` from `sender`. `Err` is reported back as a remote exception.
    fn handle(&self, sender: &Address, payload: &Bytes) -> std::result::Result<Bytes, String>;
}

/// Fault injected at a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeFault {
    /// Left mid-call: reported as suspected.
    Crashed,
    /// Never answers before the deadline.
    Unresponsive,
    /// Every command fails with this message.
    Failing(String),
}

struct Member {
    listener: Arc<dyn MembershipListener>,
    handler: Option<Arc<dyn InboundHandler>>,
}

#[derive(Default)]
struct GroupState {
    view_id: i64,
    view: Option<View>,
    members: HashMap<Address, Member>,
    faults: HashMap<Address, NodeFault>,
    /// Payloads delivered per node in total order.
    total_order_log: HashMap<Address, Vec<Bytes>>,
}

/// Shared in-memory group.
pub struct LocalGroup {
    state: Mutex<GroupState>,
    /// Serializes total-order deliveries across senders.
    sequencer: tokio::sync::Mutex<()>,
    sends: AtomicUsize,
}

impl LocalGroup {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(GroupState::default()),
            sequencer: tokio::sync::Mutex::new(()),
            sends: AtomicUsize::new(0),
        })
    }

    /// Create an unconnected channel on this group.
    pub fn channel(self: &Arc<Self>, name: impl Into<String>) -> Arc<LocalChannel> {
        Arc::new(LocalChannel {
            group: self.clone(),
            name: RwLock::new(name.into()),
            handler: RwLock::new(None),
            address: RwLock::new(None),
            connected: AtomicBool::new(false),
        })
    }

    /// Number of messages handed to the group so far.
    pub fn send_count(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn view(&self) -> Option<View> {
        self.state.lock().view.clone()
    }

    pub fn inject_fault(&self, node: &Address, fault: NodeFault) {
        self.state.lock().faults.insert(node.clone(), fault);
    }

    pub fn clear_fault(&self, node: &Address) {
        self.state.lock().faults.remove(node);
    }

    /// Payloads delivered to `node` through total order, in delivery order.
    pub fn total_order_log(&self, node: &Address) -> Vec<Bytes> {
        self.state
            .lock()
            .total_order_log
            .get(node)
            .cloned()
            .unwrap_or_default()
    }

    /// Install an arbitrary view on every connected member.
    pub fn install_view(&self, view: View) {
        let listeners = {
            let mut state = self.state.lock();
            state.view_id = state.view_id.max(view.view_id());
            state.view = Some(view.clone());
            state
                .members
                .values()
                .map(|m| m.listener.clone())
                .collect::<Vec<_>>()
        };
        for listener in listeners {
            listener.view_accepted(view.clone());
        }
    }

    /// Install a merge view healing `subgroups` into one group.
    pub fn merge(&self, subgroups: Vec<View>) {
        let (view_id, members) = {
            let mut state = self.state.lock();
            state.view_id += 1;
            let members: Vec<Address> = subgroups
                .iter()
                .flat_map(|v| v.members().iter().cloned())
                .collect();
            (state.view_id, members)
        };
        self.install_view(View::merge(view_id, members, subgroups));
    }

    fn join(&self, address: Address, listener: Arc<dyn MembershipListener>, handler: Option<Arc<dyn InboundHandler>>) {
        let view = {
            let mut state = self.state.lock();
            state.members.insert(address.clone(), Member { listener, handler });
            let mut members = state
                .view
                .as_ref()
                .map(|v| v.members().to_vec())
                .unwrap_or_default();
            members.push(address);
            state.view_id += 1;
            View::new(state.view_id, members)
        };
        self.install_view(view);
    }

    fn leave(&self, address: &Address) {
        let view = {
            let mut state = self.state.lock();
            state.members.remove(address);
            state.faults.remove(address);
            let members: Vec<Address> = state
                .view
                .as_ref()
                .map(|v| v.members().iter().filter(|m| *m != address).cloned().collect())
                .unwrap_or_default();
            state.view_id += 1;
            View::new(state.view_id, members)
        };
        self.install_view(view);
    }

    fn deliver(&self, sender: &Address, recipient: &Address, payload: &Bytes) -> NodeOutcome {
        let (fault, handler) = {
            let state = self.state.lock();
            match state.members.get(recipient) {
                Some(member) => (state.faults.get(recipient).cloned(), member.handler.clone()),
                None => return NodeOutcome::Suspected,
            }
        };

        match fault {
            Some(NodeFault::Crashed) => NodeOutcome::Suspected,
            Some(NodeFault::Unresponsive) => NodeOutcome::NotReceived,
            Some(NodeFault::Failing(message)) => NodeOutcome::Exception(message),
            None => match handler {
                Some(handler) => match handler.handle(sender, payload) {
                    Ok(value) => NodeOutcome::Value(value),
                    Err(message) => NodeOutcome::Exception(message),
                },
                None => NodeOutcome::Value(Bytes::new()),
            },
        }
    }
}

/// Channel endpoint of one node in a [`LocalGroup`].
pub struct LocalChannel {
    group: Arc<LocalGroup>,
    name: RwLock<String>,
    handler: RwLock<Option<Arc<dyn InboundHandler>>>,
    address: RwLock<Option<Address>>,
    connected: AtomicBool,
}

impl LocalChannel {
    /// Handler for messages delivered to this node. Set before connecting.
    pub fn set_handler(&self, handler: Arc<dyn InboundHandler>) {
        *self.handler.write() = Some(handler);
    }

    pub fn name(&self) -> String {
        self.name.read().clone()
    }
}

#[async_trait::async_trait]
impl GroupChannel for LocalChannel {
    async fn connect(&self, _cluster_name: &str, listener: Arc<dyn MembershipListener>) -> Result<()> {
        if self.connected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let address = Address::named(self.name.read().clone());
        *self.address.write() = Some(address.clone());

        let handler = self.handler.read().clone();
        self.group.join(address, listener, handler);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn address(&self) -> Option<Address> {
        self.address.read().clone()
    }

    fn view(&self) -> Option<View> {
        if self.is_connected() {
            self.group.view()
        } else {
            None
        }
    }

    fn set_name(&self, name: &str) {
        *self.name.write() = name.to_string();
    }

    async fn send(
        &self,
        targets: Option<&[Address]>,
        payload: Bytes,
        options: &SendOptions,
    ) -> Result<Option<Vec<NodeResponse>>> {
        let local = match (self.is_connected(), self.address()) {
            (true, Some(local)) => local,
            _ => return Err(ChannelError::NotConnected.into()),
        };
        self.group.sends.fetch_add(1, Ordering::SeqCst);

        let total_order = options.deliver_order == DeliverOrder::Total;
        let recipients: Vec<Address> = match targets {
            Some(targets) => targets.to_vec(),
            None => self
                .group
                .view()
                .map(|v| {
                    v.members()
                        .iter()
                        .filter(|m| total_order || **m != local)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default(),
        };

        let _sequence = if total_order {
            Some(self.group.sequencer.lock().await)
        } else {
            None
        };

        let mut responses = Vec::with_capacity(recipients.len());
        let mut done = false;
        for recipient in recipients {
            if done {
                responses.push(NodeResponse::new(recipient, NodeOutcome::NotReceived));
                continue;
            }

            let outcome = self.group.deliver(&local, &recipient, &payload);
            if total_order && matches!(outcome, NodeOutcome::Value(_)) {
                self.group
                    .state
                    .lock()
                    .total_order_log
                    .entry(recipient.clone())
                    .or_default()
                    .push(payload.clone());
            }

            let outcome = match (&options.filter, &outcome) {
                (Some(filter), NodeOutcome::Value(v)) => {
                    let response = Response::Value(v.clone());
                    if filter.is_acceptable(&response, &recipient) {
                        done = !filter.need_more_responses();
                        outcome
                    } else {
                        NodeOutcome::NotReceived
                    }
                }
                (Some(filter), NodeOutcome::Exception(e)) => {
                    let response = Response::Exception(e.clone());
                    if filter.is_acceptable(&response, &recipient) {
                        done = !filter.need_more_responses();
                        outcome
                    } else {
                        NodeOutcome::NotReceived
                    }
                }
                (None, NodeOutcome::Value(_)) => {
                    done = options.delivery == DeliveryMode::GetFirst;
                    outcome
                }
                _ => outcome,
            };
            responses.push(NodeResponse::new(recipient, outcome));
        }

        if options.delivery == DeliveryMode::GetNone || responses.is_empty() {
            return Ok(None);
        }
        Ok(Some(responses))
    }

    async fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(address) = self.address() {
            self.group.leave(&address);
        }
    }
}

//! Membership tracking and remote invocation over a group channel.

use crate::cluster::CacheManagerNotifier;
use crate::commands::ReplicableCommand;
use crate::config::GlobalConfig;
use crate::error::{ChannelError, Error, MembershipError, Result};
use crate::gate::Gate;
use crate::topology::View;
use crate::transport::channel::{GroupChannel, MembershipListener, NodeOutcome, SendOptions};
use crate::transport::rpc::{BincodeMarshaller, Marshaller, Response, ResponseMode, RpcOptions};
use crate::types::Address;
use parking_lot::RwLock;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Upper bound of the random suffix appended to the node name.
const NODE_NAME_SUFFIX_MAX: u32 = 65534;

/// Membership as seen by the latest accepted view.
#[derive(Debug, Clone)]
struct MembershipState {
    members: Vec<Address>,
    coordinator: Option<Address>,
    is_coordinator: bool,
    view_id: i64,
}

impl Default for MembershipState {
    fn default() -> Self {
        Self {
            members: Vec::new(),
            coordinator: None,
            is_coordinator: false,
            view_id: -1,
        }
    }
}

/// Cluster transport.
///
/// Membership state is replaced wholesale by the view callback; readers clone
/// the current snapshot and never wait on the group layer.
pub struct Transport {
    config: GlobalConfig,
    channel: Arc<dyn GroupChannel>,
    notifier: Arc<dyn CacheManagerNotifier>,
    marshaller: Arc<dyn Marshaller>,
    state: RwLock<Arc<MembershipState>>,
    /// Opens once the first view has been accepted.
    connected: Gate,
}

impl Transport {
    /// Create a transport using the bincode marshaller.
    pub fn new(
        config: GlobalConfig,
        channel: Arc<dyn GroupChannel>,
        notifier: Arc<dyn CacheManagerNotifier>,
    ) -> Arc<Self> {
        Self::with_marshaller(config, channel, notifier, Arc::new(BincodeMarshaller))
    }

    /// Create a transport with a custom marshaller.
    pub fn with_marshaller(
        config: GlobalConfig,
        channel: Arc<dyn GroupChannel>,
        notifier: Arc<dyn CacheManagerNotifier>,
        marshaller: Arc<dyn Marshaller>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            channel,
            notifier,
            marshaller,
            state: RwLock::new(Arc::new(MembershipState::default())),
            connected: Gate::new(),
        })
    }

    /// Start the transport.
    ///
    /// A channel that is already connected is adopted as is; otherwise the
    /// node name gets a random suffix and the configured cluster is joined.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.channel.is_connected() {
            info!(cluster = %self.config.cluster_name, "Adopting already connected channel");
            if let Some(view) = self.channel.view() {
                self.view_accepted(view);
            }
            return Ok(());
        }

        if let Some(name) = &self.config.node_name {
            let suffix = rand::rng().random_range(1..=NODE_NAME_SUFFIX_MAX);
            self.channel.set_name(&format!("{}-{}", name, suffix));
        }

        self.connect(&self.config.cluster_name).await
    }

    /// Join `cluster_name` and wait until the first view has been accepted.
    pub async fn connect(self: &Arc<Self>, cluster_name: &str) -> Result<()> {
        let listener: Arc<dyn MembershipListener> = self.clone();
        self.channel
            .connect(cluster_name, listener)
            .await
            .map_err(|e| ChannelError::ConnectFailed {
                cluster: cluster_name.to_string(),
                reason: e.to_string(),
            })?;

        if !self.connected.wait(Some(self.config.connect_timeout)).await {
            return Err(ChannelError::ConnectTimeout {
                cluster: cluster_name.to_string(),
                timeout_ms: self.config.connect_timeout.as_millis() as u64,
            }
            .into());
        }

        info!(
            cluster = cluster_name,
            address = ?self.address(),
            view_id = self.view_id(),
            "Transport connected"
        );
        Ok(())
    }

    /// Leave the cluster and forget the membership.
    pub async fn stop(&self) {
        info!(address = ?self.address(), "Stopping transport");
        self.channel.disconnect().await;
        *self.state.write() = Arc::new(MembershipState::default());
    }

    /// Members of the latest view.
    pub fn members(&self) -> Vec<Address> {
        self.state.read().members.clone()
    }

    /// Local address, once connected.
    pub fn address(&self) -> Option<Address> {
        self.channel.address()
    }

    pub fn is_coordinator(&self) -> bool {
        self.state.read().is_coordinator
    }

    pub fn coordinator(&self) -> Option<Address> {
        self.state.read().coordinator.clone()
    }

    /// Id of the latest view; -1 before the first view.
    pub fn view_id(&self) -> i64 {
        self.state.read().view_id
    }

    /// Invoke `command` on `recipients`, or on every member when `None`.
    ///
    /// Asynchronous modes return an empty map as soon as the message is handed
    /// off. Synchronous modes return one entry per recipient that answered;
    /// suspected recipients and recipients that did not answer in time are
    /// left out, and the call fails with [`Error::Timeout`] when no entry
    /// holds a value.
    pub async fn invoke_remotely(
        &self,
        recipients: Option<&[Address]>,
        command: &ReplicableCommand,
        options: &RpcOptions,
    ) -> Result<HashMap<Address, Response>> {
        if recipients.is_some_and(|r| r.is_empty()) {
            trace!("Destination list is empty, not sending");
            return Ok(HashMap::new());
        }

        let state = self.state.read().clone();
        let mode = options.mode;

        if mode == ResponseMode::Synchronous {
            if let Some(missing) = recipients
                .into_iter()
                .flatten()
                .find(|r| !state.members.contains(r))
            {
                return Err(MembershipError::NotMember(missing.clone()).into());
            }
        }

        let use_priority_queue = options.use_priority_queue
            || matches!(
                mode,
                ResponseMode::Synchronous | ResponseMode::SynchronousIgnoreLeavers
            );
        let broadcast = match recipients {
            None => true,
            Some(r) => {
                let targets: HashSet<&Address> = r.iter().collect();
                targets.len() == state.members.len() && state.members.iter().all(|m| targets.contains(m))
            }
        };

        let send_options = SendOptions {
            delivery: mode.delivery_mode(),
            timeout: options.timeout,
            oob: use_priority_queue,
            anycast: !broadcast,
            async_marshalling: mode == ResponseMode::Asynchronous,
            support_replay: options.support_replay,
            deliver_order: options.deliver_order,
            filter: options.filter.clone(),
        };

        debug!(
            command = command.command.name(),
            cache = %command.cache_name,
            topology_id = command.topology_id,
            ?mode,
            broadcast,
            recipients = ?recipients,
            "Invoking remote command"
        );

        let targets = if broadcast { None } else { recipients };
        let payload = self.marshaller.encode(command)?;
        let send = self.channel.send(targets, payload, &send_options);
        let responses = match tokio::time::timeout(options.timeout, send).await {
            Ok(responses) => responses?,
            Err(_) => {
                return Err(Error::Timeout(format!(
                    "{} not answered within {:?}",
                    command.command.name(),
                    options.timeout
                )))
            }
        };

        if mode.is_asynchronous() {
            return Ok(HashMap::new());
        }

        let Some(responses) = responses else {
            return Ok(HashMap::new());
        };

        let ignore_leavers = mode.ignore_leavers();
        let mut result = HashMap::with_capacity(responses.len());
        let mut has_valid = false;

        for response in responses {
            match response.outcome {
                NodeOutcome::Value(value) => {
                    has_valid = true;
                    result.insert(response.sender, Response::Value(value));
                }
                NodeOutcome::Exception(message) => {
                    debug!(sender = %response.sender, %message, "Remote exception");
                    result.insert(response.sender, Response::Exception(message));
                }
                NodeOutcome::Suspected => {
                    if ignore_leavers {
                        trace!(sender = %response.sender, "Ignoring leaver");
                    } else {
                        debug!(sender = %response.sender, "Recipient suspected during call");
                    }
                }
                NodeOutcome::NotReceived => {
                    trace!(sender = %response.sender, "No response before deadline");
                }
            }
        }

        if !has_valid {
            return Err(Error::Timeout(format!(
                "timed out waiting for valid responses to {}",
                command.command.name()
            )));
        }
        Ok(result)
    }
}

impl MembershipListener for Transport {
    fn view_accepted(&self, view: View) {
        debug!(view_id = view.view_id(), members = ?view.members(), "New view accepted");
        if view.members().is_empty() {
            debug!(view_id = view.view_id(), "Received empty member list, ignoring view");
            return;
        }

        let local = self.channel.address();
        let coordinator = view.creator().cloned();
        let is_coordinator = coordinator.is_some() && coordinator == local;

        let new_state = Arc::new(MembershipState {
            members: view.members().to_vec(),
            coordinator,
            is_coordinator,
            view_id: view.view_id(),
        });
        let old_state = std::mem::replace(&mut *self.state.write(), new_state.clone());

        // Waiters may start using coordinator identity before listeners run
        self.connected.release();

        if local.is_none() {
            warn!(view_id = view.view_id(), "View accepted before local address was known");
        }

        if view.is_merge() {
            let subgroups: Vec<Vec<Address>> =
                view.subgroups().iter().map(|v| v.members().to_vec()).collect();
            self.notifier.notify_merge(
                &new_state.members,
                &old_state.members,
                local.as_ref(),
                new_state.view_id,
                &subgroups,
            );
        } else {
            self.notifier.notify_view_change(
                &new_state.members,
                &old_state.members,
                local.as_ref(),
                new_state.view_id,
            );
        }
    }

    fn suspect(&self, member: &Address) {
        trace!(%member, "Member suspected");
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("Transport")
            .field("cluster", &self.config.cluster_name)
            .field("address", &self.channel.address())
            .field("view_id", &state.view_id)
            .field("members", &state.members)
            .field("is_coordinator", &state.is_coordinator)
            .finish()
    }
}

//! Broadcast of transaction prepares, ordinary or totally ordered.

use crate::commands::{CacheCommand, PrepareCommand, ReplicableCommand};
use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::replication::transaction::LocalTransaction;
use crate::transport::{DeliverOrder, Response, ResponseMode, RpcOptions, Transport};
use crate::types::Address;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// Invocation context of a transaction originated on this node.
#[derive(Debug, Clone)]
pub struct TxInvocationContext {
    pub transaction: Arc<LocalTransaction>,
    /// Topology the transaction's commands are routed with.
    pub topology_id: i32,
}

impl TxInvocationContext {
    pub fn new(transaction: Arc<LocalTransaction>, topology_id: i32) -> Self {
        Self {
            transaction,
            topology_id,
        }
    }
}

/// Broadcasts prepares for one cache.
pub struct TotalOrderReplicator {
    cache_name: String,
    config: CacheConfig,
    transport: Arc<Transport>,
}

impl TotalOrderReplicator {
    pub fn new(cache_name: impl Into<String>, config: CacheConfig, transport: Arc<Transport>) -> Self {
        Self {
            cache_name: cache_name.into(),
            config,
            transport,
        }
    }

    /// Broadcast `command` to every member.
    ///
    /// Prepares not flagged for total order go out as an ordinary broadcast.
    /// Totally-ordered prepares are always sent asynchronously; on synchronous
    /// caches the call then waits until the prepare has been applied locally,
    /// and any failure while waiting is reported as [`Error::Rpc`].
    pub async fn broadcast_prepare(
        &self,
        ctx: &TxInvocationContext,
        command: PrepareCommand,
    ) -> Result<HashMap<Address, Response>> {
        let total_order = command.total_order;
        let gtx = command.gtx.clone();
        let envelope = ReplicableCommand::new(
            self.cache_name.clone(),
            ctx.topology_id,
            CacheCommand::Prepare(command),
        );

        if !total_order {
            return self.broadcast(&envelope).await;
        }

        trace!(%gtx, "Broadcasting prepare in total order");
        let options = RpcOptions::new(ResponseMode::Asynchronous, self.config.sync_repl_timeout)
            .with_deliver_order(DeliverOrder::Total);
        self.transport.invoke_remotely(None, &envelope, &options).await?;

        if self.config.mode.is_synchronous() {
            trace!(%gtx, "Waiting until modifications are applied");
            let applied = ctx
                .transaction
                .await_until_modifications_applied(self.config.sync_repl_timeout)
                .await;
            trace!(%gtx, "Finished waiting for modifications");
            applied.map_err(|e| Error::Rpc(e.to_string()))?;
        }
        Ok(HashMap::new())
    }

    async fn broadcast(&self, command: &ReplicableCommand) -> Result<HashMap<Address, Response>> {
        let mode = if self.config.mode.is_synchronous() {
            ResponseMode::Synchronous
        } else {
            ResponseMode::Asynchronous
        };
        let options = RpcOptions::new(mode, self.config.sync_repl_timeout);
        self.transport.invoke_remotely(None, command, &options).await
    }
}

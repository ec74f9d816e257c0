//! Commands replicated between nodes.

use crate::error::Result;
use crate::types::Address;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a transaction, unique per originating node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GlobalTransaction {
    pub id: u64,
    pub origin: Address,
}

impl GlobalTransaction {
    pub fn new(id: u64, origin: Address) -> Self {
        Self { id, origin }
    }
}

impl fmt::Display for GlobalTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GlobalTx:{}:{}", self.origin, self.id)
    }
}

/// Prepare phase of a transaction, carrying all of its modifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareCommand {
    pub gtx: GlobalTransaction,
    pub modifications: Vec<CacheCommand>,
    /// Commit in the same round trip; no separate commit follows.
    pub one_phase_commit: bool,
    /// Deliver through the totally-ordered broadcast.
    pub total_order: bool,
}

impl PrepareCommand {
    pub fn new(gtx: GlobalTransaction, modifications: Vec<CacheCommand>) -> Self {
        Self {
            gtx,
            modifications,
            one_phase_commit: false,
            total_order: false,
        }
    }

    pub fn with_one_phase_commit(mut self, one_phase_commit: bool) -> Self {
        self.one_phase_commit = one_phase_commit;
        self
    }

    pub fn with_total_order(mut self, total_order: bool) -> Self {
        self.total_order = total_order;
        self
    }
}

/// A cache operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheCommand {
    /// Insert or update a key-value pair.
    Put { key: Vec<u8>, value: Vec<u8> },

    /// Remove a key.
    Remove { key: Vec<u8> },

    /// Clear all entries of the cache.
    Clear,

    Prepare(PrepareCommand),

    Commit { gtx: GlobalTransaction },

    Rollback { gtx: GlobalTransaction },

    /// Tells the owners that the originator has released its transaction.
    TxCompletionNotification { gtx: GlobalTransaction },
}

impl CacheCommand {
    /// Create a Put command.
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Create a Remove command.
    pub fn remove(key: impl Into<Vec<u8>>) -> Self {
        Self::Remove { key: key.into() }
    }

    /// Keys written by this command. Empty for commands that touch no
    /// specific key (clear, commit, rollback).
    pub fn affected_keys(&self) -> Vec<&[u8]> {
        match self {
            CacheCommand::Put { key, .. } | CacheCommand::Remove { key } => vec![key.as_slice()],
            CacheCommand::Prepare(prepare) => prepare
                .modifications
                .iter()
                .flat_map(|m| m.affected_keys())
                .collect(),
            CacheCommand::Clear
            | CacheCommand::Commit { .. }
            | CacheCommand::Rollback { .. }
            | CacheCommand::TxCompletionNotification { .. } => Vec::new(),
        }
    }

    /// Short name for log output.
    pub fn name(&self) -> &'static str {
        match self {
            CacheCommand::Put { .. } => "Put",
            CacheCommand::Remove { .. } => "Remove",
            CacheCommand::Clear => "Clear",
            CacheCommand::Prepare(_) => "Prepare",
            CacheCommand::Commit { .. } => "Commit",
            CacheCommand::Rollback { .. } => "Rollback",
            CacheCommand::TxCompletionNotification { .. } => "TxCompletionNotification",
        }
    }
}

/// Envelope for a command sent to other nodes.
///
/// The topology id records which topology the sender routed the command
/// with; receivers on a newer topology forward it to the current owners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicableCommand {
    pub cache_name: String,
    pub topology_id: i32,
    pub command: CacheCommand,
}

impl ReplicableCommand {
    pub fn new(cache_name: impl Into<String>, topology_id: i32, command: CacheCommand) -> Self {
        Self {
            cache_name: cache_name.into(),
            topology_id,
            command,
        }
    }

    /// Serialize command to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize command from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(data)?)
    }
}

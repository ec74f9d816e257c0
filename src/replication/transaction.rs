//! Transactions originated by the local node.

use crate::commands::GlobalTransaction;
use crate::error::{Error, Result};
use crate::gate::Gate;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// A transaction started on this node.
///
/// Under total order the originator learns that its prepare was applied only
/// when the group delivers the prepare back to it; the delivery path signals
/// this through [`mark_modifications_applied`](Self::mark_modifications_applied)
/// or [`mark_failed`](Self::mark_failed).
#[derive(Debug)]
pub struct LocalTransaction {
    gtx: GlobalTransaction,
    applied: Gate,
    failure: Mutex<Option<String>>,
}

impl LocalTransaction {
    pub fn new(gtx: GlobalTransaction) -> Self {
        Self {
            gtx,
            applied: Gate::new(),
            failure: Mutex::new(None),
        }
    }

    pub fn gtx(&self) -> &GlobalTransaction {
        &self.gtx
    }

    pub fn mark_modifications_applied(&self) {
        let _outcome = self.failure.lock();
        self.applied.release();
    }

    /// Record that applying the modifications failed. The first outcome wins.
    pub fn mark_failed(&self, reason: impl Into<String>) {
        // Outcome is decided under the failure lock
        let mut failure = self.failure.lock();
        if self.applied.is_released() {
            return;
        }
        *failure = Some(reason.into());
        self.applied.release();
    }

    pub fn is_modifications_applied(&self) -> bool {
        self.applied.is_released() && self.failure.lock().is_none()
    }

    /// Wait until the modifications were applied locally in total order.
    pub async fn await_until_modifications_applied(&self, timeout: Duration) -> Result<()> {
        if !self.applied.wait(Some(timeout)).await {
            return Err(Error::Timeout(format!(
                "modifications of {} not applied within {:?}",
                self.gtx, timeout
            )));
        }

        match self.failure.lock().as_ref() {
            Some(reason) => Err(Error::Internal(format!(
                "applying modifications of {} failed: {}",
                self.gtx, reason
            ))),
            None => Ok(()),
        }
    }
}

/// Local transactions by id.
#[derive(Debug, Default)]
pub struct TransactionTable {
    transactions: DashMap<GlobalTransaction, Arc<LocalTransaction>>,
}

impl TransactionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transaction, returning the existing one if already present.
    pub fn begin(&self, gtx: GlobalTransaction) -> Arc<LocalTransaction> {
        self.transactions
            .entry(gtx.clone())
            .or_insert_with(|| Arc::new(LocalTransaction::new(gtx)))
            .clone()
    }

    pub fn get(&self, gtx: &GlobalTransaction) -> Option<Arc<LocalTransaction>> {
        self.transactions.get(gtx).map(|tx| tx.clone())
    }

    pub fn remove(&self, gtx: &GlobalTransaction) -> Option<Arc<LocalTransaction>> {
        self.transactions.remove(gtx).map(|(_, tx)| tx)
    }

    /// Signal that `gtx`'s prepare was applied. Returns false for unknown
    /// transactions, e.g. ones originated elsewhere.
    pub fn mark_modifications_applied(&self, gtx: &GlobalTransaction) -> bool {
        match self.get(gtx) {
            Some(tx) => {
                tx.mark_modifications_applied();
                true
            }
            None => false,
        }
    }

    pub fn mark_failed(&self, gtx: &GlobalTransaction, reason: impl Into<String>) -> bool {
        match self.get(gtx) {
            Some(tx) => {
                tx.mark_failed(reason);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

//! One-shot gate.
//!
//! A gate starts closed and opens exactly once. Any number of tasks may wait on
//! it; once released it stays released and later waiters return immediately.

use std::time::Duration;
use tokio::sync::watch;

/// Single-fire synchronization primitive.
#[derive(Debug)]
pub struct Gate {
    state: watch::Sender<bool>,
}

impl Gate {
    /// Create a closed gate.
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self { state }
    }

    /// Open the gate. Idempotent.
    ///
    /// Returns `true` only for the call that actually opened it.
    pub fn release(&self) -> bool {
        !self.state.send_replace(true)
    }

    /// Whether the gate has been opened.
    pub fn is_released(&self) -> bool {
        *self.state.borrow()
    }

    /// Wait until the gate opens.
    ///
    /// Returns `false` if `timeout` elapsed first. `None` waits forever.
    pub async fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut rx = self.state.subscribe();
        let opened = async move { rx.wait_for(|released| *released).await.is_ok() };

        match timeout {
            Some(timeout) => tokio::time::timeout(timeout, opened).await.unwrap_or(false),
            None => opened.await,
        }
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

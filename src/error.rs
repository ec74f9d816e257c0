//! Error types for the data grid core.

use crate::types::Address;
use thiserror::Error;

/// Result type alias for data grid operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the data grid core.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or unsupported configuration. Fatal at cache startup.
    #[error("config error: {0}")]
    Config(String),

    /// Cluster membership errors.
    #[error("membership error: {0}")]
    Membership(#[from] MembershipError),

    /// Group-communication channel errors.
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// No valid response arrived before the deadline.
    #[error("timed out: {0}")]
    Timeout(String),

    /// A protocol invariant was broken (e.g. topology id regression).
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Remote invocation failed.
    #[error("rpc error: {0}")]
    Rpc(String),

    /// State transfer failed or did not complete in time.
    #[error("state transfer error: {0}")]
    StateTransfer(String),

    /// Payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Generic internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Cluster membership errors.
#[derive(Error, Debug, Clone)]
pub enum MembershipError {
    /// A required recipient is not part of the current view.
    #[error("{0} is not a member of the current view")]
    NotMember(Address),
}

/// Group-communication channel errors.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// Joining the group failed.
    #[error("unable to connect to cluster {cluster}: {reason}")]
    ConnectFailed { cluster: String, reason: String },

    /// No view was accepted within the connect timeout.
    #[error("no view accepted for cluster {cluster} within {timeout_ms}ms")]
    ConnectTimeout { cluster: String, timeout_ms: u64 },

    /// The channel is not connected.
    #[error("channel not connected")]
    NotConnected,
}

impl Error {
    /// Whether this error must abort cache startup.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::InvariantViolation(_)
                | Error::StateTransfer(_)
                | Error::Channel(ChannelError::ConnectFailed { .. })
                | Error::Channel(ChannelError::ConnectTimeout { .. })
        )
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::Config("bad mode".into()).is_fatal());
        assert!(Error::InvariantViolation("regression".into()).is_fatal());
        assert!(Error::Channel(ChannelError::ConnectFailed {
            cluster: "grid".into(),
            reason: "refused".into(),
        })
        .is_fatal());

        assert!(!Error::Timeout("no responses".into()).is_fatal());
        assert!(!Error::Membership(MembershipError::NotMember(Address::named("a"))).is_fatal());
    }
}

//! Cluster view-change events.

use crate::types::Address;

/// A membership change observed by the local node.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewChangeEvent {
    /// A regular view was installed.
    ViewChanged {
        members: Vec<Address>,
        old_members: Vec<Address>,
        /// Local address; `None` if the view arrived before it was known.
        local: Option<Address>,
        view_id: i64,
    },

    /// Partitioned subgroups healed into one view.
    Merged {
        members: Vec<Address>,
        old_members: Vec<Address>,
        local: Option<Address>,
        view_id: i64,
        /// Member lists of the subgroups that were merged.
        subgroups: Vec<Vec<Address>>,
    },
}

impl ViewChangeEvent {
    pub fn members(&self) -> &[Address] {
        match self {
            ViewChangeEvent::ViewChanged { members, .. } | ViewChangeEvent::Merged { members, .. } => {
                members
            }
        }
    }

    pub fn old_members(&self) -> &[Address] {
        match self {
            ViewChangeEvent::ViewChanged { old_members, .. }
            | ViewChangeEvent::Merged { old_members, .. } => old_members,
        }
    }

    pub fn view_id(&self) -> i64 {
        match self {
            ViewChangeEvent::ViewChanged { view_id, .. } | ViewChangeEvent::Merged { view_id, .. } => {
                *view_id
            }
        }
    }

    pub fn is_merge(&self) -> bool {
        matches!(self, ViewChangeEvent::Merged { .. })
    }

    /// Members present in the new view but not in the old one.
    pub fn joined(&self) -> Vec<&Address> {
        let old = self.old_members();
        self.members().iter().filter(|m| !old.contains(m)).collect()
    }

    /// Members present in the old view but not in the new one.
    pub fn left(&self) -> Vec<&Address> {
        let new = self.members();
        self.old_members().iter().filter(|m| !new.contains(m)).collect()
    }
}

/// Sink for cache-manager level view notifications.
pub trait CacheManagerNotifier: Send + Sync + 'static {
    /// Called after a regular view was accepted.
    fn notify_view_change(
        &self,
        members: &[Address],
        old_members: &[Address],
        local: Option<&Address>,
        view_id: i64,
    );

    /// Called after a merge view was accepted.
    fn notify_merge(
        &self,
        members: &[Address],
        old_members: &[Address],
        local: Option<&Address>,
        view_id: i64,
        subgroups: &[Vec<Address>],
    );
}

/// No-op notifier.
pub struct NoopNotifier;

impl CacheManagerNotifier for NoopNotifier {
    fn notify_view_change(&self, _: &[Address], _: &[Address], _: Option<&Address>, _: i64) {}

    fn notify_merge(&self, _: &[Address], _: &[Address], _: Option<&Address>, _: i64, _: &[Vec<Address>]) {}
}

/// Notifier that logs view changes.
pub struct LoggingNotifier;

impl CacheManagerNotifier for LoggingNotifier {
    fn notify_view_change(
        &self,
        members: &[Address],
        old_members: &[Address],
        local: Option<&Address>,
        view_id: i64,
    ) {
        let event = ViewChangeEvent::ViewChanged {
            members: members.to_vec(),
            old_members: old_members.to_vec(),
            local: local.cloned(),
            view_id,
        };
        tracing::info!(
            local = ?local,
            view_id,
            members = ?event.members(),
            joined = ?event.joined(),
            left = ?event.left(),
            "Received new cluster view"
        );
    }

    fn notify_merge(
        &self,
        members: &[Address],
        old_members: &[Address],
        local: Option<&Address>,
        view_id: i64,
        subgroups: &[Vec<Address>],
    ) {
        tracing::warn!(
            local = ?local,
            view_id,
            ?members,
            ?old_members,
            ?subgroups,
            "Received new merge view"
        );
    }
}

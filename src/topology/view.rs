//! Membership views.

use crate::types::Address;
use serde::{Deserialize, Serialize};

/// Ordered snapshot of cluster membership.
///
/// Views are immutable: every membership change produces a new view with a
/// higher id. A merge view additionally carries the views of the subgroups
/// that were merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct View {
    view_id: i64,
    creator: Option<Address>,
    members: Vec<Address>,
    subgroups: Option<Vec<View>>,
}

impl View {
    /// Create a regular view. The first member is the creator.
    pub fn new(view_id: i64, members: Vec<Address>) -> Self {
        Self {
            view_id,
            creator: members.first().cloned(),
            members,
            subgroups: None,
        }
    }

    /// Create a merge view from the subgroups that healed.
    pub fn merge(view_id: i64, members: Vec<Address>, subgroups: Vec<View>) -> Self {
        Self {
            subgroups: Some(subgroups),
            ..Self::new(view_id, members)
        }
    }

    /// Override the creator of this view.
    pub fn with_creator(mut self, creator: Option<Address>) -> Self {
        self.creator = creator;
        self
    }

    pub fn view_id(&self) -> i64 {
        self.view_id
    }

    /// Node that installed the view; the coordinator of the group.
    pub fn creator(&self) -> Option<&Address> {
        self.creator.as_ref()
    }

    pub fn members(&self) -> &[Address] {
        &self.members
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.members.contains(address)
    }

    pub fn is_merge(&self) -> bool {
        self.subgroups.is_some()
    }

    /// Subgroup views of a merge view; empty for regular views.
    pub fn subgroups(&self) -> &[View] {
        self.subgroups.as_deref().unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regular_view() {
        let a = Address::named("a");
        let b = Address::named("b");
        let view = View::new(3, vec![a.clone(), b.clone()]);

        assert_eq!(view.view_id(), 3);
        assert_eq!(view.creator(), Some(&a));
        assert!(view.contains(&b));
        assert!(!view.is_merge());
        assert!(view.subgroups().is_empty());
    }

    #[test]
    fn test_merge_view() {
        let a = Address::named("a");
        let b = Address::named("b");
        let left = View::new(4, vec![a.clone()]);
        let right = View::new(5, vec![b.clone()]);

        let merged = View::merge(6, vec![a.clone(), b.clone()], vec![left, right]);
        assert!(merged.is_merge());
        assert_eq!(merged.subgroups().len(), 2);
        assert_eq!(merged.subgroups()[1].members(), &[b]);
    }

    #[test]
    fn test_empty_view_has_no_creator() {
        let view = View::new(1, Vec::new());
        assert!(view.creator().is_none());
        assert!(view.members().is_empty());
    }
}

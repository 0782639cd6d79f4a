//! Revert ledger.
//!
//! Snapshot of an entry's pre-transient identity plus the parent-side reorder
//! log. Created lazily on the first move/rename of the entry or the first
//! reorder among its children; disposed when the owner's save completes or
//! the owner reaches a terminal state (listener-driven). While it lives, the
//! ledger answers the workspace view: the name, index and parent the server
//! still sees.

use arbor_spi::name::Name;

use crate::entry::EntryId;

pub(crate) struct RevertInfo {
    /// Parent at snapshot time; `None` only for the root's reorder ledger.
    pub old_parent: Option<EntryId>,
    pub old_name: Name,
    pub old_index: u32,
    /// Reorders performed under this entry, in execution order. The value is
    /// the child's previous successor in the full child list (`None` = it was
    /// last); replaying `reorder(child, previous_successor)` in reverse
    /// restores the original order. One row per child - a second reorder of
    /// the same child updates the row in place.
    reordered: Vec<(EntryId, Option<EntryId>)>,
}

impl RevertInfo {
    pub(crate) fn new(old_parent: Option<EntryId>, old_name: Name, old_index: u32) -> Self {
        Self {
            old_parent,
            old_name,
            old_index,
            reordered: Vec::new(),
        }
    }

    pub(crate) fn record_reorder(&mut self, child: EntryId, previous_successor: Option<EntryId>) {
        match self.reordered.iter_mut().find(|(c, _)| *c == child) {
            Some(row) => row.1 = previous_successor,
            None => self.reordered.push((child, previous_successor)),
        }
    }

    pub(crate) fn reordered(&self) -> &[(EntryId, Option<EntryId>)] {
        &self.reordered
    }

    /// Does the snapshot differ from the given current identity?
    pub(crate) fn is_moved(&self, current_parent: Option<EntryId>, current_name: &Name) -> bool {
        self.old_parent != current_parent || &self.old_name != current_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Name {
        Name::plain(s).unwrap()
    }

    #[test]
    fn second_reorder_of_same_child_updates_in_place() {
        let mut info = RevertInfo::new(None, name("p"), 1);
        let (a, b, c) = (
            EntryId::from_raw(1),
            EntryId::from_raw(2),
            EntryId::from_raw(3),
        );
        info.record_reorder(a, Some(b));
        info.record_reorder(c, None);
        info.record_reorder(a, Some(c));
        assert_eq!(info.reordered(), &[(a, Some(c)), (c, None)]);
    }

    #[test]
    fn moved_compares_against_the_snapshot() {
        let parent = EntryId::from_raw(7);
        let info = RevertInfo::new(Some(parent), name("a"), 1);
        assert!(!info.is_moved(Some(parent), &name("a")));
        assert!(info.is_moved(Some(parent), &name("b")));
        assert!(info.is_moved(Some(EntryId::from_raw(8)), &name("a")));
    }
}

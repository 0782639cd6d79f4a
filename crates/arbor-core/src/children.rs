//! Ordered child-node list.
//!
//! Keeps the full insertion order plus a per-name bucket for fast
//! `(name, index)` lookup. Bucket order always mirrors list order; mutations
//! resync only the touched bucket, since moving one entry cannot change the
//! relative order of the others. Same-name-sibling indices are never stored -
//! they are derived from bucket position, validity-filtered by the caller.

use std::collections::{HashMap, HashSet};

use arbor_spi::name::Name;

use crate::entry::EntryId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ChildListStatus {
    Ok,
    /// An external change touched this node; the next read merges a fresh
    /// server listing.
    Invalidated,
}

pub(crate) struct ChildNodeEntries {
    order: Vec<EntryId>,
    buckets: HashMap<Name, Vec<EntryId>>,
    status: ChildListStatus,
}

impl ChildNodeEntries {
    pub(crate) fn new() -> Self {
        Self {
            order: Vec::new(),
            buckets: HashMap::new(),
            status: ChildListStatus::Ok,
        }
    }

    pub(crate) fn status(&self) -> ChildListStatus {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: ChildListStatus) {
        self.status = status;
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = EntryId> + '_ {
        self.order.iter().copied()
    }

    pub(crate) fn to_vec(&self) -> Vec<EntryId> {
        self.order.clone()
    }

    /// Entries sharing `name`, in list order.
    pub(crate) fn named(&self, name: &Name) -> &[EntryId] {
        self.buckets.get(name).map_or(&[], Vec::as_slice)
    }

    fn position(&self, id: EntryId) -> Option<usize> {
        self.order.iter().position(|&e| e == id)
    }

    /// Append at the end.
    pub(crate) fn push(&mut self, name: &Name, id: EntryId) {
        self.order.push(id);
        self.buckets.entry(name.clone()).or_default().push(id);
    }

    /// Insert immediately before `before`; appends when `before` is absent.
    pub(crate) fn insert_before(&mut self, name: &Name, id: EntryId, before: EntryId) {
        match self.position(before) {
            Some(pos) => {
                self.order.insert(pos, id);
                self.buckets.entry(name.clone()).or_default().push(id);
                self.resync_bucket(name);
            }
            None => self.push(name, id),
        }
    }

    /// Insert so the entry lands at the 1-based `index` within its name
    /// bucket; appends when the bucket is shorter.
    pub(crate) fn insert_at_bucket_index(&mut self, name: &Name, id: EntryId, index: u32) {
        let target = self
            .buckets
            .get(name)
            .and_then(|b| b.get(index.saturating_sub(1) as usize))
            .copied();
        match target {
            Some(before) => self.insert_before(name, id, before),
            None => self.push(name, id),
        }
    }

    pub(crate) fn remove(&mut self, name: &Name, id: EntryId) -> bool {
        let Some(pos) = self.position(id) else {
            return false;
        };
        self.order.remove(pos);
        if let Some(bucket) = self.buckets.get_mut(name) {
            bucket.retain(|&e| e != id);
            if bucket.is_empty() {
                self.buckets.remove(name);
            }
        }
        true
    }

    /// Move `id` immediately before `before` (or to the end). Returns the
    /// entry that followed `id` before the move - the revert ledger replays
    /// `reorder(id, previous_successor)` to undo. `None` means it was last.
    pub(crate) fn reorder(
        &mut self,
        name: &Name,
        id: EntryId,
        before: Option<EntryId>,
    ) -> Result<Option<EntryId>, ()> {
        let pos = self.position(id).ok_or(())?;
        if before == Some(id) {
            return Err(());
        }
        if let Some(b) = before {
            if self.position(b).is_none() {
                return Err(());
            }
        }
        let previous_successor = self.order.get(pos + 1).copied();
        self.order.remove(pos);
        match before.and_then(|b| self.position(b)) {
            Some(target) => self.order.insert(target, id),
            None => self.order.push(id),
        }
        self.resync_bucket(name);
        Ok(previous_successor)
    }

    /// Re-derive one bucket's order from the list order. Membership is
    /// unchanged; only ordering is refreshed.
    fn resync_bucket(&mut self, name: &Name) {
        if let Some(bucket) = self.buckets.get_mut(name) {
            let members: HashSet<EntryId> = bucket.iter().copied().collect();
            *bucket = self
                .order
                .iter()
                .copied()
                .filter(|e| members.contains(e))
                .collect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn name(s: &str) -> Name {
        Name::plain(s).unwrap()
    }

    fn id(raw: u64) -> EntryId {
        EntryId::from_raw(raw)
    }

    #[test]
    fn push_keeps_bucket_in_list_order() {
        let mut list = ChildNodeEntries::new();
        let (a, c1, c2) = (id(1), id(2), id(3));
        list.push(&name("a"), a);
        list.push(&name("c"), c1);
        list.push(&name("c"), c2);
        assert_eq!(list.named(&name("c")), &[c1, c2]);
        assert_eq!(list.to_vec(), vec![a, c1, c2]);
    }

    #[test]
    fn insert_at_bucket_index_targets_the_sns_slot() {
        let mut list = ChildNodeEntries::new();
        let (c1, c2, x) = (id(1), id(2), id(3));
        list.push(&name("c"), c1);
        list.push(&name("c"), c2);
        list.insert_at_bucket_index(&name("c"), x, 2);
        assert_eq!(list.named(&name("c")), &[c1, x, c2]);
        // out-of-range index appends
        let y = id(4);
        list.insert_at_bucket_index(&name("c"), y, 9);
        assert_eq!(list.named(&name("c")), &[c1, x, c2, y]);
    }

    #[test]
    fn reorder_returns_the_previous_successor() {
        let mut list = ChildNodeEntries::new();
        let (c1, c2, c3) = (id(1), id(2), id(3));
        for c in [c1, c2, c3] {
            list.push(&name("c"), c);
        }
        // move c3 before c1; it had no successor
        let prev = list.reorder(&name("c"), c3, Some(c1)).unwrap();
        assert_eq!(prev, None);
        assert_eq!(list.named(&name("c")), &[c3, c1, c2]);
        // undo by replaying with the recorded successor
        let prev = list.reorder(&name("c"), c3, prev).unwrap();
        assert_eq!(prev, Some(c1));
        assert_eq!(list.named(&name("c")), &[c1, c2, c3]);
    }

    #[test]
    fn reorder_rejects_unknown_participants() {
        let mut list = ChildNodeEntries::new();
        let c1 = id(1);
        list.push(&name("c"), c1);
        assert!(list.reorder(&name("c"), id(9), None).is_err());
        assert!(list.reorder(&name("c"), c1, Some(id(9))).is_err());
        assert!(list.reorder(&name("c"), c1, Some(c1)).is_err());
    }

    #[test]
    fn remove_detaches_from_both_indices() {
        let mut list = ChildNodeEntries::new();
        let (c1, c2) = (id(1), id(2));
        list.push(&name("c"), c1);
        list.push(&name("c"), c2);
        assert!(list.remove(&name("c"), c1));
        assert!(!list.remove(&name("c"), c1));
        assert_eq!(list.named(&name("c")), &[c2]);
        assert_eq!(list.to_vec(), vec![c2]);
    }

    #[test]
    fn reorder_only_touches_the_moved_bucket() {
        let mut list = ChildNodeEntries::new();
        let (a1, b1, a2, b2) = (id(1), id(2), id(3), id(4));
        list.push(&name("a"), a1);
        list.push(&name("b"), b1);
        list.push(&name("a"), a2);
        list.push(&name("b"), b2);
        list.reorder(&name("a"), a2, Some(a1)).unwrap();
        assert_eq!(list.named(&name("a")), &[a2, a1]);
        assert_eq!(list.named(&name("b")), &[b1, b2]);
        assert_eq!(list.to_vec(), vec![a2, a1, b1, b2]);
    }

    proptest! {
        /// After arbitrary reorders, every bucket is exactly the list order
        /// filtered to its members, and membership never changes.
        #[test]
        fn buckets_always_mirror_list_order(moves in prop::collection::vec((0u8..6, prop::option::of(0u8..6)), 0..24)) {
            let mut list = ChildNodeEntries::new();
            let names = [name("a"), name("a"), name("b"), name("b"), name("b"), name("d")];
            let entries: Vec<EntryId> = (0..6u64).map(|i| id(i + 1)).collect();
            for (n, e) in names.iter().zip(&entries) {
                list.push(n, *e);
            }
            for (src, dst) in moves {
                let e = entries[src as usize];
                let before = dst.map(|d| entries[d as usize]);
                if before != Some(e) {
                    list.reorder(&names[src as usize], e, before).unwrap();
                }
            }
            prop_assert_eq!(list.to_vec().len(), entries.len());
            for n in [name("a"), name("b"), name("d")] {
                let expected: Vec<EntryId> = list
                    .to_vec()
                    .into_iter()
                    .filter(|e| {
                        let pos = entries.iter().position(|x| x == e).unwrap();
                        names[pos] == n
                    })
                    .collect();
                prop_assert_eq!(list.named(&n), expected.as_slice());
            }
        }
    }
}

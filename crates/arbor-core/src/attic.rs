//! Child attic.
//!
//! Parks children that were transiently moved out of a node. The entries stay
//! resolvable under their *old* workspace slot so that server events against
//! the old position still find them; matching against workspace identity is
//! the engine's job, the attic only holds the handles.

use crate::entry::EntryId;

#[derive(Default)]
pub(crate) struct ChildAttic {
    entries: Vec<EntryId>,
}

impl ChildAttic {
    pub(crate) fn add(&mut self, id: EntryId) {
        if !self.entries.contains(&id) {
            self.entries.push(id);
        }
    }

    pub(crate) fn remove(&mut self, id: EntryId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|&e| e != id);
        self.entries.len() != before
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = EntryId> + '_ {
        self.entries.iter().copied()
    }

    pub(crate) fn to_vec(&self) -> Vec<EntryId> {
        self.entries.clone()
    }
}

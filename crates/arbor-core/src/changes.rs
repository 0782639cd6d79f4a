//! Change collection and save completion.
//!
//! `collect_changes` walks a subtree and buckets every dirty entry into a
//! [`ChangeLog`]: new entries depth-first before the modifications, removals
//! last, each entry at most once. The session flushes the log to the server
//! and then calls `apply_persisted`, which drives the save transitions
//! through the state machine - which in turn lets revert ledgers dissolve
//! themselves.

use std::collections::HashSet;

use crate::entry::EntryId;
use crate::error::HierarchyError;
use crate::hierarchy::Hierarchy;
use crate::status::Status;

/// The staged changeset of one subtree, in flush order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChangeLog {
    added: Vec<EntryId>,
    modified: Vec<EntryId>,
    removed: Vec<EntryId>,
}

impl ChangeLog {
    pub fn added(&self) -> &[EntryId] {
        &self.added
    }

    pub fn modified(&self) -> &[EntryId] {
        &self.modified
    }

    pub fn removed(&self) -> &[EntryId] {
        &self.removed
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.removed.len()
    }

    /// All staged entries in flush order: additions, modifications, removals.
    pub fn iter(&self) -> impl Iterator<Item = EntryId> + '_ {
        self.added
            .iter()
            .chain(self.modified.iter())
            .chain(self.removed.iter())
            .copied()
    }
}

impl Hierarchy {
    /// Collect every dirty entry below (and including) `id`. With
    /// `throw_on_stale`, the first stale descendant aborts the collection;
    /// without it stale entries are skipped - they cannot be flushed.
    pub fn collect_changes(
        &self,
        id: EntryId,
        throw_on_stale: bool,
    ) -> Result<ChangeLog, HierarchyError> {
        let mut log = ChangeLog::default();
        let mut visited = HashSet::new();
        self.collect_rec(id, throw_on_stale, &mut log, &mut visited)?;
        Ok(log)
    }

    fn collect_rec(
        &self,
        id: EntryId,
        throw_on_stale: bool,
        log: &mut ChangeLog,
        visited: &mut HashSet<EntryId>,
    ) -> Result<(), HierarchyError> {
        if !visited.insert(id) {
            return Ok(());
        }
        let Ok(cell) = self.cell(id) else {
            return Ok(());
        };
        match cell.core().status {
            Status::New => log.added.push(id),
            Status::ExistingModified => log.modified.push(id),
            Status::ExistingRemoved => log.removed.push(id),
            Status::StaleModified | Status::StaleDestroyed => {
                if throw_on_stale {
                    return Err(HierarchyError::stale(format!(
                        "{id} cannot be saved; the workspace has diverged"
                    )));
                }
            }
            Status::Existing | Status::Invalidated | Status::Removed => {}
        }
        if cell.is_node() {
            // shadowed originals in the attic carry staged removals too
            let (attic_props, props, kids) = {
                let body = cell.body();
                (
                    body.properties_attic.values().copied().collect::<Vec<_>>(),
                    body.properties.values().copied().collect::<Vec<_>>(),
                    body.children.as_ref().map(|l| l.to_vec()).unwrap_or_default(),
                )
            };
            for e in attic_props {
                self.collect_rec(e, throw_on_stale, log, visited)?;
            }
            for e in props {
                self.collect_rec(e, throw_on_stale, log, visited)?;
            }
            for e in kids {
                self.collect_rec(e, throw_on_stale, log, visited)?;
            }
        }
        Ok(())
    }

    /// The session persisted the log: new and modified entries settle into
    /// `Existing` (dissolving their ledgers), staged removals become terminal,
    /// are detached, and their slots reaped.
    pub fn apply_persisted(&self, log: &ChangeLog) -> Result<(), HierarchyError> {
        for &id in &log.added {
            if self.status(id)? == Status::New {
                self.set_status(id, Status::Existing)?;
            }
        }
        for &id in &log.modified {
            if self.status(id)? == Status::ExistingModified {
                self.set_status(id, Status::Existing)?;
            }
        }
        for &id in &log.removed {
            let Ok(cell) = self.cell(id) else {
                continue;
            };
            if cell.core().status != Status::ExistingRemoved {
                continue;
            }
            self.set_status(id, Status::Removed)?;
            let (parent, name) = {
                let core = cell.core();
                (core.parent, core.name.clone())
            };
            if let Some(p) = parent {
                self.detach_from_parent(p, &name, id)?;
            }
            self.store.reap(id);
        }
        Ok(())
    }
}

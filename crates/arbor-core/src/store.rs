//! Entry store.
//!
//! The arena that owns every cell in the session. Handles are minted
//! monotonically and never reused, so a handle stays unambiguous for the whole
//! session; a reaped handle simply stops resolving. The unique-id index is
//! maintained here - workspace events frequently address nodes by opaque id,
//! not by path - and is locked independently of the slot table. The slot
//! table lock is only ever held to resolve a handle, never across an entry
//! lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tracing::debug;

use arbor_spi::id::UniqueId;
use arbor_spi::name::Name;

use crate::entry::{EntryCell, EntryId, EntryKind};
use crate::status::Status;

pub(crate) struct EntryStore {
    slots: RwLock<HashMap<EntryId, Arc<EntryCell>>>,
    next: AtomicU64,
    by_unique_id: Mutex<HashMap<UniqueId, EntryId>>,
}

impl EntryStore {
    pub(crate) fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            next: AtomicU64::new(1),
            by_unique_id: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn allocate_node(
        &self,
        parent: Option<EntryId>,
        name: Name,
        unique_id: Option<UniqueId>,
        status: Status,
    ) -> Arc<EntryCell> {
        let id = EntryId::from_raw(self.next.fetch_add(1, Ordering::Relaxed));
        let cell = Arc::new(EntryCell::new(
            id,
            EntryKind::Node,
            parent,
            name,
            unique_id.clone(),
            status,
        ));
        self.slots
            .write()
            .expect("entry slot table lock poisoned")
            .insert(id, Arc::clone(&cell));
        if let Some(uid) = unique_id {
            self.by_unique_id
                .lock()
                .expect("unique id index lock poisoned")
                .insert(uid, id);
        }
        cell
    }

    pub(crate) fn allocate_property(
        &self,
        parent: EntryId,
        name: Name,
        status: Status,
    ) -> Arc<EntryCell> {
        let id = EntryId::from_raw(self.next.fetch_add(1, Ordering::Relaxed));
        let cell = Arc::new(EntryCell::new(
            id,
            EntryKind::Property,
            Some(parent),
            name,
            None,
            status,
        ));
        self.slots
            .write()
            .expect("entry slot table lock poisoned")
            .insert(id, Arc::clone(&cell));
        cell
    }

    pub(crate) fn get(&self, id: EntryId) -> Option<Arc<EntryCell>> {
        self.slots
            .read()
            .expect("entry slot table lock poisoned")
            .get(&id)
            .cloned()
    }

    pub(crate) fn lookup_by_unique_id(&self, uid: &UniqueId) -> Option<EntryId> {
        self.by_unique_id
            .lock()
            .expect("unique id index lock poisoned")
            .get(uid)
            .copied()
    }

    /// Re-index after a unique id change on `id`.
    pub(crate) fn notify_id_change(
        &self,
        id: EntryId,
        old: Option<&UniqueId>,
        new: Option<&UniqueId>,
    ) {
        let mut index = self
            .by_unique_id
            .lock()
            .expect("unique id index lock poisoned");
        if let Some(old) = old {
            if index.get(old) == Some(&id) {
                index.remove(old);
            }
        }
        if let Some(new) = new {
            index.insert(new.clone(), id);
        }
    }

    /// Drop a terminal entry's slot. The handle stops resolving.
    pub(crate) fn reap(&self, id: EntryId) -> bool {
        let removed = self
            .slots
            .write()
            .expect("entry slot table lock poisoned")
            .remove(&id);
        let Some(cell) = removed else {
            return false;
        };
        if let Some(uid) = cell.core().unique_id.as_ref() {
            let mut index = self
                .by_unique_id
                .lock()
                .expect("unique id index lock poisoned");
            if index.get(uid) == Some(&id) {
                index.remove(uid);
            }
        }
        debug!(entry = %id, "reaped entry");
        true
    }

    pub(crate) fn len(&self) -> usize {
        self.slots
            .read()
            .expect("entry slot table lock poisoned")
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Name {
        Name::plain(s).unwrap()
    }

    fn uid(s: &str) -> UniqueId {
        UniqueId::new(s).unwrap()
    }

    #[test]
    fn allocation_indexes_unique_ids() {
        let store = EntryStore::new();
        let root = store.allocate_node(None, Name::root(), None, Status::Existing);
        let a = store.allocate_node(
            Some(root.id),
            name("a"),
            Some(uid("u-a")),
            Status::Existing,
        );
        assert_eq!(store.lookup_by_unique_id(&uid("u-a")), Some(a.id));
        assert_eq!(store.lookup_by_unique_id(&uid("u-b")), None);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn id_change_moves_the_index_slot() {
        let store = EntryStore::new();
        let root = store.allocate_node(None, Name::root(), None, Status::Existing);
        let a = store.allocate_node(
            Some(root.id),
            name("a"),
            Some(uid("u-1")),
            Status::Existing,
        );
        store.notify_id_change(a.id, Some(&uid("u-1")), Some(&uid("u-2")));
        assert_eq!(store.lookup_by_unique_id(&uid("u-1")), None);
        assert_eq!(store.lookup_by_unique_id(&uid("u-2")), Some(a.id));
    }

    #[test]
    fn reap_drops_slot_and_index() {
        let store = EntryStore::new();
        let root = store.allocate_node(None, Name::root(), None, Status::Existing);
        let a = store.allocate_node(
            Some(root.id),
            name("a"),
            Some(uid("u-a")),
            Status::Existing,
        );
        assert!(store.reap(a.id));
        assert!(!store.reap(a.id));
        assert!(store.get(a.id).is_none());
        assert_eq!(store.lookup_by_unique_id(&uid("u-a")), None);
        // handles are never reused
        let b = store.allocate_node(Some(root.id), name("b"), None, Status::Existing);
        assert_ne!(a.id, b.id);
    }
}

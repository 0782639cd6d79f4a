//! External change notifications.
//!
//! The server's observation feed, as delivered to a session: one event per
//! changed item, carrying the item's id and its absolute workspace path at the
//! time of the change.

use crate::id::ItemId;
use crate::path::Path;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    NodeAdded,
    NodeRemoved,
    PropertyAdded,
    PropertyRemoved,
    PropertyChanged,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    kind: EventKind,
    item_id: ItemId,
    path: Path,
}

impl Event {
    pub fn new(kind: EventKind, item_id: ItemId, path: Path) -> Self {
        Self {
            kind,
            item_id,
            path,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn item_id(&self) -> &ItemId {
        &self.item_id
    }

    /// Absolute workspace path of the changed item.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

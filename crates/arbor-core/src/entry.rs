//! Entry cells.
//!
//! One cell per in-memory item. The shared core (parent link, name, status,
//! resolved payload) sits behind its own lock; a node's collections (children,
//! attics, revert ledger) behind a second. Lock order within one entry is core
//! after body; across entries, parent before child, and unrelated pairs in
//! handle order. Cells are owned by the store and addressed by handle -
//! parent links are non-owning.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use arbor_spi::id::UniqueId;
use arbor_spi::name::Name;
use arbor_spi::state::{NodeState, PropertyState};

use crate::attic::ChildAttic;
use crate::children::ChildNodeEntries;
use crate::revert::RevertInfo;
use crate::status::Status;

/// Stable handle into the entry store. Handles are minted monotonically and
/// never reused; a reaped handle resolves to nothing.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(u64);

impl EntryId {
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryId({})", self.0)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entry#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum EntryKind {
    Node,
    Property,
}

/// Resolved payload, tagged by entry kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Payload {
    Node(NodeState),
    Property(PropertyState),
}

impl Payload {
    pub(crate) fn as_node(&self) -> Option<&NodeState> {
        match self {
            Payload::Node(state) => Some(state),
            Payload::Property(_) => None,
        }
    }

    pub(crate) fn as_node_mut(&mut self) -> Option<&mut NodeState> {
        match self {
            Payload::Node(state) => Some(state),
            Payload::Property(_) => None,
        }
    }

    pub(crate) fn as_property(&self) -> Option<&PropertyState> {
        match self {
            Payload::Property(state) => Some(state),
            Payload::Node(_) => None,
        }
    }

    pub(crate) fn as_property_mut(&mut self) -> Option<&mut PropertyState> {
        match self {
            Payload::Property(state) => Some(state),
            Payload::Node(_) => None,
        }
    }
}

/// Listener tags for the per-entry intrusive list. The revert ledger is the
/// only engine-internal listener; it registers itself when created and is
/// removed when the ledger is disposed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum StatusListener {
    RevertLedger,
}

/// Identity and payload of an entry.
pub(crate) struct EntryCore {
    pub parent: Option<EntryId>,
    pub name: Name,
    pub status: Status,
    pub unique_id: Option<UniqueId>,
    pub payload: Option<Payload>,
    /// Workspace snapshot taken on the first transient payload modification;
    /// restored on revert, dropped on save.
    pub pristine: Option<Payload>,
    pub listeners: Vec<StatusListener>,
}

/// A node's collections. The property tables iterate in name order so that
/// subtree walks (change collection above all) are deterministic.
#[derive(Default)]
pub(crate) struct NodeBody {
    /// `None` until the child list has been read for the first time.
    pub children: Option<ChildNodeEntries>,
    pub child_attic: ChildAttic,
    pub properties: BTreeMap<Name, EntryId>,
    pub properties_attic: BTreeMap<Name, EntryId>,
    pub revert: Option<RevertInfo>,
}

pub(crate) struct EntryCell {
    pub id: EntryId,
    pub kind: EntryKind,
    core: RwLock<EntryCore>,
    body: Option<RwLock<NodeBody>>,
}

impl EntryCell {
    pub(crate) fn new(
        id: EntryId,
        kind: EntryKind,
        parent: Option<EntryId>,
        name: Name,
        unique_id: Option<UniqueId>,
        status: Status,
    ) -> Self {
        let body = match kind {
            EntryKind::Node => Some(RwLock::new(NodeBody::default())),
            EntryKind::Property => None,
        };
        Self {
            id,
            kind,
            core: RwLock::new(EntryCore {
                parent,
                name,
                status,
                unique_id,
                payload: None,
                pristine: None,
                listeners: Vec::new(),
            }),
            body,
        }
    }

    pub(crate) fn is_node(&self) -> bool {
        self.kind == EntryKind::Node
    }

    pub(crate) fn core(&self) -> RwLockReadGuard<'_, EntryCore> {
        eprintln!("DBG core() req id={:?}", self.id);
        let g = self.core.read().expect("entry core lock poisoned");
        eprintln!("DBG core() got id={:?}", self.id);
        g
    }

    pub(crate) fn core_mut(&self) -> RwLockWriteGuard<'_, EntryCore> {
        eprintln!("DBG core_mut() req id={:?}", self.id);
        let g = self.core.write().expect("entry core lock poisoned");
        eprintln!("DBG core_mut() got id={:?}", self.id);
        g
    }

    /// Node body. Calling this on a property entry is an engine bug.
    pub(crate) fn body(&self) -> RwLockReadGuard<'_, NodeBody> {
        eprintln!("DBG body() req id={:?}", self.id);
        let g = self.body
            .as_ref()
            .expect("node body requested on property entry")
            .read()
            .expect("node body lock poisoned");
        eprintln!("DBG body() got id={:?}", self.id);
        g
    }

    pub(crate) fn body_mut(&self) -> RwLockWriteGuard<'_, NodeBody> {
        eprintln!("DBG body_mut() req id={:?}", self.id);
        let g = self.body
            .as_ref()
            .expect("node body requested on property entry")
            .write()
            .expect("node body lock poisoned");
        eprintln!("DBG body_mut() got id={:?}", self.id);
        g
    }
}

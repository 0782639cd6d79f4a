//! The hierarchy engine.
//!
//! One [`Hierarchy`] per session. It owns the entry store and the collaborator
//! handles, and serializes every mutation through entry locks: parent before
//! child, unrelated parents in handle order, store locks never held across an
//! entry lock. Remote calls (`load`/`reload` of child lists, deep resolution,
//! payload resolution) happen with no locks held - callers snapshot, release,
//! call, and re-validate, so a racing external event observes either the old
//! or the new state, never a torn one.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use arbor_spi::id::{IdFactory, ItemId, NodeId, UniqueId};
use arbor_spi::name::Name;
use arbor_spi::path::{Path, PathSegment};
use arbor_spi::provider::{ChildInfo, RemoteProvider};
use arbor_spi::state::{NodeDefinition, NodeState, PropertyDefinition, PropertyState, Value};

use crate::children::{ChildListStatus, ChildNodeEntries};
use crate::entry::{EntryCell, EntryId, NodeBody, Payload, StatusListener};
use crate::error::{HierarchyError, InternalError};
use crate::revert::RevertInfo;
use crate::status::Status;
use crate::store::EntryStore;

/// Terminal state an entry lands in when the workspace destroys it: a dirty
/// entry turns stale, a clean one is simply gone.
fn destroyed_status(from: Status) -> Status {
    match from {
        Status::ExistingModified | Status::ExistingRemoved | Status::StaleModified => {
            Status::StaleDestroyed
        }
        _ => Status::Removed,
    }
}

pub struct Hierarchy {
    pub(crate) store: EntryStore,
    pub(crate) provider: Arc<dyn RemoteProvider>,
    pub(crate) ids: Arc<dyn IdFactory>,
    root: EntryId,
}

impl Hierarchy {
    pub fn new(provider: Arc<dyn RemoteProvider>, ids: Arc<dyn IdFactory>) -> Self {
        let store = EntryStore::new();
        let root = store
            .allocate_node(None, Name::root(), None, Status::Existing)
            .id;
        Self {
            store,
            provider,
            ids,
            root,
        }
    }

    pub fn root(&self) -> EntryId {
        self.root
    }

    pub(crate) fn cell(&self, id: EntryId) -> Result<Arc<EntryCell>, HierarchyError> {
        self.store
            .get(id)
            .ok_or_else(|| HierarchyError::not_found(id))
    }

    pub(crate) fn node_cell(&self, id: EntryId) -> Result<Arc<EntryCell>, HierarchyError> {
        let cell = self.cell(id)?;
        if cell.is_node() {
            Ok(cell)
        } else {
            Err(InternalError::KindMismatch {
                id,
                expected: "node",
            }
            .into())
        }
    }

    //---------------------------------------------------------< accessors >---

    pub fn is_node(&self, id: EntryId) -> Result<bool, HierarchyError> {
        Ok(self.cell(id)?.is_node())
    }

    pub fn status(&self, id: EntryId) -> Result<Status, HierarchyError> {
        Ok(self.cell(id)?.core().status)
    }

    pub fn name(&self, id: EntryId) -> Result<Name, HierarchyError> {
        Ok(self.cell(id)?.core().name.clone())
    }

    pub fn parent(&self, id: EntryId) -> Result<Option<EntryId>, HierarchyError> {
        Ok(self.cell(id)?.core().parent)
    }

    pub fn unique_id(&self, id: EntryId) -> Result<Option<UniqueId>, HierarchyError> {
        Ok(self.cell(id)?.core().unique_id.clone())
    }

    /// Resolve a node entry by its workspace-stable unique id.
    pub fn entry_by_unique_id(&self, uid: &UniqueId) -> Option<EntryId> {
        self.store.lookup_by_unique_id(uid)
    }

    /// Number of live cells in the store, reaped entries excluded.
    pub fn entry_count(&self) -> usize {
        self.store.len()
    }

    pub fn has_revert_info(&self, id: EntryId) -> Result<bool, HierarchyError> {
        Ok(self.node_cell(id)?.body().revert.is_some())
    }

    pub fn is_transiently_moved(&self, id: EntryId) -> Result<bool, HierarchyError> {
        Ok(self.is_transiently_moved_cell(&self.node_cell(id)?))
    }

    pub(crate) fn is_transiently_moved_cell(&self, cell: &Arc<EntryCell>) -> bool {
        if !cell.is_node() {
            return false;
        }
        let snapshot = {
            let body = cell.body();
            body.revert
                .as_ref()
                .map(|r| (r.old_parent, r.old_name.clone()))
        };
        match snapshot {
            None => false,
            Some((old_parent, old_name)) => {
                let core = cell.core();
                old_parent != core.parent || old_name != core.name
            }
        }
    }

    pub fn child_attic_entries(&self, id: EntryId) -> Result<Vec<EntryId>, HierarchyError> {
        Ok(self.node_cell(id)?.body().child_attic.to_vec())
    }

    pub fn property_attic_entry(
        &self,
        id: EntryId,
        name: &Name,
    ) -> Result<Option<EntryId>, HierarchyError> {
        Ok(self.node_cell(id)?.body().properties_attic.get(name).copied())
    }

    pub fn property_attic_is_empty(&self, id: EntryId) -> Result<bool, HierarchyError> {
        Ok(self.node_cell(id)?.body().properties_attic.is_empty())
    }

    //---------------------------------------------< index / identity views >---

    /// 1-based same-name-sibling index in the session's view. Always 1 for
    /// the root and for definitions that forbid same-name siblings; otherwise
    /// derived from bucket position over valid entries, never cached.
    pub fn index_of(&self, id: EntryId) -> Result<u32, HierarchyError> {
        eprintln!("DBG >>> index_of");
        let cell = self.node_cell(id)?;
        let (parent, allows_sns) = {
            let core = cell.core();
            let sns = core
                .payload
                .as_ref()
                .and_then(Payload::as_node)
                .map(|n| n.definition().allows_sns)
                .unwrap_or(true);
            (core.parent, sns)
        };
        let Some(parent) = parent else {
            return Ok(1);
        };
        if !allows_sns {
            return Ok(1);
        }
        self.position_in_parent(parent, id)
    }

    fn position_in_parent(&self, parent: EntryId, child: EntryId) -> Result<u32, HierarchyError> {
        eprintln!("DBG >>> position_in_parent");
        let child_name = self.cell(child)?.core().name.clone();
        let pcell = self.node_cell(parent)?;
        let body = pcell.body();
        let Some(children) = body.children.as_ref() else {
            return Err(InternalError::ParentMismatch { id: child }.into());
        };
        let mut index = 1u32;
        for e in children.named(&child_name) {
            if *e == child {
                return Ok(index);
            }
            if self.cell(*e)?.core().status.is_valid() {
                index += 1;
            }
        }
        Err(InternalError::ParentMismatch { id: child }.into())
    }

    /// The slot the workspace still sees: the revert ledger's snapshot when
    /// one exists, the live identity otherwise.
    pub(crate) fn workspace_slot(
        &self,
        cell: &Arc<EntryCell>,
    ) -> Result<(Option<EntryId>, Name, u32), HierarchyError> {
        eprintln!("DBG >>> workspace_slot");
        if cell.is_node() {
            let snapshot = {
                let body = cell.body();
                body.revert
                    .as_ref()
                    .map(|r| (r.old_parent, r.old_name.clone(), r.old_index))
            };
            if let Some(s) = snapshot {
                return Ok(s);
            }
        }
        let (parent, name) = {
            let core = cell.core();
            (core.parent, core.name.clone())
        };
        let index = if cell.is_node() && parent.is_some() {
            self.index_of(cell.id)?
        } else {
            1
        };
        Ok((parent, name, index))
    }

    /// Does this entry's *workspace* identity match the given slot? Used by
    /// attic lookup and event correlation.
    pub fn matches_workspace(
        &self,
        id: EntryId,
        name: &Name,
        index: u32,
    ) -> Result<bool, HierarchyError> {
        let cell = self.cell(id)?;
        let (_, ws_name, ws_index) = self.workspace_slot(&cell)?;
        Ok(&ws_name == name && ws_index == index)
    }

    /// Transient identity: unique id when present, `(parent_id, name, index)`
    /// otherwise.
    pub fn item_id(&self, id: EntryId) -> Result<ItemId, HierarchyError> {
        let cell = self.cell(id)?;
        if cell.is_node() {
            return Ok(ItemId::Node(self.build_node_id(id, false)?));
        }
        let (parent, name) = {
            let core = cell.core();
            (core.parent, core.name.clone())
        };
        let parent = parent.ok_or(InternalError::ParentMismatch { id })?;
        let parent_id = self.build_node_id(parent, false)?;
        Ok(ItemId::Property(self.ids.property_id(parent_id, name)))
    }

    /// Identity as the server currently sees it, reconstructed by unwinding
    /// revert ledgers without performing them.
    pub fn workspace_item_id(&self, id: EntryId) -> Result<ItemId, HierarchyError> {
        let cell = self.cell(id)?;
        if cell.is_node() {
            return Ok(ItemId::Node(self.build_node_id(id, true)?));
        }
        let (parent, name) = {
            let core = cell.core();
            (core.parent, core.name.clone())
        };
        let parent = parent.ok_or(InternalError::ParentMismatch { id })?;
        let parent_id = self.build_node_id(parent, true)?;
        Ok(ItemId::Property(self.ids.property_id(parent_id, name)))
    }

    pub fn node_id_of(&self, id: EntryId) -> Result<NodeId, HierarchyError> {
        self.build_node_id(id, false)
    }

    pub fn workspace_node_id(&self, id: EntryId) -> Result<NodeId, HierarchyError> {
        self.build_node_id(id, true)
    }

    fn build_node_id(&self, id: EntryId, workspace: bool) -> Result<NodeId, HierarchyError> {
        eprintln!("DBG >>> build_node_id");
        let cell = self.node_cell(id)?;
        if let Some(uid) = cell.core().unique_id.clone() {
            // unique ids survive moves; both views coincide
            return Ok(self.ids.node_id_from_unique(uid));
        }
        let (parent, name, index) = if workspace {
            self.workspace_slot(&cell)?
        } else {
            let (parent, name) = {
                let core = cell.core();
                (core.parent, core.name.clone())
            };
            match parent {
                None => return Ok(self.ids.root_node_id()),
                Some(_) => (parent, name, self.index_of(id)?),
            }
        };
        let Some(parent) = parent else {
            return Ok(self.ids.root_node_id());
        };
        let parent_id = self.build_node_id(parent, workspace)?;
        let segment = segment_for(name, index)?;
        Ok(self.ids.node_id(&parent_id, &Path::relative(vec![segment])))
    }

    /// Absolute path of the entry, in the transient or the workspace view.
    pub fn path_of(&self, id: EntryId, workspace: bool) -> Result<Path, HierarchyError> {
        let cell = self.cell(id)?;
        let mut segments: Vec<PathSegment> = Vec::new();
        let mut cursor = if cell.is_node() {
            Some(id)
        } else {
            let (parent, name) = {
                let core = cell.core();
                (core.parent, core.name.clone())
            };
            segments.push(PathSegment::new(name));
            Some(parent.ok_or(InternalError::ParentMismatch { id })?)
        };
        while let Some(eid) = cursor {
            let ecell = self.node_cell(eid)?;
            let (parent, name, index) = if workspace {
                self.workspace_slot(&ecell)?
            } else {
                let (parent, name) = {
                    let core = ecell.core();
                    (core.parent, core.name.clone())
                };
                match parent {
                    None => break,
                    Some(_) => (parent, name, self.index_of(eid)?),
                }
            };
            if parent.is_none() {
                break;
            }
            segments.push(segment_for(name, index)?);
            cursor = parent;
        }
        segments.reverse();
        Ok(Path::root().join(&Path::relative(segments)))
    }

    //----------------------------------------------------< child list load >---

    /// Make the child list current: first read loads it, an invalidated list
    /// is re-merged against a fresh server listing. Remote I/O happens with
    /// no locks held.
    pub(crate) fn ensure_children_loaded(&self, id: EntryId) -> Result<(), HierarchyError> {
        eprintln!("DBG >>> ensure_children_loaded");
        let cell = self.node_cell(id)?;
        let current = {
            let body = cell.body();
            match body.children.as_ref() {
                None => None,
                Some(list) => Some(list.status()),
            }
        };
        if current == Some(ChildListStatus::Ok) {
            return Ok(());
        }
        let status = cell.core().status;
        if status == Status::New || status.is_terminal() {
            // nothing to fetch for entries the workspace does not know
            let mut body = cell.body_mut();
            body.children
                .get_or_insert_with(ChildNodeEntries::new)
                .set_status(ChildListStatus::Ok);
            return Ok(());
        }
        let workspace_id = self.build_node_id(id, true)?;
        let infos = match self.provider.child_infos(&workspace_id) {
            Ok(infos) => infos,
            Err(e) if e.is_not_found() => {
                debug!(entry = %id, "node no longer exists; removing entry on reload");
                self.remove_entry_internal(id)?;
                return Err(HierarchyError::stale(format!(
                    "{workspace_id} no longer exists on the workspace"
                )));
            }
            Err(e) => return Err(e.into()),
        };
        self.merge_children(id, infos)
    }

    /// Two-pass merge of a server listing into the local list, preserving
    /// local edits: first bubble locally-known entries into server order,
    /// then insert unknown server entries before the next known one. Entries
    /// the server no longer lists are left to the event stream.
    fn merge_children(
        &self,
        id: EntryId,
        infos: Vec<ChildInfo>,
    ) -> Result<(), HierarchyError> {
        let cell = self.node_cell(id)?;
        let mut body = cell.body_mut();
        let had_list = body.children.is_some();
        let list = body.children.get_or_insert_with(ChildNodeEntries::new);
        if had_list && list.status() == ChildListStatus::Ok {
            // another reader finished the merge while we were fetching
            return Ok(());
        }

        let mut previous: Option<(EntryId, Name)> = None;
        for ci in &infos {
            if let Some(current) = self.resolve_child_info(list, ci)? {
                if let Some((prev, prev_name)) = previous {
                    if prev != current && list.reorder(&prev_name, prev, Some(current)).is_err() {
                        warn!(entry = %id, "reload merge could not restore server order");
                    }
                }
                previous = Some((current, self.cell(current)?.core().name.clone()));
            }
        }

        let mut pending: Vec<ChildInfo> = Vec::new();
        for ci in &infos {
            match self.resolve_child_info(list, ci)? {
                None => pending.push(ci.clone()),
                Some(before) => {
                    for p in pending.drain(..) {
                        let entry = self.store.allocate_node(
                            Some(id),
                            p.name().clone(),
                            p.unique_id().cloned(),
                            Status::Existing,
                        );
                        list.insert_before(p.name(), entry.id, before);
                    }
                }
            }
        }
        for p in pending {
            let entry = self.store.allocate_node(
                Some(id),
                p.name().clone(),
                p.unique_id().cloned(),
                Status::Existing,
            );
            list.push(p.name(), entry.id);
        }
        list.set_status(ChildListStatus::Ok);
        Ok(())
    }

    /// Resolve one server row against the local list: by unique id when the
    /// row carries one, else by position among workspace-known entries of the
    /// same name. Transiently moved entries only match through their id.
    fn resolve_child_info(
        &self,
        list: &ChildNodeEntries,
        ci: &ChildInfo,
    ) -> Result<Option<EntryId>, HierarchyError> {
        if let Some(uid) = ci.unique_id() {
            for e in list.named(ci.name()) {
                if self.cell(*e)?.core().unique_id.as_ref() == Some(uid) {
                    return Ok(Some(*e));
                }
            }
            return Ok(None);
        }
        let mut position = 1u32;
        for e in list.named(ci.name()) {
            let cell = self.cell(*e)?;
            let status = cell.core().status;
            if status == Status::New || status.is_terminal() {
                continue;
            }
            if self.is_transiently_moved_cell(&cell) {
                continue;
            }
            if position == ci.index() {
                return Ok(Some(*e));
            }
            position += 1;
        }
        Ok(None)
    }

    //-------------------------------------------------------------< queries >---

    pub fn node_entry(
        &self,
        parent: EntryId,
        name: &Name,
        index: u32,
    ) -> Result<Option<EntryId>, HierarchyError> {
        self.ensure_children_loaded(parent)?;
        let cell = self.node_cell(parent)?;
        let body = cell.body();
        self.valid_child(&body, name, index)
    }

    pub(crate) fn valid_child(
        &self,
        body: &NodeBody,
        name: &Name,
        index: u32,
    ) -> Result<Option<EntryId>, HierarchyError> {
        eprintln!("DBG >>> valid_child");
        let Some(list) = body.children.as_ref() else {
            return Ok(None);
        };
        let mut position = 1u32;
        for e in list.named(name) {
            if self.cell(*e)?.core().status.is_valid() {
                if position == index {
                    return Ok(Some(*e));
                }
                position += 1;
            }
        }
        Ok(None)
    }

    pub fn node_entries(&self, parent: EntryId) -> Result<Vec<EntryId>, HierarchyError> {
        self.ensure_children_loaded(parent)?;
        let cell = self.node_cell(parent)?;
        let snapshot = {
            let body = cell.body();
            body.children.as_ref().map(|l| l.to_vec()).unwrap_or_default()
        };
        let mut out = Vec::with_capacity(snapshot.len());
        for e in snapshot {
            if self.cell(e)?.core().status.is_valid() {
                out.push(e);
            }
        }
        Ok(out)
    }

    pub fn node_entries_named(
        &self,
        parent: EntryId,
        name: &Name,
    ) -> Result<Vec<EntryId>, HierarchyError> {
        self.ensure_children_loaded(parent)?;
        let cell = self.node_cell(parent)?;
        let snapshot = {
            let body = cell.body();
            body.children
                .as_ref()
                .map(|l| l.named(name).to_vec())
                .unwrap_or_default()
        };
        let mut out = Vec::with_capacity(snapshot.len());
        for e in snapshot {
            if self.cell(e)?.core().status.is_valid() {
                out.push(e);
            }
        }
        Ok(out)
    }

    /// Child lookup by identifier: unique id when the id carries one, else
    /// name and index from the id's final path segment.
    pub fn node_entry_by_id(
        &self,
        parent: EntryId,
        child_id: &NodeId,
    ) -> Result<Option<EntryId>, HierarchyError> {
        self.ensure_children_loaded(parent)?;
        let cell = self.node_cell(parent)?;
        let body = cell.body();
        if child_id.is_unique_only() {
            let Some(uid) = child_id.unique_id() else {
                return Ok(None);
            };
            let Some(list) = body.children.as_ref() else {
                return Ok(None);
            };
            for e in list.iter() {
                let ecell = self.cell(e)?;
                let core = ecell.core();
                if core.unique_id.as_ref() == Some(uid) && core.status.is_valid() {
                    return Ok(Some(e));
                }
            }
            return Ok(None);
        }
        let Some(segment) = child_id.path().and_then(|p| p.last()) else {
            return Ok(None);
        };
        self.valid_child(&body, segment.name(), segment.normalized_index())
    }

    pub fn has_node_entry(&self, parent: EntryId, name: &Name) -> Result<bool, HierarchyError> {
        Ok(!self.node_entries_named(parent, name)?.is_empty())
    }

    pub fn has_node_entry_indexed(
        &self,
        parent: EntryId,
        name: &Name,
        index: u32,
    ) -> Result<bool, HierarchyError> {
        Ok(self.node_entry(parent, name, index)?.is_some())
    }

    pub fn property_entry(
        &self,
        parent: EntryId,
        name: &Name,
    ) -> Result<Option<EntryId>, HierarchyError> {
        let cell = self.node_cell(parent)?;
        let entry = { cell.body().properties.get(name).copied() };
        match entry {
            Some(e) if self.cell(e)?.core().status.is_valid() => Ok(Some(e)),
            _ => Ok(None),
        }
    }

    pub fn has_property_entry(
        &self,
        parent: EntryId,
        name: &Name,
    ) -> Result<bool, HierarchyError> {
        Ok(self.property_entry(parent, name)?.is_some())
    }

    pub fn property_entries(&self, parent: EntryId) -> Result<Vec<EntryId>, HierarchyError> {
        let cell = self.node_cell(parent)?;
        let (snapshot, status) = {
            let body = cell.body();
            (
                body.properties.values().copied().collect::<Vec<_>>(),
                cell.core().status,
            )
        };
        if status != Status::ExistingModified {
            // no transient removals can hide in a clean property table
            return Ok(snapshot);
        }
        let mut out = Vec::with_capacity(snapshot.len());
        for e in snapshot {
            if self.cell(e)?.core().status.is_valid() {
                out.push(e);
            }
        }
        Ok(out)
    }

    //------------------------------------------------------------< mutators >---

    /// Reference a child the workspace already holds (load and event lane).
    pub fn add_node(
        &self,
        parent: EntryId,
        name: Name,
        unique_id: Option<UniqueId>,
        index: Option<u32>,
    ) -> Result<EntryId, HierarchyError> {
        self.ensure_children_loaded(parent)?;
        let cell = self.node_cell(parent)?;
        let mut body = cell.body_mut();
        let entry = self
            .store
            .allocate_node(Some(parent), name.clone(), unique_id, Status::Existing);
        let list = body.children.get_or_insert_with(ChildNodeEntries::new);
        match index {
            Some(i) => list.insert_at_bucket_index(&name, entry.id, i),
            None => list.push(&name, entry.id),
        }
        Ok(entry.id)
    }

    /// Create a node in this session (edit lane): status `New`, fresh payload.
    pub fn add_new_node(
        &self,
        parent: EntryId,
        name: Name,
        unique_id: Option<UniqueId>,
        primary_type: Name,
        definition: NodeDefinition,
    ) -> Result<EntryId, HierarchyError> {
        self.ensure_children_loaded(parent)?;
        let cell = self.node_cell(parent)?;
        if !definition.allows_sns {
            let body = cell.body();
            if let Some(list) = body.children.as_ref() {
                for e in list.named(&name) {
                    if self.cell(*e)?.core().status.is_valid() {
                        return Err(HierarchyError::Exists {
                            name: name.to_string(),
                        });
                    }
                }
            }
        }
        let entry =
            self.store
                .allocate_node(Some(parent), name.clone(), unique_id, Status::New);
        entry.core_mut().payload = Some(Payload::Node(NodeState::new(primary_type, definition)));
        {
            let mut body = cell.body_mut();
            body.children
                .get_or_insert_with(ChildNodeEntries::new)
                .push(&name, entry.id);
        }
        self.mark_modified(parent)?;
        Ok(entry.id)
    }

    /// Reference a property the workspace already holds. Idempotent for a
    /// live entry of the same name.
    pub fn add_property(&self, parent: EntryId, name: Name) -> Result<EntryId, HierarchyError> {
        let cell = self.node_cell(parent)?;
        let mut body = cell.body_mut();
        if let Some(&existing) = body.properties.get(&name) {
            if !self.cell(existing)?.core().status.is_terminal() {
                return Ok(existing);
            }
        }
        let entry = self
            .store
            .allocate_property(parent, name.clone(), Status::Existing);
        body.properties.insert(name, entry.id);
        Ok(entry.id)
    }

    /// Create a property in this session. A transiently removed property of
    /// the same name is parked in the attic and shadowed by the new entry; a
    /// live one rejects the add.
    pub fn add_new_property(
        &self,
        parent: EntryId,
        name: Name,
        definition: PropertyDefinition,
    ) -> Result<EntryId, HierarchyError> {
        let cell = self.node_cell(parent)?;
        let new_entry = {
            let mut body = cell.body_mut();
            if let Some(&existing) = body.properties.get(&name) {
                let status = self.cell(existing)?.core().status;
                if status.is_terminal() {
                    body.properties.remove(&name);
                } else if status == Status::ExistingRemoved {
                    body.properties_attic.insert(name.clone(), existing);
                } else {
                    return Err(HierarchyError::Exists {
                        name: name.to_string(),
                    });
                }
            }
            let entry = self
                .store
                .allocate_property(parent, name.clone(), Status::New);
            entry.core_mut().payload =
                Some(Payload::Property(PropertyState::empty(definition)));
            body.properties.insert(name.clone(), entry.id);
            entry.id
        };
        self.mark_modified(parent)?;
        Ok(new_entry)
    }

    /// Synchronize the property table against a server-provided name set.
    /// Missing names are added; surplus entries are removed only while the
    /// node's payload is unresolved or invalidated - otherwise the surplus is
    /// transient local state.
    pub fn add_property_entries(
        &self,
        parent: EntryId,
        names: Vec<Name>,
    ) -> Result<(), HierarchyError> {
        let cell = self.node_cell(parent)?;
        let (missing, surplus) = {
            let body = cell.body();
            let known: HashSet<&Name> = body.properties.keys().collect();
            let wanted: HashSet<&Name> = names.iter().collect();
            let missing: Vec<Name> = names
                .iter()
                .filter(|n| !known.contains(*n))
                .cloned()
                .collect();
            let surplus: Vec<Name> = body
                .properties
                .keys()
                .filter(|n| !wanted.contains(*n))
                .cloned()
                .collect();
            (missing, surplus)
        };
        for name in missing {
            self.add_property(parent, name)?;
        }
        let prune = {
            let core = cell.core();
            core.payload.is_none() || core.status == Status::Invalidated
        };
        if prune {
            for name in surplus {
                let entry = { cell.body().properties.get(&name).copied() };
                if let Some(e) = entry {
                    self.remove_entry_internal(e)?;
                }
            }
        }
        Ok(())
    }

    /// Detach a property entry from the table (or from the attic, for a
    /// shadowed original). `jcr:uuid` and `jcr:mixinTypes` propagate their
    /// removal to the owning node.
    pub fn remove_property(
        &self,
        parent: EntryId,
        name: &Name,
    ) -> Result<Option<EntryId>, HierarchyError> {
        let cell = self.node_cell(parent)?;
        let detached = {
            let mut body = cell.body_mut();
            match body.properties.remove(name) {
                Some(e) => Some(e),
                None => body.properties_attic.remove(name),
            }
        };
        if detached.is_some() && name.is_uuid_or_mixin() {
            self.clear_uuid_mixin(parent, name)?;
        }
        Ok(detached)
    }

    /// Update the unique id and re-index the store (`jcr:uuid` side-effect).
    pub fn set_unique_id(
        &self,
        id: EntryId,
        unique_id: Option<UniqueId>,
    ) -> Result<(), HierarchyError> {
        let cell = self.node_cell(id)?;
        let old = {
            let mut core = cell.core_mut();
            if core.unique_id == unique_id {
                return Ok(());
            }
            std::mem::replace(&mut core.unique_id, unique_id.clone())
        };
        self.store
            .notify_id_change(id, old.as_ref(), unique_id.as_ref());
        Ok(())
    }

    /// Stage new values on a property. The first edit of a workspace-backed
    /// property snapshots the pristine payload for revert and dirties the
    /// owning node.
    pub fn set_property_values(
        &self,
        id: EntryId,
        values: Vec<Value>,
    ) -> Result<(), HierarchyError> {
        let cell = self.cell(id)?;
        if cell.is_node() {
            return Err(InternalError::KindMismatch {
                id,
                expected: "property",
            }
            .into());
        }
        let needs_resolve = {
            let core = cell.core();
            (core.payload.is_none() || core.status == Status::Invalidated)
                && core.status.is_workspace_backed()
        };
        if needs_resolve {
            self.property_state(id)?;
        }
        let (transition, parent) = {
            let mut core = cell.core_mut();
            let parent = core.parent;
            match core.status {
                Status::New => {
                    if let Some(p) = core.payload.as_mut().and_then(Payload::as_property_mut) {
                        p.set_values(values);
                    }
                    (None, None)
                }
                Status::Existing | Status::Invalidated => {
                    if core.pristine.is_none() {
                        core.pristine = core.payload.clone();
                    }
                    match core.payload.as_mut().and_then(Payload::as_property_mut) {
                        Some(p) => p.set_values(values),
                        None => {
                            return Err(HierarchyError::invalid(
                                "property payload is unresolved",
                            ))
                        }
                    }
                    (Some(Status::ExistingModified), parent)
                }
                Status::ExistingModified => {
                    if let Some(p) = core.payload.as_mut().and_then(Payload::as_property_mut) {
                        p.set_values(values);
                    }
                    (None, parent)
                }
                Status::ExistingRemoved => {
                    return Err(HierarchyError::invalid(
                        "cannot set values on a removed property",
                    ))
                }
                Status::StaleModified | Status::StaleDestroyed => {
                    return Err(HierarchyError::stale(format!("{id} is stale")))
                }
                Status::Removed => return Err(HierarchyError::not_found(id)),
            }
        };
        if let Some(to) = transition {
            self.set_status(id, to)?;
        }
        if let Some(p) = parent {
            self.mark_modified(p)?;
        }
        Ok(())
    }

    /// Reorder this node among its siblings: before the given sibling, or to
    /// the end. Recorded in the parent's revert ledger; same-name siblings
    /// without unique ids pin their workspace index first.
    pub fn order_before(
        &self,
        id: EntryId,
        before: Option<EntryId>,
    ) -> Result<(), HierarchyError> {
        let cell = self.node_cell(id)?;
        let Some(parent) = cell.core().parent else {
            return Err(HierarchyError::invalid("root cannot be reordered"));
        };
        if let Some(b) = before {
            if self.node_cell(b)?.core().parent != Some(parent) {
                return Err(HierarchyError::invalid(
                    "reorder destination is not a sibling",
                ));
            }
        }
        self.ensure_children_loaded(parent)?;
        let name = cell.core().name.clone();
        if cell.core().status == Status::New {
            // new entries vanish on revert; no ledger needed
            let pcell = self.node_cell(parent)?;
            let mut body = pcell.body_mut();
            let list = body
                .children
                .as_mut()
                .ok_or(InternalError::ParentMismatch { id })?;
            list.reorder(&name, id, before)
                .map_err(|()| InternalError::ParentMismatch { id })?;
            drop(body);
            return self.mark_modified(parent);
        }
        if !self.has_revert_info(id)? {
            self.create_sibling_ledgers(parent, &name)?;
        }
        self.create_ledger(parent)?;
        {
            let pcell = self.node_cell(parent)?;
            let mut body = pcell.body_mut();
            let durable_successor = {
                let list = body
                    .children
                    .as_mut()
                    .ok_or(InternalError::ParentMismatch { id })?;
                // the revert target must outlive the sequence: a New successor
                // vanishes on revert, so record the first workspace-backed one
                let order = list.to_vec();
                let position = order
                    .iter()
                    .position(|&e| e == id)
                    .ok_or(InternalError::ParentMismatch { id })?;
                let mut durable = None;
                for &successor in &order[position + 1..] {
                    if self.cell(successor)?.core().status != Status::New {
                        durable = Some(successor);
                        break;
                    }
                }
                list.reorder(&name, id, before)
                    .map_err(|()| InternalError::ParentMismatch { id })?;
                durable
            };
            if let Some(info) = body.revert.as_mut() {
                info.record_reorder(id, durable_successor);
            }
        }
        self.mark_modified(parent)
    }

    /// Move (or rename) a node. The first transient move snapshots the old
    /// identity, registers the ledger listener, and parks the handle in the
    /// old parent's attic so server events against the old slot still
    /// resolve.
    pub fn move_entry(
        &self,
        id: EntryId,
        new_name: Name,
        new_parent: EntryId,
        transient: bool,
    ) -> Result<(), HierarchyError> {
        let cell = self.node_cell(id)?;
        let (old_parent, old_name, status) = {
            let core = cell.core();
            (core.parent, core.name.clone(), core.status)
        };
        let Some(old_parent) = old_parent else {
            return Err(HierarchyError::invalid("root cannot be moved"));
        };
        if status.is_terminal() {
            return Err(HierarchyError::not_found(id));
        }
        let np = self.node_cell(new_parent)?;
        if np.core().status.is_terminal() {
            return Err(HierarchyError::not_found(new_parent));
        }
        let mut cursor = Some(new_parent);
        while let Some(c) = cursor {
            if c == id {
                return Err(HierarchyError::invalid(
                    "cannot move a node below its own subtree",
                ));
            }
            cursor = self.cell(c)?.core().parent;
        }
        self.ensure_children_loaded(new_parent)?;

        if transient && status != Status::New && !self.is_transiently_moved_cell(&cell) {
            if !self.has_revert_info(id)? {
                self.create_sibling_ledgers(old_parent, &old_name)?;
            }
            self.create_ledger(id)?;
            self.node_cell(old_parent)?.body_mut().child_attic.add(id);
        }

        if old_parent == new_parent {
            let pcell = self.node_cell(old_parent)?;
            let mut body = pcell.body_mut();
            let list = body
                .children
                .as_mut()
                .ok_or(InternalError::ParentMismatch { id })?;
            if !list.remove(&old_name, id) {
                return Err(InternalError::ParentMismatch { id }.into());
            }
            cell.core_mut().name = new_name.clone();
            list.push(&new_name, id);
        } else {
            // two distinct parents: lock their bodies in handle order
            let (first, second) = if old_parent < new_parent {
                (old_parent, new_parent)
            } else {
                (new_parent, old_parent)
            };
            let fcell = self.node_cell(first)?;
            let scell = self.node_cell(second)?;
            let mut fbody = fcell.body_mut();
            let mut sbody = scell.body_mut();
            let (old_body, new_body) = if first == old_parent {
                (&mut *fbody, &mut *sbody)
            } else {
                (&mut *sbody, &mut *fbody)
            };
            let list = old_body
                .children
                .as_mut()
                .ok_or(InternalError::ParentMismatch { id })?;
            if !list.remove(&old_name, id) {
                return Err(InternalError::ParentMismatch { id }.into());
            }
            {
                let mut core = cell.core_mut();
                core.parent = Some(new_parent);
                core.name = new_name.clone();
            }
            new_body
                .children
                .get_or_insert_with(ChildNodeEntries::new)
                .push(&new_name, id);
        }

        if transient {
            let restored = {
                let snapshot = {
                    let body = cell.body();
                    match body.revert.as_ref() {
                        Some(info) if info.reordered().is_empty() => {
                            let core = cell.core();
                            (!info.is_moved(core.parent, &core.name)).then_some(info.old_index)
                        }
                        _ => None,
                    }
                };
                // the pair only composes to identity when the entry landed
                // back on its old sibling slot as well
                match snapshot {
                    Some(old_index) => self.index_of(id)? == old_index,
                    None => false,
                }
            };
            if restored {
                // the move landed back on the workspace slot; the pair
                // composes to identity and leaves no staged change behind
                self.complete_transient(id)?;
                if self.status(id)? == Status::ExistingModified
                    && !self.has_staged_changes(id)?
                {
                    self.set_status(id, Status::Existing)?;
                }
            } else {
                self.mark_modified(id)?;
            }
        }
        Ok(())
    }

    /// Does this node carry staged local changes besides a pending move -
    /// a payload edit, a shadowed property, or a dirty immediate child?
    fn has_staged_changes(&self, id: EntryId) -> Result<bool, HierarchyError> {
        let cell = self.node_cell(id)?;
        if cell.core().pristine.is_some() {
            return Ok(true);
        }
        let (attic_nonempty, props, kids) = {
            let body = cell.body();
            (
                !body.properties_attic.is_empty(),
                body.properties.values().copied().collect::<Vec<_>>(),
                body.children.as_ref().map(|l| l.to_vec()).unwrap_or_default(),
            )
        };
        if attic_nonempty {
            return Ok(true);
        }
        for e in props.into_iter().chain(kids) {
            if self.cell(e)?.core().status.is_transient() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Stage removal of the subtree. Attic properties are re-awakened first
    /// so a later revert can still find them; `New` descendants are dropped
    /// outright.
    pub fn transient_remove(&self, id: EntryId) -> Result<(), HierarchyError> {
        let cell = self.cell(id)?;
        let parent = cell.core().parent;
        if cell.is_node() && parent.is_none() {
            return Err(HierarchyError::invalid("root cannot be removed"));
        }
        self.transient_remove_rec(id)?;
        if let Some(p) = parent {
            self.mark_modified(p)?;
        }
        Ok(())
    }

    fn transient_remove_rec(&self, id: EntryId) -> Result<(), HierarchyError> {
        let Ok(cell) = self.cell(id) else {
            return Ok(());
        };
        if cell.is_node() {
            let (props, kids) = {
                let body = cell.body();
                (
                    body.properties.values().copied().collect::<Vec<_>>(),
                    body.children.as_ref().map(|l| l.to_vec()).unwrap_or_default(),
                )
            };
            for p in props {
                self.transient_remove_rec(p)?;
            }
            for k in kids {
                self.transient_remove_rec(k)?;
            }
            // re-awaken shadowed properties; their status is already
            // ExistingRemoved, so the staged removal reaches the flush
            let mut body = cell.body_mut();
            let drained = std::mem::take(&mut body.properties_attic);
            for (name, entry) in drained {
                body.properties.insert(name, entry);
            }
        }
        match self.cell(id)?.core().status {
            Status::New => self.drop_new(id),
            Status::Existing | Status::ExistingModified | Status::Invalidated => {
                self.set_status(id, Status::ExistingRemoved)
            }
            _ => Ok(()),
        }
    }

    /// Hard removal, driven by the event stream or by a saved removal. Dirty
    /// entries turn `StaleDestroyed` and keep their slot so the staleness is
    /// discoverable; clean ones are detached.
    pub fn remove_entry(&self, id: EntryId) -> Result<(), HierarchyError> {
        let cell = self.cell(id)?;
        if cell.is_node() && cell.core().parent.is_none() {
            return Err(HierarchyError::invalid("root cannot be removed"));
        }
        self.remove_entry_internal(id)
    }

    pub(crate) fn remove_entry_internal(&self, id: EntryId) -> Result<(), HierarchyError> {
        let cell = self.cell(id)?;
        let previous = cell.core().status;
        if !previous.is_terminal() {
            self.set_status(id, destroyed_status(previous))?;
        }
        // re-read identity: the ledger hook may have restored the workspace
        // parent while unwinding a transient move
        let (parent, name, now) = {
            let core = cell.core();
            (core.parent, core.name.clone(), core.status)
        };
        if now != Status::StaleDestroyed {
            if let Some(p) = parent {
                self.detach_from_parent(p, &name, id)?;
            }
        }
        if cell.is_node() {
            let descendants = {
                let body = cell.body();
                let mut all: Vec<EntryId> = body.properties_attic.values().copied().collect();
                all.extend(body.properties.values().copied());
                if let Some(list) = body.children.as_ref() {
                    all.extend(list.iter());
                }
                all
            };
            for e in descendants {
                self.terminalize_rec(e)?;
            }
        }
        Ok(())
    }

    fn terminalize_rec(&self, id: EntryId) -> Result<(), HierarchyError> {
        let Ok(cell) = self.cell(id) else {
            return Ok(());
        };
        let status = cell.core().status;
        if !status.is_terminal() {
            self.set_status(id, destroyed_status(status))?;
        }
        if cell.is_node() {
            let descendants = {
                let body = cell.body();
                let mut all: Vec<EntryId> = body.properties_attic.values().copied().collect();
                all.extend(body.properties.values().copied());
                if let Some(list) = body.children.as_ref() {
                    all.extend(list.iter());
                }
                all
            };
            for e in descendants {
                self.terminalize_rec(e)?;
            }
        }
        Ok(())
    }

    pub(crate) fn detach_from_parent(
        &self,
        parent: EntryId,
        name: &Name,
        id: EntryId,
    ) -> Result<(), HierarchyError> {
        let Ok(pcell) = self.cell(parent) else {
            return Ok(());
        };
        if !pcell.is_node() {
            return Ok(());
        }
        let mut body = pcell.body_mut();
        let removed = body
            .children
            .as_mut()
            .map_or(false, |l| l.remove(name, id));
        if !removed {
            if body.properties.get(name) == Some(&id) {
                body.properties.remove(name);
            } else if body.properties_attic.get(name) == Some(&id) {
                body.properties_attic.remove(name);
            } else {
                body.child_attic.remove(id);
            }
        }
        Ok(())
    }

    /// Drop a `New` entry entirely: detach, terminal transition, reap.
    pub(crate) fn drop_new(&self, id: EntryId) -> Result<(), HierarchyError> {
        let Ok(cell) = self.cell(id) else {
            return Ok(());
        };
        let (parent, name, status) = {
            let core = cell.core();
            (core.parent, core.name.clone(), core.status)
        };
        if let Some(p) = parent {
            self.detach_from_parent(p, &name, id)?;
        }
        if status == Status::New {
            self.set_status(id, Status::Removed)?;
        }
        self.store.reap(id);
        Ok(())
    }

    /// Drop the resolved payload (identity preserved) and mark the child
    /// list stale; `New` entries are untouched.
    pub fn invalidate(&self, id: EntryId, recursive: bool) -> Result<(), HierarchyError> {
        let cell = self.cell(id)?;
        if recursive && cell.is_node() {
            let descendants = {
                let body = cell.body();
                let mut all: Vec<EntryId> = body.properties_attic.values().copied().collect();
                all.extend(body.properties.values().copied());
                if let Some(list) = body.children.as_ref() {
                    all.extend(list.iter());
                }
                all
            };
            for e in descendants {
                self.invalidate(e, true)?;
            }
        }
        if cell.is_node() && cell.core().status != Status::New {
            let mut body = cell.body_mut();
            if let Some(list) = body.children.as_mut() {
                list.set_status(ChildListStatus::Invalidated);
            }
        }
        let should_invalidate = {
            let core = cell.core();
            core.status != Status::New
                && !core.status.is_terminal()
                && core.status != Status::Invalidated
                && core.payload.is_some()
        };
        if should_invalidate {
            // the pristine snapshot captured an observation the external
            // refresh just declared stale; the next read re-resolves
            cell.core_mut().pristine = None;
            self.set_status(id, Status::Invalidated)?;
        }
        Ok(())
    }

    //-------------------------------------------------< payload resolution >---

    /// Resolved node payload, fetching from the workspace when absent or
    /// invalidated. A vanished workspace item turns the entry terminal and
    /// surfaces as stale.
    pub fn node_state(&self, id: EntryId) -> Result<NodeState, HierarchyError> {
        let cell = self.node_cell(id)?;
        {
            let core = cell.core();
            if core.status != Status::Invalidated {
                if let Some(state) = core.payload.as_ref().and_then(Payload::as_node) {
                    return Ok(state.clone());
                }
            }
            if core.status.is_terminal() {
                return Err(HierarchyError::not_found(id));
            }
        }
        let workspace_id = self.build_node_id(id, true)?;
        match self.provider.node_state(&workspace_id) {
            Ok(state) => {
                cell.core_mut().payload = Some(Payload::Node(state.clone()));
                if self.cell(id)?.core().status == Status::Invalidated {
                    self.set_status(id, Status::Existing)?;
                }
                Ok(state)
            }
            Err(e) if e.is_not_found() => {
                self.remove_entry_internal(id)?;
                Err(HierarchyError::stale(format!(
                    "{workspace_id} no longer exists on the workspace"
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Resolved property payload; same contract as [`Hierarchy::node_state`].
    pub fn property_state(&self, id: EntryId) -> Result<PropertyState, HierarchyError> {
        let cell = self.cell(id)?;
        if cell.is_node() {
            return Err(InternalError::KindMismatch {
                id,
                expected: "property",
            }
            .into());
        }
        {
            let core = cell.core();
            if core.status != Status::Invalidated {
                if let Some(state) = core.payload.as_ref().and_then(Payload::as_property) {
                    return Ok(state.clone());
                }
            }
            if core.status.is_terminal() {
                return Err(HierarchyError::not_found(id));
            }
        }
        let (parent, name) = {
            let core = cell.core();
            (core.parent, core.name.clone())
        };
        let parent = parent.ok_or(InternalError::ParentMismatch { id })?;
        let parent_id = self.build_node_id(parent, true)?;
        let property_id = self.ids.property_id(parent_id, name);
        match self.provider.property_state(&property_id) {
            Ok(state) => {
                cell.core_mut().payload = Some(Payload::Property(state.clone()));
                if self.cell(id)?.core().status == Status::Invalidated {
                    self.set_status(id, Status::Existing)?;
                }
                Ok(state)
            }
            Err(e) if e.is_not_found() => {
                self.remove_entry_internal(id)?;
                Err(HierarchyError::stale(format!(
                    "{property_id} no longer exists on the workspace"
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    //------------------------------------------------------< deep lookup >---

    /// Resolve a path relative to this entry, loading missing suffixes from
    /// the workspace in a single deep call.
    pub fn get_deep_entry(
        &self,
        anchor: EntryId,
        path: &Path,
    ) -> Result<EntryId, HierarchyError> {
        eprintln!("DBG >>> get_deep_entry");
        if path.is_absolute() && self.cell(anchor)?.core().parent.is_some() {
            return Err(HierarchyError::invalid(format!(
                "absolute path {path} resolved below a non-root entry"
            )));
        }
        enum Step {
            Node(EntryId),
            Property(EntryId),
            Miss,
        }
        let mut entry = anchor;
        let segments = path.segments();
        for (i, segment) in segments.iter().enumerate() {
            let last = i + 1 == segments.len();
            let name = segment.name();
            let index = segment.normalized_index();
            let step = {
                let cell = self.node_cell(entry)?;
                let body = cell.body();
                if let Some(child) = self.valid_child(&body, name, index)? {
                    Step::Node(child)
                } else if segment.index().is_none() && last {
                    match body.properties.get(name) {
                        Some(&p) => Step::Property(p),
                        None => Step::Miss,
                    }
                } else {
                    Step::Miss
                }
            };
            match step {
                Step::Node(child) => {
                    entry = child;
                    continue;
                }
                Step::Property(p) => return Ok(p),
                Step::Miss => {}
            }
            // an attic hit or an index within the known sibling range means
            // the item is locally known to be gone from that slot
            if self.attic_blocks(entry, name, index)? {
                return Err(HierarchyError::not_found(path));
            }
            if last && segment.index().is_some() && self.has_local_property(entry, name)? {
                return Err(HierarchyError::invalid(format!(
                    "sibling index on property segment `{segment}`"
                )));
            }
            return self.deep_resolve(entry, path, path.suffix(i));
        }
        Ok(entry)
    }

    fn has_local_property(&self, id: EntryId, name: &Name) -> Result<bool, HierarchyError> {
        Ok(self.node_cell(id)?.body().properties.contains_key(name))
    }

    fn attic_blocks(
        &self,
        id: EntryId,
        name: &Name,
        index: u32,
    ) -> Result<bool, HierarchyError> {
        eprintln!("DBG >>> attic_blocks");
        let cell = self.node_cell(id)?;
        let (attic, bucket_len, loaded) = {
            let body = cell.body();
            (
                body.child_attic.to_vec(),
                body.children
                    .as_ref()
                    .map(|l| l.named(name).len())
                    .unwrap_or(0),
                body.children.is_some(),
            )
        };
        let mut attic_named = 0usize;
        for a in attic {
            let Ok(acell) = self.cell(a) else {
                continue;
            };
            let (_, ws_name, ws_index) = self.workspace_slot(&acell)?;
            if &ws_name == name {
                attic_named += 1;
                if ws_index == index {
                    return Ok(true);
                }
            }
        }
        Ok(loaded && (index as usize) <= bucket_len + attic_named)
    }

    /// One remote round trip for the unresolved suffix; the provider returns
    /// the hop list and the engine materializes the intermediate entries. A
    /// miss with no index on the final segment retries as a property.
    fn deep_resolve(
        &self,
        entry: EntryId,
        full_path: &Path,
        remaining: Path,
    ) -> Result<EntryId, HierarchyError> {
        eprintln!("DBG >>> deep_resolve");
        let anchor_id = self.build_node_id(entry, false)?;
        match self.provider.deep_node_state(&anchor_id, &remaining) {
            Ok(info) => {
                if info.hops.len() != remaining.len() {
                    return Err(HierarchyError::Transport {
                        reason: format!(
                            "deep resolution returned {} hops for {} segments",
                            info.hops.len(),
                            remaining.len()
                        ),
                    });
                }
                let mut current = entry;
                for hop in &info.hops {
                    current = self.materialize_child(current, hop)?;
                }
                self.cell(current)?.core_mut().payload = Some(Payload::Node(info.state));
                if self.cell(current)?.core().status == Status::Invalidated {
                    self.set_status(current, Status::Existing)?;
                }
                Ok(current)
            }
            Err(e) if e.is_not_found() => {
                if remaining.last().map_or(true, |s| s.index().is_some()) {
                    return Err(HierarchyError::not_found(full_path));
                }
                let pinfo = match self.provider.deep_property_state(&anchor_id, &remaining) {
                    Ok(p) => p,
                    Err(e) if e.is_not_found() => {
                        return Err(HierarchyError::not_found(full_path))
                    }
                    Err(e) => return Err(e.into()),
                };
                let mut current = entry;
                for hop in &pinfo.hops {
                    current = self.materialize_child(current, hop)?;
                }
                let Some(last) = remaining.last() else {
                    return Err(HierarchyError::not_found(full_path));
                };
                let property = self.add_property(current, last.name().clone())?;
                self.cell(property)?.core_mut().payload =
                    Some(Payload::Property(pinfo.state));
                Ok(property)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Find-or-create one hop during deep materialization. A list created
    /// here is marked invalidated: it holds partial knowledge and the next
    /// full read merges a complete server listing over it.
    fn materialize_child(
        &self,
        parent: EntryId,
        hop: &ChildInfo,
    ) -> Result<EntryId, HierarchyError> {
        eprintln!("DBG >>> materialize_child");
        let pcell = self.node_cell(parent)?;
        let mut body = pcell.body_mut();
        let created = body.children.is_none();
        let list = body.children.get_or_insert_with(ChildNodeEntries::new);
        if created {
            list.set_status(ChildListStatus::Invalidated);
        }
        if let Some(uid) = hop.unique_id() {
            for e in list.named(hop.name()) {
                if self.cell(*e)?.core().unique_id.as_ref() == Some(uid) {
                    return Ok(*e);
                }
            }
        }
        let mut position = 1u32;
        for e in list.named(hop.name()) {
            if self.cell(*e)?.core().status.is_valid() {
                if position == hop.index() {
                    return Ok(*e);
                }
                position += 1;
            }
        }
        let entry = self.store.allocate_node(
            Some(parent),
            hop.name().clone(),
            hop.unique_id().cloned(),
            Status::Existing,
        );
        list.insert_at_bucket_index(hop.name(), entry.id, hop.index());
        Ok(entry.id)
    }

    /// Purely local resolution against the *workspace* view; never calls the
    /// remote. Event routing uses this to avoid synthesizing entries for
    /// events about unloaded subtrees.
    pub fn lookup_deep_entry(&self, anchor: EntryId, path: &Path) -> Option<EntryId> {
        let cell = self.store.get(anchor)?;
        if path.is_absolute() && cell.core().parent.is_some() {
            debug!(entry = %anchor, %path, "absolute lookup below a non-root entry");
            return None;
        }
        let mut entry = anchor;
        let segments = path.segments();
        for (i, segment) in segments.iter().enumerate() {
            let last = i + 1 == segments.len();
            if let Some(child) =
                self.lookup_node_entry(entry, segment.name(), segment.normalized_index())
            {
                entry = child;
            } else if segment.index().is_none() && last {
                return self.lookup_property_entry(entry, segment.name());
            } else {
                return None;
            }
        }
        Some(entry)
    }

    /// Workspace-view child lookup: the attic first (a moved-away child still
    /// answers for its old slot), then the child list.
    pub(crate) fn lookup_node_entry(
        &self,
        parent: EntryId,
        name: &Name,
        index: u32,
    ) -> Option<EntryId> {
        let pcell = self.store.get(parent)?;
        if !pcell.is_node() {
            return None;
        }
        let (attic, bucket) = {
            let body = pcell.body();
            (
                body.child_attic.to_vec(),
                body.children
                    .as_ref()
                    .map(|l| l.named(name).to_vec())
                    .unwrap_or_default(),
            )
        };
        for a in attic {
            if self.matches_workspace(a, name, index).unwrap_or(false) {
                return Some(a);
            }
        }
        for e in bucket {
            if self.matches_workspace(e, name, index).unwrap_or(false) {
                return Some(e);
            }
        }
        None
    }

    /// Workspace-view property lookup: the attic first, so a removal aimed at
    /// a shadowed original does not hit its `New` shadow.
    pub(crate) fn lookup_property_entry(&self, node: EntryId, name: &Name) -> Option<EntryId> {
        let cell = self.store.get(node)?;
        if !cell.is_node() {
            return None;
        }
        let body = cell.body();
        body.properties_attic
            .get(name)
            .or_else(|| body.properties.get(name))
            .copied()
    }

    //------------------------------------------------------------< ledgers >---

    fn create_ledger(&self, id: EntryId) -> Result<(), HierarchyError> {
        eprintln!("DBG >>> create_ledger");
        let cell = self.node_cell(id)?;
        if cell.body().revert.is_some() {
            return Ok(());
        }
        let (parent, name) = {
            let core = cell.core();
            (core.parent, core.name.clone())
        };
        let index = if parent.is_some() { self.index_of(id)? } else { 1 };
        let mut body = cell.body_mut();
        if body.revert.is_none() {
            body.revert = Some(RevertInfo::new(parent, name, index));
            drop(body);
            cell.core_mut().listeners.push(StatusListener::RevertLedger);
        }
        Ok(())
    }

    /// Same-name siblings without a unique id pin their workspace index
    /// before a move or reorder disturbs the bucket.
    fn create_sibling_ledgers(&self, parent: EntryId, name: &Name) -> Result<(), HierarchyError> {
        eprintln!("DBG >>> create_sibling_ledgers");
        let bucket = {
            let pcell = self.node_cell(parent)?;
            let body = pcell.body();
            body.children
                .as_ref()
                .map(|l| l.named(name).to_vec())
                .unwrap_or_default()
        };
        if bucket.len() <= 1 {
            return Ok(());
        }
        for sibling in bucket {
            let (no_uid, status) = {
                let cell = self.cell(sibling)?;
                let core = cell.core();
                (core.unique_id.is_none(), core.status)
            };
            if no_uid && status != Status::New {
                self.create_ledger(sibling)?;
            }
        }
        Ok(())
    }

    /// Save completed: the transient identity became the workspace identity.
    /// Free the old attic slot and dissolve the ledger.
    fn complete_transient(&self, id: EntryId) -> Result<(), HierarchyError> {
        let cell = self.node_cell(id)?;
        let Some(info) = ({
            let mut body = cell.body_mut();
            body.revert.take()
        }) else {
            return Ok(());
        };
        if let Some(old_parent) = info.old_parent {
            if let Ok(pcell) = self.cell(old_parent) {
                if pcell.is_node() {
                    pcell.body_mut().child_attic.remove(id);
                }
            }
        }
        cell.core_mut()
            .listeners
            .retain(|l| *l != StatusListener::RevertLedger);
        self.dispose_sibling_ledgers(id, &info)
    }

    /// Unwind the ledger: replay the reorder log in reverse, then undo the
    /// move. With `resurrect` the entry is re-attached at its old slot; on a
    /// terminal unwind the old identity is restored but the entry stays
    /// detached.
    pub(crate) fn unwind_transient(
        &self,
        id: EntryId,
        resurrect: bool,
    ) -> Result<(), HierarchyError> {
        let cell = self.node_cell(id)?;
        let Some(info) = ({
            let mut body = cell.body_mut();
            body.revert.take()
        }) else {
            return Ok(());
        };
        for (child, previous) in info.reordered().iter().rev() {
            self.replay_reorder(id, *child, *previous);
        }
        let (current_parent, current_name) = {
            let core = cell.core();
            (core.parent, core.name.clone())
        };
        if info.is_moved(current_parent, &current_name) {
            if let Some(cp) = current_parent {
                if let Ok(pcell) = self.cell(cp) {
                    if pcell.is_node() {
                        let mut body = pcell.body_mut();
                        if let Some(list) = body.children.as_mut() {
                            list.remove(&current_name, id);
                        }
                    }
                }
            }
            if let Some(old_parent) = info.old_parent {
                if let Ok(opcell) = self.cell(old_parent) {
                    if opcell.is_node() {
                        opcell.body_mut().child_attic.remove(id);
                    }
                }
                {
                    let mut core = cell.core_mut();
                    core.parent = Some(old_parent);
                    core.name = info.old_name.clone();
                }
                let terminal = cell.core().status.is_terminal();
                if resurrect && !terminal {
                    self.ensure_children_loaded(old_parent)?;
                    let opcell = self.node_cell(old_parent)?;
                    let mut body = opcell.body_mut();
                    body.children
                        .get_or_insert_with(ChildNodeEntries::new)
                        .insert_at_bucket_index(&info.old_name, id, info.old_index);
                }
            }
        }
        cell.core_mut()
            .listeners
            .retain(|l| *l != StatusListener::RevertLedger);
        self.dispose_sibling_ledgers(id, &info)
    }

    fn replay_reorder(&self, parent: EntryId, child: EntryId, previous: Option<EntryId>) {
        let Ok(ccell) = self.cell(child) else {
            warn!(%child, "cannot revert reordering; participant is gone");
            return;
        };
        if ccell.core().status.is_terminal() {
            warn!(%child, "cannot revert reordering; participant no longer exists");
            return;
        }
        if let Some(p) = previous {
            let gone = self
                .cell(p)
                .map(|c| c.core().status.is_terminal())
                .unwrap_or(true);
            if gone {
                warn!(%child, "cannot revert reordering; previous successor no longer exists");
                return;
            }
        }
        let name = ccell.core().name.clone();
        let Ok(pcell) = self.node_cell(parent) else {
            return;
        };
        let mut body = pcell.body_mut();
        if let Some(list) = body.children.as_mut() {
            if list.reorder(&name, child, previous).is_err() {
                warn!(%child, "cannot revert reordering; participant left the child list");
            }
        }
    }

    /// When a parent's ledger dissolves, index pins on reorder participants'
    /// same-name siblings dissolve with it - unless the sibling carries its
    /// own pending change.
    fn dispose_sibling_ledgers(
        &self,
        parent: EntryId,
        info: &RevertInfo,
    ) -> Result<(), HierarchyError> {
        if info.reordered().is_empty() {
            return Ok(());
        }
        let Ok(pcell) = self.node_cell(parent) else {
            return Ok(());
        };
        let mut to_dispose: Vec<EntryId> = Vec::new();
        {
            let body = pcell.body();
            let Some(list) = body.children.as_ref() else {
                return Ok(());
            };
            let mut seen: HashSet<Name> = HashSet::new();
            for (child, _) in info.reordered() {
                let Ok(ccell) = self.cell(*child) else {
                    continue;
                };
                let name = ccell.core().name.clone();
                if !seen.insert(name.clone()) {
                    continue;
                }
                let bucket = list.named(&name);
                if bucket.len() <= 1 {
                    continue;
                }
                for sibling in bucket {
                    let scell = self.cell(*sibling)?;
                    let pinned = scell.body().revert.is_some();
                    if pinned
                        && !self.is_transiently_moved_cell(&scell)
                        && scell.core().status == Status::Existing
                    {
                        to_dispose.push(*sibling);
                    }
                }
            }
        }
        for sibling in to_dispose {
            let scell = self.cell(sibling)?;
            scell.body_mut().revert = None;
            scell
                .core_mut()
                .listeners
                .retain(|l| *l != StatusListener::RevertLedger);
        }
        Ok(())
    }

    //--------------------------------------------------------------< revert >---

    /// Revert the subtree to the last workspace observation: attic properties
    /// return, `New` entries vanish, moves and reorders unwind, staged
    /// payloads restore their pristine snapshot.
    pub fn revert(&self, id: EntryId) -> Result<(), HierarchyError> {
        let mut visited = HashSet::new();
        self.revert_rec(id, &mut visited)
    }

    fn revert_rec(
        &self,
        id: EntryId,
        visited: &mut HashSet<EntryId>,
    ) -> Result<(), HierarchyError> {
        if !visited.insert(id) {
            return Ok(());
        }
        let Ok(cell) = self.cell(id) else {
            return Ok(());
        };
        if !cell.is_node() {
            return self.revert_property(id);
        }
        // shadowed properties return to the table; their shadows are dropped
        let displaced = {
            let mut body = cell.body_mut();
            let drained = std::mem::take(&mut body.properties_attic);
            let mut displaced = Vec::new();
            for (name, original) in drained {
                if let Some(shadow) = body.properties.insert(name, original) {
                    if shadow != original {
                        displaced.push(shadow);
                    }
                }
            }
            displaced
        };
        for shadow in displaced {
            self.drop_new(shadow)?;
        }
        let (props, kids) = {
            let body = cell.body();
            let props: Vec<EntryId> = body.properties.values().copied().collect();
            let mut kids: Vec<EntryId> =
                body.children.as_ref().map(|l| l.to_vec()).unwrap_or_default();
            for a in body.child_attic.iter() {
                if !kids.contains(&a) {
                    kids.push(a);
                }
            }
            (props, kids)
        };
        for p in props {
            self.revert_rec(p, visited)?;
        }
        for k in kids {
            self.revert_rec(k, visited)?;
        }
        self.unwind_transient(id, true)?;
        self.revert_own_state(id)
    }

    fn revert_own_state(&self, id: EntryId) -> Result<(), HierarchyError> {
        let Ok(cell) = self.cell(id) else {
            return Ok(());
        };
        let status = cell.core().status;
        match status {
            Status::New => self.drop_new(id),
            Status::ExistingModified => {
                {
                    let mut core = cell.core_mut();
                    if let Some(pristine) = core.pristine.take() {
                        core.payload = Some(pristine);
                    }
                }
                self.set_status(id, Status::Existing)
            }
            Status::ExistingRemoved => self.set_status(id, Status::Existing),
            Status::StaleModified => {
                {
                    let mut core = cell.core_mut();
                    core.payload = None;
                    core.pristine = None;
                }
                self.set_status(id, Status::Existing)
            }
            _ => Ok(()),
        }
    }

    fn revert_property(&self, id: EntryId) -> Result<(), HierarchyError> {
        let cell = self.cell(id)?;
        let status = cell.core().status;
        match status {
            Status::New => self.drop_new(id),
            Status::ExistingRemoved => {
                let parent = cell.core().parent;
                if let Some(p) = parent {
                    self.revert_property_removal(p, id)?;
                }
                self.set_status(id, Status::Existing)
            }
            Status::ExistingModified => {
                {
                    let mut core = cell.core_mut();
                    if let Some(pristine) = core.pristine.take() {
                        core.payload = Some(pristine);
                    }
                }
                self.set_status(id, Status::Existing)
            }
            Status::StaleModified => {
                {
                    let mut core = cell.core_mut();
                    core.payload = None;
                    core.pristine = None;
                }
                self.set_status(id, Status::Existing)
            }
            _ => Ok(()),
        }
    }

    /// Restore a shadowed property from the attic when its removal reverts;
    /// the `New` shadow is dropped.
    pub(crate) fn revert_property_removal(
        &self,
        parent: EntryId,
        property: EntryId,
    ) -> Result<(), HierarchyError> {
        let pcell = self.node_cell(parent)?;
        let name = self.cell(property)?.core().name.clone();
        let displaced = {
            let mut body = pcell.body_mut();
            if body.properties_attic.get(&name) == Some(&property) {
                body.properties_attic.remove(&name);
                body.properties.insert(name, property)
            } else {
                None
            }
        };
        if let Some(shadow) = displaced {
            if shadow != property {
                self.drop_new(shadow)?;
            }
        }
        Ok(())
    }

    //------------------------------------------------------< state machine >---

    /// The single transition routine. Rejects illegal transitions, then fans
    /// out to the entry's listeners with the lock released - a listener may
    /// dispose itself.
    pub(crate) fn set_status(&self, id: EntryId, to: Status) -> Result<(), HierarchyError> {
        eprintln!("DBG >>> set_status");
        let cell = self.cell(id)?;
        let listeners = {
            let mut core = cell.core_mut();
            let from = core.status;
            if from == to {
                return Ok(());
            }
            if !Status::can_transition(from, to) {
                return Err(InternalError::StatusTransition { id, from, to }.into());
            }
            core.status = to;
            if to == Status::Existing {
                core.pristine = None;
            }
            core.listeners.clone()
        };
        for listener in listeners {
            match listener {
                StatusListener::RevertLedger => match to {
                    Status::Existing => self.complete_transient(id)?,
                    Status::Removed | Status::StaleDestroyed => {
                        self.unwind_transient(id, false)?
                    }
                    _ => {}
                },
            }
        }
        Ok(())
    }

    /// A structural or payload edit dirties the entry.
    pub(crate) fn mark_modified(&self, id: EntryId) -> Result<(), HierarchyError> {
        match self.cell(id)?.core().status {
            Status::Existing | Status::Invalidated => {
                self.set_status(id, Status::ExistingModified)
            }
            Status::New
            | Status::ExistingModified
            | Status::ExistingRemoved
            | Status::StaleModified => Ok(()),
            Status::StaleDestroyed | Status::Removed => {
                Err(HierarchyError::invalid("cannot modify a removed item"))
            }
        }
    }
}

fn segment_for(name: Name, index: u32) -> Result<PathSegment, HierarchyError> {
    if index > 1 {
        PathSegment::with_index(name, index)
            .map_err(|e| HierarchyError::invalid(e.to_string()))
    } else {
        Ok(PathSegment::new(name))
    }
}

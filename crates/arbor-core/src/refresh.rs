//! External event application.
//!
//! One call per incoming server event. The event's parent entry is resolved
//! purely locally against the workspace view - events about unloaded subtrees
//! are dropped, the eventual load observes them anyway. Lookup consults the
//! attics first so that events aimed at an old slot still reach the entry we
//! moved or shadowed, and a `New` entry is immune to every external event:
//! it cannot be about the same logical thing.

use tracing::{debug, warn};

use arbor_spi::event::{Event, EventKind};
use arbor_spi::id::UniqueId;
use arbor_spi::name::Name;
use arbor_spi::path::PathSegment;
use arbor_spi::state::{PropertyState, Value};

use crate::entry::{EntryId, Payload};
use crate::error::HierarchyError;
use crate::hierarchy::Hierarchy;
use crate::status::Status;

impl Hierarchy {
    /// Apply one external event to the local graph.
    pub fn refresh(&self, event: &Event) -> Result<(), HierarchyError> {
        let path = event.path();
        if path.is_empty() {
            debug!(kind = ?event.kind(), "event addresses the root itself; ignored");
            return Ok(());
        }
        let parent_path = path
            .ancestor(1)
            .map_err(|e| HierarchyError::invalid(e.to_string()))?;
        let Some(parent) = self.lookup_deep_entry(self.root(), &parent_path) else {
            debug!(%path, "event parent not materialized locally; dropped");
            return Ok(());
        };
        if !self.is_node(parent)? {
            debug!(%path, "event parent resolves to a property; dropped");
            return Ok(());
        }
        let Some(segment) = path.last() else {
            return Ok(());
        };
        match event.kind() {
            EventKind::NodeAdded => self.refresh_node_added(parent, segment, event),
            EventKind::NodeRemoved | EventKind::PropertyRemoved => {
                self.refresh_removed(parent, segment, event)
            }
            EventKind::PropertyAdded | EventKind::PropertyChanged => {
                self.refresh_property_event(parent, segment, event)
            }
        }
    }

    fn refresh_node_added(
        &self,
        parent: EntryId,
        segment: &PathSegment,
        event: &Event,
    ) -> Result<(), HierarchyError> {
        let name = segment.name();
        let index = segment.normalized_index();
        let unique_id = event_unique_id(event);
        let cell = self.node_cell(parent)?;
        let mut body = cell.body_mut();
        let Some(list) = body.children.as_mut() else {
            debug!(entry = %parent, "child list not loaded; NODE_ADDED ignored");
            return Ok(());
        };
        let existing = match &unique_id {
            Some(uid) => {
                let mut found = None;
                for e in list.named(name) {
                    if self.cell(*e)?.core().unique_id.as_ref() == Some(uid) {
                        found = Some(*e);
                        break;
                    }
                }
                found
            }
            None => {
                let mut found = None;
                let mut position = 1u32;
                for e in list.named(name) {
                    if self.cell(*e)?.core().status.is_valid() {
                        if position == index {
                            found = Some(*e);
                            break;
                        }
                        position += 1;
                    }
                }
                found
            }
        };
        match existing {
            None => {
                let entry = self.store.allocate_node(
                    Some(parent),
                    name.clone(),
                    unique_id,
                    Status::Existing,
                );
                list.insert_at_bucket_index(name, entry.id, index);
            }
            Some(local) => {
                // the slot is taken - possibly by this session's New entry
                // for a name the server now also carries; reconciliation is
                // deferred to save
                debug!(entry = %local, "NODE_ADDED matches a local entry; left untouched");
            }
        }
        Ok(())
    }

    fn refresh_removed(
        &self,
        parent: EntryId,
        segment: &PathSegment,
        event: &Event,
    ) -> Result<(), HierarchyError> {
        let Some(target) = self.lookup_event_entry(parent, segment, event) else {
            debug!(path = %event.path(), "removal for an entry never loaded; dropped");
            return Ok(());
        };
        self.remove_entry_internal(target)?;
        if !event.item_id().denotes_node() && segment.name().is_uuid_or_mixin() {
            self.clear_uuid_mixin(parent, segment.name())?;
        }
        Ok(())
    }

    fn refresh_property_event(
        &self,
        parent: EntryId,
        segment: &PathSegment,
        event: &Event,
    ) -> Result<(), HierarchyError> {
        let name = segment.name();
        match self.lookup_event_entry(parent, segment, event) {
            None => {
                let property = self.add_property(parent, name.clone())?;
                if name.is_uuid_or_mixin() {
                    // both properties affect the owning node; resolve eagerly
                    match self.property_state(property) {
                        Ok(state) => self.apply_uuid_mixin(parent, name, &state)?,
                        Err(e) => debug!(%property, error = %e, "uuid/mixin payload unavailable"),
                    }
                }
                Ok(())
            }
            Some(property) => self.reload_property(parent, property, name),
        }
    }

    /// Merge a changed workspace payload into a tracked property. A transient
    /// local edit cannot be merged - the entry turns stale. Entries whose
    /// payload was never built ignore the event.
    fn reload_property(
        &self,
        parent: EntryId,
        id: EntryId,
        name: &Name,
    ) -> Result<(), HierarchyError> {
        let cell = self.cell(id)?;
        let status = {
            let core = cell.core();
            if core.payload.is_none() {
                debug!(entry = %id, "payload not built; property event ignored");
                return Ok(());
            }
            core.status
        };
        match status {
            Status::ExistingModified => {
                // local edit and external change collide
                self.set_status(id, Status::StaleModified)?;
                Ok(())
            }
            Status::Existing | Status::Invalidated => {
                if status == Status::Existing {
                    self.set_status(id, Status::Invalidated)?;
                }
                match self.property_state(id) {
                    Ok(state) => {
                        if name.is_uuid_or_mixin() {
                            self.apply_uuid_mixin(parent, name, &state)?;
                        }
                        Ok(())
                    }
                    Err(HierarchyError::Stale { .. }) => Ok(()),
                    Err(e) => Err(e),
                }
            }
            _ => {
                debug!(entry = %id, ?status, "property event ignored in this state");
                Ok(())
            }
        }
    }

    /// Find the entry an event refers to. Node events with a unique id
    /// consult the parent's attic first, then the child list; positional
    /// fallbacks go through the workspace view. `New` entries are immune.
    fn lookup_event_entry(
        &self,
        parent: EntryId,
        segment: &PathSegment,
        event: &Event,
    ) -> Option<EntryId> {
        let name = segment.name();
        let found = if event.item_id().denotes_node() {
            let by_uid = event_unique_id(event).and_then(|uid| {
                let pcell = self.node_cell(parent).ok()?;
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
                attic
                    .into_iter()
                    .chain(bucket)
                    .find(|e| {
                        self.cell(*e)
                            .map(|c| c.core().unique_id.as_ref() == Some(&uid))
                            .unwrap_or(false)
                    })
            });
            by_uid.or_else(|| self.lookup_node_entry(parent, name, segment.normalized_index()))
        } else {
            self.lookup_property_entry(parent, name)
        };
        let found = found?;
        if self.cell(found).ok()?.core().status == Status::New {
            return None;
        }
        Some(found)
    }

    /// `jcr:uuid` updates the owning node's unique id; `jcr:mixinTypes`
    /// rewrites its mixin set.
    fn apply_uuid_mixin(
        &self,
        parent: EntryId,
        name: &Name,
        state: &PropertyState,
    ) -> Result<(), HierarchyError> {
        if name == &Name::jcr_uuid() {
            match state.value().and_then(Value::as_str) {
                Some(raw) => match UniqueId::new(raw) {
                    Ok(uid) => self.set_unique_id(parent, Some(uid))?,
                    Err(e) => warn!(entry = %parent, error = %e, "ignoring malformed jcr:uuid"),
                },
                None => self.set_unique_id(parent, None)?,
            }
        } else if name == &Name::jcr_mixin_types() {
            let mixins: Vec<Name> = state
                .values()
                .iter()
                .filter_map(Value::as_name)
                .cloned()
                .collect();
            let cell = self.node_cell(parent)?;
            let mut core = cell.core_mut();
            if let Some(node) = core.payload.as_mut().and_then(Payload::as_node_mut) {
                node.set_mixin_types(mixins);
            }
        }
        Ok(())
    }

    pub(crate) fn clear_uuid_mixin(
        &self,
        parent: EntryId,
        name: &Name,
    ) -> Result<(), HierarchyError> {
        if name == &Name::jcr_uuid() {
            self.set_unique_id(parent, None)?;
        } else if name == &Name::jcr_mixin_types() {
            let cell = self.node_cell(parent)?;
            let mut core = cell.core_mut();
            if let Some(node) = core.payload.as_mut().and_then(Payload::as_node_mut) {
                node.set_mixin_types(Vec::new());
            }
        }
        Ok(())
    }
}

fn event_unique_id(event: &Event) -> Option<UniqueId> {
    event
        .item_id()
        .as_node()
        .filter(|n| n.is_unique_only())
        .and_then(|n| n.unique_id())
        .cloned()
}

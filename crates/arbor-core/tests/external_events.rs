//! External event application: conflict detection, attic-first resolution,
//! `New`-entry immunity, and the uuid/mixin side-effects.

mod fixtures;

use arbor_core::{HierarchyError, Status};
use arbor_spi::event::{Event, EventKind};
use arbor_spi::id::{ItemId, NodeId, PropertyId};
use arbor_spi::name::Name;
use arbor_spi::state::{NodeDefinition, PropertyDefinition};
use fixtures::*;

fn node_removed(at: &str) -> Event {
    Event::new(
        EventKind::NodeRemoved,
        ItemId::Node(NodeId::from_path(path(at))),
        path(at),
    )
}

#[test]
fn external_remove_wins_against_local_modify() {
    let (_provider, h) = engine_with_root(vec![child("x", 1)]);
    let root = h.root();
    let x = h.node_entry(root, &name("x"), 1).unwrap().unwrap();
    h.add_new_property(x, name("flag"), PropertyDefinition::default())
        .unwrap();
    assert_eq!(h.status(x).unwrap(), Status::ExistingModified);

    h.refresh(&node_removed("/x")).unwrap();

    assert_eq!(h.status(x).unwrap(), Status::StaleDestroyed);
    let err = h.collect_changes(root, true).unwrap_err();
    assert!(matches!(err, HierarchyError::Stale { .. }));
    // without the stale guard the collection simply skips the wreck
    let log = h.collect_changes(root, false).unwrap();
    assert!(!log.iter().any(|e| e == x));
}

#[test]
fn attic_resolves_an_event_for_a_moved_child() {
    let (_provider, h) =
        engine_with_root(vec![child_with_uid("x", "u-x", 1), child("y", 1)]);
    let root = h.root();
    let x = h.node_entry(root, &name("x"), 1).unwrap().unwrap();
    let y = h.node_entry(root, &name("y"), 1).unwrap().unwrap();
    h.move_entry(x, name("x"), y, true).unwrap();

    let event = Event::new(
        EventKind::NodeRemoved,
        ItemId::Node(NodeId::from_unique_id(uid("u-x"))),
        path("/x"),
    );
    h.refresh(&event).unwrap();

    assert_eq!(h.status(x).unwrap(), Status::StaleDestroyed);
    // the unwound entry left both the new parent and the attic
    assert_eq!(h.node_entry(y, &name("x"), 1).unwrap(), None);
    assert!(h.child_attic_entries(root).unwrap().is_empty());
}

#[test]
fn clean_entries_are_simply_removed() {
    let (_provider, h) = engine_with_root(vec![child("x", 1)]);
    let root = h.root();
    let x = h.node_entry(root, &name("x"), 1).unwrap().unwrap();

    h.refresh(&node_removed("/x")).unwrap();

    assert_eq!(h.status(x).unwrap(), Status::Removed);
    assert_eq!(h.node_entry(root, &name("x"), 1).unwrap(), None);
}

#[test]
fn new_entries_are_immune_to_external_events() {
    let (_provider, h) = engine_with_root(vec![]);
    let root = h.root();
    let n = h
        .add_new_node(
            root,
            name("n"),
            None,
            name("ntUnstructured"),
            NodeDefinition::default(),
        )
        .unwrap();

    h.refresh(&node_removed("/n")).unwrap();
    assert_eq!(h.status(n).unwrap(), Status::New);

    let event = Event::new(
        EventKind::PropertyChanged,
        ItemId::Property(PropertyId::new(
            NodeId::from_path(path("/n")),
            name("anything"),
        )),
        path("/n/anything"),
    );
    // a property event below the New parent must not touch its status
    h.refresh(&event).unwrap();
    assert_eq!(h.status(n).unwrap(), Status::New);
}

#[test]
fn node_added_is_ignored_until_the_child_list_is_loaded() {
    let (provider, h) = engine_with_root(vec![child("y", 1)]);
    let root = h.root();
    let y = h.node_entry(root, &name("y"), 1).unwrap().unwrap();

    let event = Event::new(
        EventKind::NodeAdded,
        ItemId::Node(NodeId::from_path(path("/y/z"))),
        path("/y/z"),
    );
    h.refresh(&event).unwrap();

    // nothing was synthesized; the eventual load observes the child anyway
    provider.script_children("/y", vec![child("z", 1)]);
    let z = h.node_entry(y, &name("z"), 1).unwrap();
    assert!(z.is_some());
}

#[test]
fn node_added_lands_in_a_loaded_child_list() {
    let (provider, h) = engine_with_root(vec![child("a", 1)]);
    let root = h.root();
    let a = h.node_entry(root, &name("a"), 1).unwrap().unwrap();
    assert_eq!(h.node_entries(root).unwrap(), vec![a]);
    let before = provider.call_count();

    let event = Event::new(
        EventKind::NodeAdded,
        ItemId::Node(NodeId::from_path(path("/w"))),
        path("/w"),
    );
    h.refresh(&event).unwrap();

    let w = h.node_entry(root, &name("w"), 1).unwrap().unwrap();
    assert_eq!(h.status(w).unwrap(), Status::Existing);
    assert_eq!(provider.call_count(), before, "no remote call for the event");
}

#[test]
fn node_added_leaves_a_matching_local_new_entry_untouched() {
    let (_provider, h) = engine_with_root(vec![]);
    let root = h.root();
    let n = h
        .add_new_node(
            root,
            name("n"),
            None,
            name("ntUnstructured"),
            NodeDefinition::default(),
        )
        .unwrap();

    let event = Event::new(
        EventKind::NodeAdded,
        ItemId::Node(NodeId::from_path(path("/n"))),
        path("/n"),
    );
    h.refresh(&event).unwrap();

    // reconciliation is deferred to save; no twin entry appears
    assert_eq!(h.status(n).unwrap(), Status::New);
    assert_eq!(h.node_entries_named(root, &name("n")).unwrap(), vec![n]);
}

#[test]
fn uuid_property_event_updates_the_owning_node() {
    let (provider, h) = engine_with_root(vec![child("x", 1)]);
    let root = h.root();
    let x = h.node_entry(root, &name("x"), 1).unwrap().unwrap();
    assert_eq!(h.unique_id(x).unwrap(), None);

    provider.script_property_state(
        &format!("/x/@{}", Name::jcr_uuid()),
        single_string("u-fresh"),
    );
    let event = Event::new(
        EventKind::PropertyChanged,
        ItemId::Property(PropertyId::new(
            NodeId::from_path(path("/x")),
            Name::jcr_uuid(),
        )),
        path("/x/jcr:uuid"),
    );
    h.refresh(&event).unwrap();

    assert_eq!(h.unique_id(x).unwrap(), Some(uid("u-fresh")));
    assert_eq!(h.entry_by_unique_id(&uid("u-fresh")), Some(x));
}

#[test]
fn invalidation_drops_modified_payloads_for_refetch() {
    let (provider, h) = engine_with_root(vec![child("x", 1)]);
    let root = h.root();
    let x = h.node_entry(root, &name("x"), 1).unwrap().unwrap();
    let p = h.add_property(x, name("p")).unwrap();
    provider.script_property_state("/x/@p", single_string("server"));
    h.set_property_values(p, vec![string_value("local")]).unwrap();
    assert_eq!(h.status(p).unwrap(), Status::ExistingModified);

    h.invalidate(x, true).unwrap();

    // identity preserved, payload binding dropped - the local edit included
    assert_eq!(h.status(p).unwrap(), Status::Invalidated);
    assert_eq!(h.property_state(p).unwrap(), single_string("server"));
    assert_eq!(h.status(p).unwrap(), Status::Existing);
}

#[test]
fn property_change_on_a_locally_modified_property_goes_stale() {
    let (provider, h) = engine_with_root(vec![child("x", 1)]);
    let root = h.root();
    let x = h.node_entry(root, &name("x"), 1).unwrap().unwrap();
    let p = h.add_property(x, name("p")).unwrap();
    provider.script_property_state("/x/@p", single_string("server"));
    // resolve, then edit locally
    h.set_property_values(p, vec![string_value("local")]).unwrap();
    assert_eq!(h.status(p).unwrap(), Status::ExistingModified);

    let event = Event::new(
        EventKind::PropertyChanged,
        ItemId::Property(PropertyId::new(NodeId::from_path(path("/x")), name("p"))),
        path("/x/p"),
    );
    h.refresh(&event).unwrap();

    assert_eq!(h.status(p).unwrap(), Status::StaleModified);
    // revert falls back to the workspace; the payload re-resolves on read
    h.revert(p).unwrap();
    assert_eq!(h.status(p).unwrap(), Status::Existing);
    let state = h.property_state(p).unwrap();
    assert_eq!(state.values(), &[string_value("server")]);
}

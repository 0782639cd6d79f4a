//! Transient move and rename: attic bookkeeping, workspace-vs-transient
//! identity, save completion, and the move round-trip law.

mod fixtures;

use arbor_core::Status;
use fixtures::*;

#[test]
fn transient_rename_then_save() {
    let (_provider, h) = engine_with_root(vec![child("a", 1)]);
    let root = h.root();
    let a = h.node_entry(root, &name("a"), 1).unwrap().unwrap();
    assert_eq!(h.status(a).unwrap(), Status::Existing);

    h.move_entry(a, name("b"), root, true).unwrap();

    assert_eq!(h.node_entry(root, &name("b"), 1).unwrap(), Some(a));
    assert_eq!(h.node_entry(root, &name("a"), 1).unwrap(), None);
    assert_eq!(h.child_attic_entries(root).unwrap(), vec![a]);
    assert_eq!(h.path_of(a, true).unwrap().to_string(), "/a");
    assert_eq!(h.path_of(a, false).unwrap().to_string(), "/b");
    assert_eq!(h.status(a).unwrap(), Status::ExistingModified);
    assert!(h.has_revert_info(a).unwrap());
    assert!(h.is_transiently_moved(a).unwrap());

    let log = h.collect_changes(root, true).unwrap();
    assert!(log.modified().contains(&a));
    h.apply_persisted(&log).unwrap();

    assert!(!h.has_revert_info(a).unwrap());
    assert!(h.child_attic_entries(root).unwrap().is_empty());
    assert_eq!(h.status(a).unwrap(), Status::Existing);
    assert_eq!(
        h.workspace_node_id(a).unwrap(),
        h.node_id_of(a).unwrap(),
        "after save the workspace view catches up with the transient view"
    );
    assert_eq!(h.path_of(a, true).unwrap().to_string(), "/b");
}

#[test]
fn move_to_another_parent_and_revert() {
    let (_provider, h) = engine_with_root(vec![child("x", 1), child("y", 1)]);
    let root = h.root();
    let x = h.node_entry(root, &name("x"), 1).unwrap().unwrap();
    let y = h.node_entry(root, &name("y"), 1).unwrap().unwrap();

    h.move_entry(x, name("x"), y, true).unwrap();
    assert_eq!(h.parent(x).unwrap(), Some(y));
    assert_eq!(h.node_entry(y, &name("x"), 1).unwrap(), Some(x));
    assert_eq!(h.path_of(x, true).unwrap().to_string(), "/x");
    assert_eq!(h.path_of(x, false).unwrap().to_string(), "/y/x");

    h.revert(root).unwrap();
    assert_eq!(h.parent(x).unwrap(), Some(root));
    assert_eq!(h.node_entry(root, &name("x"), 1).unwrap(), Some(x));
    assert_eq!(h.node_entry(y, &name("x"), 1).unwrap(), None);
    assert!(h.child_attic_entries(root).unwrap().is_empty());
    assert!(!h.has_revert_info(x).unwrap());
    assert_eq!(h.status(x).unwrap(), Status::Existing);
}

#[test]
fn moves_compose_to_identity_in_the_change_log() {
    let (_provider, h) = engine_with_root(vec![child("x", 1), child("y", 1)]);
    let root = h.root();
    let x = h.node_entry(root, &name("x"), 1).unwrap().unwrap();
    let y = h.node_entry(root, &name("y"), 1).unwrap().unwrap();

    h.move_entry(x, name("x"), y, true).unwrap();
    h.move_entry(x, name("x"), root, true).unwrap();

    assert!(!h.has_revert_info(x).unwrap());
    assert!(h.child_attic_entries(root).unwrap().is_empty());
    assert_eq!(h.status(x).unwrap(), Status::Existing);
    let log = h.collect_changes(root, true).unwrap();
    assert!(log.is_empty(), "move there and back stages nothing: {log:?}");
}

#[test]
fn rename_back_composes_to_identity() {
    let (_provider, h) = engine_with_root(vec![child("a", 1)]);
    let root = h.root();
    let a = h.node_entry(root, &name("a"), 1).unwrap().unwrap();

    h.move_entry(a, name("b"), root, true).unwrap();
    h.move_entry(a, name("a"), root, true).unwrap();

    assert!(!h.has_revert_info(a).unwrap());
    assert!(h.collect_changes(root, true).unwrap().is_empty());
    assert_eq!(h.node_entry(root, &name("a"), 1).unwrap(), Some(a));
}

#[test]
fn root_cannot_be_moved() {
    let (_provider, h) = engine_with_root(vec![child("a", 1)]);
    let root = h.root();
    let a = h.node_entry(root, &name("a"), 1).unwrap().unwrap();
    let err = h.move_entry(root, name("elsewhere"), a, true).unwrap_err();
    assert!(matches!(err, arbor_core::HierarchyError::Invalid { .. }));
}

#[test]
fn move_below_own_subtree_is_invalid() {
    let (provider, h) = engine_with_root(vec![child("a", 1)]);
    provider.script_children("/a", vec![child("b", 1)]);
    let root = h.root();
    let a = h.node_entry(root, &name("a"), 1).unwrap().unwrap();
    let b = h.node_entry(a, &name("b"), 1).unwrap().unwrap();
    let err = h.move_entry(a, name("a"), b, true).unwrap_err();
    assert!(matches!(err, arbor_core::HierarchyError::Invalid { .. }));
}

#[test]
fn second_move_keeps_the_first_snapshot() {
    let (_provider, h) = engine_with_root(vec![child("x", 1), child("y", 1)]);
    let root = h.root();
    let x = h.node_entry(root, &name("x"), 1).unwrap().unwrap();
    let y = h.node_entry(root, &name("y"), 1).unwrap().unwrap();

    h.move_entry(x, name("x2"), y, true).unwrap();
    h.move_entry(x, name("x3"), y, true).unwrap();

    // the workspace still sees the original slot
    assert_eq!(h.path_of(x, true).unwrap().to_string(), "/x");
    assert_eq!(h.path_of(x, false).unwrap().to_string(), "/y/x3");
    // and only one attic slot was taken
    assert_eq!(h.child_attic_entries(root).unwrap(), vec![x]);

    h.revert(root).unwrap();
    assert_eq!(h.path_of(x, false).unwrap().to_string(), "/x");
}

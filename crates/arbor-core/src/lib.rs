//! Transient hierarchy engine.
//!
//! An in-memory graph of node and property entries shadowing a remote
//! workspace. The engine stages uncommitted edits (add / remove / move /
//! reorder / rename), absorbs external change events from the server, and can
//! revert any uncommitted edit back to the exact state last observed on the
//! workspace.
//!
//! Module hierarchy follows type dependency order:
//! - status: the per-entry lifecycle state machine
//! - entry: entry cells (shared core + node body) and handles
//! - store: the arena owning all cells, plus the unique-id index
//! - children: the ordered child list with same-name-sibling buckets
//! - attic: parked handles for transiently moved-away children
//! - revert: the revert ledger (identity snapshot + reorder log)
//! - hierarchy: the engine facade composing the above
//! - refresh: external event application
//! - changes: dirty-set collection and save completion

#![forbid(unsafe_code)]

mod attic;
mod changes;
mod children;
mod entry;
mod error;
mod hierarchy;
mod refresh;
mod revert;
mod status;
mod store;

pub use changes::ChangeLog;
pub use entry::EntryId;
pub use error::{HierarchyError, InternalError};
pub use hierarchy::Hierarchy;
pub use status::Status;

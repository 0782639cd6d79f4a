//! Engine error taxonomy.
//!
//! Kinds, not causes: callers dispatch on the variant. Provider failures map
//! onto `NotFound` / `Transport` at the seam; `Transport` is never masked.
//! `Internal` carries rejected invariants (illegal status transitions, corrupt
//! parent links) - these indicate a bug, not a runtime condition.

use thiserror::Error;

use arbor_spi::provider::ProviderError;

use crate::entry::EntryId;
use crate::status::Status;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum HierarchyError {
    #[error("item not found: {path}")]
    NotFound { path: String },
    #[error("item already exists: {name}")]
    Exists { name: String },
    #[error("invalid operation: {reason}")]
    Invalid { reason: String },
    #[error("stale item: {reason}")]
    Stale { reason: String },
    #[error("transport failure: {reason}")]
    Transport { reason: String },
    #[error(transparent)]
    Internal(#[from] InternalError),
}

impl HierarchyError {
    pub(crate) fn not_found(path: impl ToString) -> Self {
        Self::NotFound {
            path: path.to_string(),
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }

    pub(crate) fn stale(reason: impl ToString) -> Self {
        Self::Stale {
            reason: reason.to_string(),
        }
    }
}

impl From<ProviderError> for HierarchyError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotFound { item } => Self::NotFound { path: item },
            ProviderError::Transport { reason } => Self::Transport { reason },
        }
    }
}

/// Invariant violations. Reaching one of these means the engine state is
/// corrupt; callers are not expected to recover.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum InternalError {
    #[error("illegal status transition {from:?} -> {to:?} on {id}")]
    StatusTransition {
        id: EntryId,
        from: Status,
        to: Status,
    },
    #[error("entry {id} is not connected to its parent")]
    ParentMismatch { id: EntryId },
    #[error("entry {id} is not a {expected}")]
    KindMismatch {
        id: EntryId,
        expected: &'static str,
    },
}

//! Item identifiers.
//!
//! A node is addressed either by a workspace-stable unique id (the `jcr:uuid`
//! value), or by a path anchored at the nearest uniquely-identified ancestor
//! (falling back to the root). Properties are addressed by owning node plus
//! name. The [`IdFactory`] seam lets a session swap the composition rules.

use std::fmt;

use thiserror::Error;

use crate::name::Name;
use crate::path::Path;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("unique id `{raw}` is invalid: {reason}")]
    UniqueId { raw: String, reason: String },
}

/// Workspace-stable opaque identifier - non-empty string after trimming.
///
/// The server mints these; the client only carries them around.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UniqueId(String);

impl UniqueId {
    pub fn new(s: impl Into<String>) -> Result<Self, IdError> {
        let s = s.into();
        if s.trim().is_empty() {
            Err(IdError::UniqueId {
                raw: s,
                reason: "empty".into(),
            })
        } else {
            Ok(Self(s))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UniqueId({:?})", self.0)
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for UniqueId {
    type Error = IdError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        UniqueId::new(s)
    }
}

/// Node identifier: unique id, anchored path, or both (unique ancestor +
/// relative hop path). At least one part is always present.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct NodeId {
    unique_id: Option<UniqueId>,
    path: Option<Path>,
}

impl NodeId {
    pub fn from_unique_id(unique_id: UniqueId) -> Self {
        Self {
            unique_id: Some(unique_id),
            path: None,
        }
    }

    pub fn from_path(path: Path) -> Self {
        Self {
            unique_id: None,
            path: Some(path),
        }
    }

    pub fn new(unique_id: UniqueId, relative: Path) -> Self {
        Self {
            unique_id: Some(unique_id),
            path: Some(relative),
        }
    }

    pub fn unique_id(&self) -> Option<&UniqueId> {
        self.unique_id.as_ref()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_ref()
    }

    /// True when the id is a bare unique id with no path part.
    pub fn is_unique_only(&self) -> bool {
        self.unique_id.is_some() && self.path.is_none()
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({self})")
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.unique_id, &self.path) {
            (Some(uid), None) => write!(f, "[{uid}]"),
            (Some(uid), Some(path)) => write!(f, "[{uid}]/{path}"),
            (None, Some(path)) => write!(f, "{path}"),
            (None, None) => write!(f, "<empty node id>"),
        }
    }
}

/// Property identifier: owning node plus property name.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PropertyId {
    parent: NodeId,
    name: Name,
}

impl PropertyId {
    pub fn new(parent: NodeId, name: Name) -> Self {
        Self { parent, name }
    }

    pub fn parent(&self) -> &NodeId {
        &self.parent
    }

    pub fn name(&self) -> &Name {
        &self.name
    }
}

impl fmt::Debug for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PropertyId({self})")
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/@{}", self.parent, self.name)
    }
}

/// Either kind of item identifier, as carried by events.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ItemId {
    Node(NodeId),
    Property(PropertyId),
}

impl ItemId {
    pub fn denotes_node(&self) -> bool {
        matches!(self, ItemId::Node(_))
    }

    pub fn as_node(&self) -> Option<&NodeId> {
        match self {
            ItemId::Node(id) => Some(id),
            ItemId::Property(_) => None,
        }
    }
}

impl From<NodeId> for ItemId {
    fn from(id: NodeId) -> Self {
        ItemId::Node(id)
    }
}

impl From<PropertyId> for ItemId {
    fn from(id: PropertyId) -> Self {
        ItemId::Property(id)
    }
}

/// Builds item ids from hierarchy positions.
pub trait IdFactory: Send + Sync {
    /// Id of the workspace root.
    fn root_node_id(&self) -> NodeId;

    /// Id of a node `relative` hops below `parent`.
    fn node_id(&self, parent: &NodeId, relative: &Path) -> NodeId;

    fn node_id_from_unique(&self, unique_id: UniqueId) -> NodeId;

    fn property_id(&self, parent: NodeId, name: Name) -> PropertyId;
}

/// Standard composition: a unique ancestor absorbs the path prefix, otherwise
/// paths concatenate down from the root.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultIdFactory;

impl IdFactory for DefaultIdFactory {
    fn root_node_id(&self) -> NodeId {
        NodeId::from_path(Path::root())
    }

    fn node_id(&self, parent: &NodeId, relative: &Path) -> NodeId {
        match (parent.unique_id(), parent.path()) {
            (Some(uid), None) => NodeId::new(uid.clone(), relative.clone()),
            (Some(uid), Some(path)) => NodeId::new(uid.clone(), path.join(relative)),
            (None, Some(path)) => NodeId::from_path(path.join(relative)),
            (None, None) => NodeId::from_path(relative.clone()),
        }
    }

    fn node_id_from_unique(&self, unique_id: UniqueId) -> NodeId {
        NodeId::from_unique_id(unique_id)
    }

    fn property_id(&self, parent: NodeId, name: Name) -> PropertyId {
        PropertyId::new(parent, name)
    }
}

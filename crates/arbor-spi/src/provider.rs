//! The remote read surface.
//!
//! Everything the hierarchy engine ever asks of the server goes through
//! [`RemoteProvider`]. Calls may block; the engine never invokes them while
//! holding entry locks. Deep-state calls return the traversed hop list so the
//! engine - not the provider - materializes intermediate entries.

use thiserror::Error;

use crate::id::{NodeId, PropertyId, UniqueId};
use crate::name::Name;
use crate::path::Path;
use crate::state::{NodeState, PropertyState};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("item `{item}` not found on the workspace")]
    NotFound { item: String },
    #[error("transport failure: {reason}")]
    Transport { reason: String },
}

impl ProviderError {
    pub fn not_found(item: impl ToString) -> Self {
        Self::NotFound {
            item: item.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// One child slot as the server reports it, in server order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChildInfo {
    name: Name,
    unique_id: Option<UniqueId>,
    index: u32,
}

impl ChildInfo {
    pub fn new(name: Name, unique_id: Option<UniqueId>, index: u32) -> Self {
        Self {
            name,
            unique_id,
            index: index.max(1),
        }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn unique_id(&self) -> Option<&UniqueId> {
        self.unique_id.as_ref()
    }

    /// 1-based same-name-sibling index.
    pub fn index(&self) -> u32 {
        self.index
    }
}

/// Result of resolving a whole path suffix in one round trip: one hop per
/// traversed segment (target included, in order) plus the target's payload.
#[derive(Clone, Debug)]
pub struct DeepNodeInfo {
    pub hops: Vec<ChildInfo>,
    pub state: NodeState,
}

/// Property-flavored counterpart: the hops cover the node segments above the
/// property.
#[derive(Clone, Debug)]
pub struct DeepPropertyInfo {
    pub hops: Vec<ChildInfo>,
    pub state: PropertyState,
}

pub trait RemoteProvider: Send + Sync {
    /// Child slots of a node, in server order.
    fn child_infos(&self, id: &NodeId) -> Result<Vec<ChildInfo>, ProviderError>;

    fn node_state(&self, id: &NodeId) -> Result<NodeState, ProviderError>;

    fn property_state(&self, id: &PropertyId) -> Result<PropertyState, ProviderError>;

    /// Resolve `remaining` below `anchor` in a single call.
    fn deep_node_state(
        &self,
        anchor: &NodeId,
        remaining: &Path,
    ) -> Result<DeepNodeInfo, ProviderError>;

    /// Resolve `remaining` below `anchor` where the final segment names a
    /// property.
    fn deep_property_state(
        &self,
        anchor: &NodeId,
        remaining: &Path,
    ) -> Result<DeepPropertyInfo, ProviderError>;
}

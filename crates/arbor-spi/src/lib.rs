//! Shared vocabulary for the arbor workspace client.
//!
//! Module hierarchy follows type dependency order:
//! - name: qualified names and the prefix resolver
//! - path: path segments, normalized sibling indices, the builder
//! - id: opaque unique ids, node and property identifiers, the id factory
//! - state: resolved item payloads and definitions
//! - event: external change notifications
//! - provider: the remote read surface consumed by the hierarchy engine

#![forbid(unsafe_code)]

pub mod event;
pub mod id;
pub mod name;
pub mod path;
pub mod provider;
pub mod state;

pub use event::{Event, EventKind};
pub use id::{DefaultIdFactory, IdError, IdFactory, ItemId, NodeId, PropertyId, UniqueId};
pub use name::{Name, NameError, NameResolver, PrefixResolver, NS_JCR_URI};
pub use path::{Path, PathBuilder, PathError, PathSegment};
pub use provider::{ChildInfo, DeepNodeInfo, DeepPropertyInfo, ProviderError, RemoteProvider};
pub use state::{NodeDefinition, NodeState, PropertyDefinition, PropertyState, Value};

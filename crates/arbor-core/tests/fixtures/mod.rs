//! Shared test fixtures: a scripted in-memory provider that records every
//! remote call, plus small builders for names, paths and payloads.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use arbor_core::Hierarchy;
use arbor_spi::id::{DefaultIdFactory, NodeId, PropertyId, UniqueId};
use arbor_spi::name::{Name, PrefixResolver};
use arbor_spi::path::Path;
use arbor_spi::provider::{
    ChildInfo, DeepNodeInfo, DeepPropertyInfo, ProviderError, RemoteProvider,
};
use arbor_spi::state::{
    NodeDefinition, NodeState, PropertyDefinition, PropertyState, Value,
};

pub fn name(raw: &str) -> Name {
    Name::plain(raw).unwrap()
}

pub fn path(raw: &str) -> Path {
    Path::parse(raw, &PrefixResolver::new()).unwrap()
}

pub fn uid(raw: &str) -> UniqueId {
    UniqueId::new(raw).unwrap()
}

pub fn node_payload(allows_sns: bool) -> NodeState {
    NodeState::new(name("ntUnstructured"), NodeDefinition { allows_sns })
}

pub fn string_value(raw: &str) -> Value {
    Value::String(raw.to_owned())
}

pub fn single_string(raw: &str) -> PropertyState {
    PropertyState::new(vec![string_value(raw)], PropertyDefinition::default())
}

pub fn child(raw: &str, index: u32) -> ChildInfo {
    ChildInfo::new(name(raw), None, index)
}

pub fn child_with_uid(raw: &str, unique: &str, index: u32) -> ChildInfo {
    ChildInfo::new(name(raw), Some(uid(unique)), index)
}

/// In-memory provider scripted per workspace id. Records every call so tests
/// can assert on the number and shape of round trips.
#[derive(Default)]
pub struct ScriptedProvider {
    children: Mutex<HashMap<String, Vec<ChildInfo>>>,
    node_states: Mutex<HashMap<String, NodeState>>,
    property_states: Mutex<HashMap<String, PropertyState>>,
    deep_nodes: Mutex<HashMap<String, DeepNodeInfo>>,
    deep_properties: Mutex<HashMap<String, DeepPropertyInfo>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_children(&self, workspace_id: &str, infos: Vec<ChildInfo>) {
        self.children
            .lock()
            .unwrap()
            .insert(workspace_id.to_owned(), infos);
    }

    pub fn script_node_state(&self, workspace_id: &str, state: NodeState) {
        self.node_states
            .lock()
            .unwrap()
            .insert(workspace_id.to_owned(), state);
    }

    pub fn script_property_state(&self, property_id: &str, state: PropertyState) {
        self.property_states
            .lock()
            .unwrap()
            .insert(property_id.to_owned(), state);
    }

    pub fn script_deep_node(&self, key: &str, hops: Vec<ChildInfo>, state: NodeState) {
        self.deep_nodes
            .lock()
            .unwrap()
            .insert(key.to_owned(), DeepNodeInfo { hops, state });
    }

    pub fn script_deep_property(&self, key: &str, hops: Vec<ChildInfo>, state: PropertyState) {
        self.deep_properties
            .lock()
            .unwrap()
            .insert(key.to_owned(), DeepPropertyInfo { hops, state });
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl RemoteProvider for ScriptedProvider {
    fn child_infos(&self, id: &NodeId) -> Result<Vec<ChildInfo>, ProviderError> {
        self.record(format!("child_infos:{id}"));
        Ok(self
            .children
            .lock()
            .unwrap()
            .get(&id.to_string())
            .cloned()
            .unwrap_or_default())
    }

    fn node_state(&self, id: &NodeId) -> Result<NodeState, ProviderError> {
        self.record(format!("node_state:{id}"));
        self.node_states
            .lock()
            .unwrap()
            .get(&id.to_string())
            .cloned()
            .ok_or_else(|| ProviderError::not_found(id))
    }

    fn property_state(&self, id: &PropertyId) -> Result<PropertyState, ProviderError> {
        self.record(format!("property_state:{id}"));
        self.property_states
            .lock()
            .unwrap()
            .get(&id.to_string())
            .cloned()
            .ok_or_else(|| ProviderError::not_found(id))
    }

    fn deep_node_state(
        &self,
        anchor: &NodeId,
        remaining: &Path,
    ) -> Result<DeepNodeInfo, ProviderError> {
        self.record(format!("deep_node_state:{anchor}|{remaining}"));
        self.deep_nodes
            .lock()
            .unwrap()
            .get(&format!("{anchor}|{remaining}"))
            .cloned()
            .ok_or_else(|| ProviderError::not_found(format!("{anchor}/{remaining}")))
    }

    fn deep_property_state(
        &self,
        anchor: &NodeId,
        remaining: &Path,
    ) -> Result<DeepPropertyInfo, ProviderError> {
        self.record(format!("deep_property_state:{anchor}|{remaining}"));
        self.deep_properties
            .lock()
            .unwrap()
            .get(&format!("{anchor}|{remaining}"))
            .cloned()
            .ok_or_else(|| ProviderError::not_found(format!("{anchor}/{remaining}")))
    }
}

/// Engine over a scripted provider whose root lists the given children.
pub fn engine_with_root(children: Vec<ChildInfo>) -> (Arc<ScriptedProvider>, Hierarchy) {
    let provider = Arc::new(ScriptedProvider::new());
    provider.script_children("/", children);
    let hierarchy = Hierarchy::new(provider.clone(), Arc::new(DefaultIdFactory));
    (provider, hierarchy)
}

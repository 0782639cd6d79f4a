//! Resolved item payloads.
//!
//! These are the server-side facts about an item: type information and the
//! item-definition bits the hierarchy engine consumes (same-name-sibling
//! permission, multi-valuedness), plus property values. The engine treats a
//! payload as an opaque snapshot; staging and revert happen above it.

use crate::name::Name;

/// Property value. Kept to the types the engine itself inspects; richer value
/// kinds live with the session's value factory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    String(String),
    Long(i64),
    Boolean(bool),
    Name(Name),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_name(&self) -> Option<&Name> {
        match self {
            Value::Name(n) => Some(n),
            _ => None,
        }
    }
}

/// The node-definition bits the engine consumes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NodeDefinition {
    pub allows_sns: bool,
}

impl NodeDefinition {
    pub fn sns() -> Self {
        Self { allows_sns: true }
    }
}

/// The property-definition bits the engine consumes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PropertyDefinition {
    pub multiple: bool,
}

/// Server-side node snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeState {
    primary_type: Name,
    mixin_types: Vec<Name>,
    definition: NodeDefinition,
}

impl NodeState {
    pub fn new(primary_type: Name, definition: NodeDefinition) -> Self {
        Self {
            primary_type,
            mixin_types: Vec::new(),
            definition,
        }
    }

    pub fn primary_type(&self) -> &Name {
        &self.primary_type
    }

    pub fn mixin_types(&self) -> &[Name] {
        &self.mixin_types
    }

    pub fn set_mixin_types(&mut self, mixin_types: Vec<Name>) {
        self.mixin_types = mixin_types;
    }

    pub fn definition(&self) -> NodeDefinition {
        self.definition
    }
}

/// Server-side property snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropertyState {
    values: Vec<Value>,
    definition: PropertyDefinition,
}

impl PropertyState {
    pub fn new(values: Vec<Value>, definition: PropertyDefinition) -> Self {
        Self { values, definition }
    }

    pub fn empty(definition: PropertyDefinition) -> Self {
        Self {
            values: Vec::new(),
            definition,
        }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn set_values(&mut self, values: Vec<Value>) {
        self.values = values;
    }

    /// Single value of a single-valued property.
    pub fn value(&self) -> Option<&Value> {
        if self.definition.multiple {
            None
        } else {
            self.values.first()
        }
    }

    pub fn definition(&self) -> PropertyDefinition {
        self.definition
    }
}

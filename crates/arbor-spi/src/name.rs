//! Qualified names.
//!
//! A name is an optional namespace URI plus a local part. The expanded string
//! form is `{uri}local`; session-facing strings use a prefix (`jcr:uuid`) and
//! go through a [`NameResolver`].

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

/// Namespace URI reserved for repository-defined items.
pub const NS_JCR_URI: &str = "http://www.jcp.org/jcr/1.0";

/// Characters that may not appear in a local name.
const FORBIDDEN: &[char] = &['/', ':', '[', ']', '|', '*'];

/// Invalid or unresolvable name string.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NameError {
    #[error("name `{raw}` is malformed: {reason}")]
    Malformed { raw: String, reason: String },
    #[error("prefix `{prefix}` is not declared")]
    UndeclaredPrefix { prefix: String },
}

/// Qualified name: optional namespace URI + non-empty local part.
///
/// The root sentinel is the only name with an empty local part; it cannot be
/// produced through [`Name::new`].
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Name {
    namespace: Option<Box<str>>,
    local: Box<str>,
}

impl Name {
    pub fn new(namespace: Option<&str>, local: impl Into<String>) -> Result<Self, NameError> {
        let local = local.into();
        if local.trim().is_empty() {
            return Err(NameError::Malformed {
                raw: local,
                reason: "empty local part".into(),
            });
        }
        if let Some(bad) = local.chars().find(|c| FORBIDDEN.contains(c)) {
            return Err(NameError::Malformed {
                raw: local,
                reason: format!("local part contains `{bad}`"),
            });
        }
        Ok(Self {
            namespace: namespace.filter(|ns| !ns.is_empty()).map(Into::into),
            local: local.into(),
        })
    }

    /// Name without a namespace.
    pub fn plain(local: impl Into<String>) -> Result<Self, NameError> {
        Self::new(None, local)
    }

    /// The root sentinel: empty local part, no namespace.
    pub fn root() -> Self {
        Self {
            namespace: None,
            local: "".into(),
        }
    }

    /// `jcr:uuid` - the workspace-stable identifier property.
    pub fn jcr_uuid() -> Self {
        Self {
            namespace: Some(NS_JCR_URI.into()),
            local: "uuid".into(),
        }
    }

    /// `jcr:mixinTypes` - the mixin set property.
    pub fn jcr_mixin_types() -> Self {
        Self {
            namespace: Some(NS_JCR_URI.into()),
            local: "mixinTypes".into(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.local.is_empty()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn local(&self) -> &str {
        &self.local
    }

    /// True for the two properties whose change affects the owning node.
    pub fn is_uuid_or_mixin(&self) -> bool {
        self.namespace.as_deref() == Some(NS_JCR_URI)
            && (&*self.local == "uuid" || &*self.local == "mixinTypes")
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({self})")
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{{{ns}}}{}", self.local),
            None => write!(f, "{}", self.local),
        }
    }
}

/// Resolves session-facing prefixed strings to qualified names and back.
pub trait NameResolver: Send + Sync {
    fn parse(&self, raw: &str) -> Result<Name, NameError>;
    fn format(&self, name: &Name) -> String;
}

/// Table-backed resolver with the `jcr` prefix preregistered.
pub struct PrefixResolver {
    by_prefix: HashMap<String, String>,
    by_uri: HashMap<String, String>,
}

impl PrefixResolver {
    pub fn new() -> Self {
        let mut resolver = Self {
            by_prefix: HashMap::new(),
            by_uri: HashMap::new(),
        };
        resolver.declare("jcr", NS_JCR_URI);
        resolver
    }

    pub fn declare(&mut self, prefix: impl Into<String>, uri: impl Into<String>) {
        let (prefix, uri) = (prefix.into(), uri.into());
        self.by_uri.insert(uri.clone(), prefix.clone());
        self.by_prefix.insert(prefix, uri);
    }
}

impl Default for PrefixResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl NameResolver for PrefixResolver {
    fn parse(&self, raw: &str) -> Result<Name, NameError> {
        match raw.split_once(':') {
            None => Name::plain(raw),
            Some((prefix, local)) => {
                let uri = self
                    .by_prefix
                    .get(prefix)
                    .ok_or_else(|| NameError::UndeclaredPrefix {
                        prefix: prefix.to_owned(),
                    })?;
                Name::new(Some(uri.as_str()), local)
            }
        }
    }

    fn format(&self, name: &Name) -> String {
        match name.namespace() {
            Some(uri) => match self.by_uri.get(uri) {
                Some(prefix) => format!("{prefix}:{}", name.local()),
                None => name.to_string(),
            },
            None => name.local().to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_forbidden_locals() {
        assert!(Name::plain("").is_err());
        assert!(Name::plain("  ").is_err());
        assert!(Name::plain("a/b").is_err());
        assert!(Name::plain("a[1]").is_err());
    }

    #[test]
    fn root_sentinel_is_not_constructible() {
        assert!(Name::root().is_root());
        assert!(!Name::plain("a").unwrap().is_root());
    }

    #[test]
    fn resolver_round_trips_declared_prefixes() {
        let resolver = PrefixResolver::new();
        let parsed = resolver.parse("jcr:uuid").unwrap();
        assert_eq!(parsed, Name::jcr_uuid());
        assert_eq!(resolver.format(&parsed), "jcr:uuid");
    }

    #[test]
    fn undeclared_prefix_is_an_error() {
        let resolver = PrefixResolver::new();
        assert!(matches!(
            resolver.parse("nt:unstructured"),
            Err(NameError::UndeclaredPrefix { .. })
        ));
    }

    #[test]
    fn uuid_and_mixin_are_special() {
        assert!(Name::jcr_uuid().is_uuid_or_mixin());
        assert!(Name::jcr_mixin_types().is_uuid_or_mixin());
        assert!(!Name::plain("uuid").unwrap().is_uuid_or_mixin());
    }
}

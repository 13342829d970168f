//! # Core Type Definitions
//!
//! This module contains all core types for the Stratus document cache:
//! - Entity and field identity (`EntityKey`, `FieldKey`, `LayerKey`)
//! - Stored values (`Value`, `Link`)
//! - Error types (`CacheError`)
//! - The warn-once sink (`Warnings`)
//!
//! ## Determinism Guarantees
//!
//! All types in this module:
//! - Use `BTreeMap`/`BTreeSet` for deterministic ordering (no `HashMap`)
//! - Implement `Ord` where they are used as map keys
//! - Never panic; fallible operations return `Result<T, CacheError>`

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

// =============================================================================
// ENTITY & FIELD IDENTITY
// =============================================================================

/// Stable string identity of a normalized entity.
///
/// Entity keys are `Typename:id` for keyed entities, one of the fixed root
/// keys (`Query`, `Mutation`, `Subscription` by default), or a generated
/// embedded key (`parentKey.fieldKey`) for key-less data.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey(pub String);

impl EntityKey {
    /// Create a new entity key from a string.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one field occurrence on an entity, including its arguments.
///
/// Field keys are `fieldName` for argument-less fields and
/// `fieldName(canonicalArgsJSON)` otherwise. The argument serialization is
/// canonical: equivalent argument objects always collapse to one key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldKey(pub String);

impl FieldKey {
    /// Create a new field key from a string.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one optimistic overlay, supplied by the caller for each
/// in-flight mutation. Layers are consulted newest-first on reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LayerKey(pub u64);

impl LayerKey {
    /// Create a new layer key.
    #[must_use]
    pub const fn new(key: u64) -> Self {
        Self(key)
    }

    /// Get the raw key value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

// =============================================================================
// VALUES
// =============================================================================

/// A JSON-shaped value as it appears in response data, arguments, and
/// stored records.
///
/// Objects use `BTreeMap` so that serialization is canonical by
/// construction: two objects with the same entries always serialize to the
/// same string regardless of insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    /// An explicit null.
    #[default]
    Null,
    /// A boolean scalar.
    Boolean(bool),
    /// An integer scalar.
    Int(i64),
    /// A floating-point scalar. Stored and serialized, never computed with.
    Float(f64),
    /// A string scalar.
    String(String),
    /// A list of values.
    List(Vec<Value>),
    /// An object with deterministically ordered fields.
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// Check whether this value is `null`.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// View this value as a string slice, if it is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// View this value as an object, if it is one.
    #[must_use]
    pub const fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    /// View this value as a list, if it is one.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Get a field of an object value.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.as_object().and_then(|map| map.get(field))
    }

    /// Build an object value from an ordered list of entries.
    #[must_use]
    pub fn object<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Self::Object(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Build a list value.
    #[must_use]
    pub fn list<V: Into<Value>>(items: impl IntoIterator<Item = V>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

// =============================================================================
// LINKS
// =============================================================================

/// A stored edge from one entity field to other entities.
///
/// Links are `null`, a single entity key, or a possibly nested,
/// possibly null-containing list of entity keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Link {
    /// An explicit null edge.
    Null,
    /// A reference to one entity.
    Entity(EntityKey),
    /// A list of edges, possibly nested, possibly containing nulls.
    List(Vec<Link>),
}

impl Link {
    /// Collect every entity key reachable through this link, in order.
    pub fn collect_keys<'a>(&'a self, out: &mut Vec<&'a EntityKey>) {
        match self {
            Self::Null => {}
            Self::Entity(key) => out.push(key),
            Self::List(items) => {
                for item in items {
                    item.collect_keys(out);
                }
            }
        }
    }

    /// Iterate over every entity key reachable through this link.
    #[must_use]
    pub fn entity_keys(&self) -> Vec<&EntityKey> {
        let mut out = Vec::new();
        self.collect_keys(&mut out);
        out
    }
}

// =============================================================================
// DEPENDENCIES
// =============================================================================

/// The set of entities (and root fields) touched during one operation.
///
/// Entries are entity keys (`Todo:1`) or, for fields on the query root,
/// `Query.fieldKey` pairs. The surrounding exchange uses this set to decide
/// which in-flight queries must be re-evaluated.
pub type Dependencies = BTreeSet<String>;

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Fatal caller-contract violations.
///
/// Schema mismatches and malformed response data are never fatal; they are
/// logged once per distinct message and traversal continues best-effort.
/// The variants below indicate a bug in the caller, not bad data.
#[derive(Debug, Error)]
pub enum CacheError {
    /// An operation of the wrong kind was handed to an entry point,
    /// e.g. `write_optimistic` with a query document.
    #[error("expected a {expected} operation, found {found}")]
    WrongOperationKind {
        /// The operation kind the entry point requires.
        expected: &'static str,
        /// The operation kind that was supplied.
        found: String,
    },

    /// Response data handed to a write was not an object.
    #[error("response data must be an object")]
    NotAnObject,

    /// A fragment document was handed to the fragment helpers without
    /// containing any fragment definition.
    #[error("fragment document contains no fragment definition")]
    MissingFragment,

    /// Fragment data did not produce an entity key, so there is no entity
    /// to patch.
    #[error("fragment data for {typename} has no key")]
    UnkeyableFragment {
        /// The fragment's type condition.
        typename: String,
    },

    /// A snapshot could not be serialized or hydrated.
    #[error("snapshot format error: {0}")]
    Snapshot(String),

    /// An introspection document could not be interpreted as a schema.
    #[error("invalid introspection data: {0}")]
    InvalidIntrospection(String),
}

// =============================================================================
// WARN-ONCE SINK
// =============================================================================

/// Deduplicated warning sink.
///
/// Non-fatal conditions (schema mismatches, malformed writes) are logged at
/// most once per distinct message so that a hot read/write path does not
/// flood the log.
#[derive(Debug, Default)]
pub struct Warnings {
    seen: BTreeSet<String>,
}

impl Warnings {
    /// Create a new empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit a warning unless an identical message was emitted before.
    pub fn warn_once(&mut self, message: impl Into<String>) {
        let message = message.into();
        if self.seen.insert(message.clone()) {
            tracing::warn!(target: "stratus_core", "{message}");
        }
    }

    /// Number of distinct warnings emitted so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Check whether no warnings have been emitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_object_is_order_independent() {
        let a = Value::object([("a", 1i64), ("b", 2i64)]);
        let b = Value::object([("b", 2i64), ("a", 1i64)]);
        assert_eq!(a, b);
    }

    #[test]
    fn value_json_roundtrip() {
        let value = Value::object([
            ("id", Value::from("1")),
            ("done", Value::from(false)),
            ("count", Value::from(3i64)),
            ("tags", Value::list(["a", "b"])),
            ("meta", Value::Null),
        ]);
        let json = serde_json::to_string(&value).expect("serialize");
        let back: Value = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(value, back);
    }

    #[test]
    fn link_collects_nested_keys() {
        let link = Link::List(vec![
            Link::Entity(EntityKey::new("Todo:1")),
            Link::Null,
            Link::List(vec![Link::Entity(EntityKey::new("Todo:2"))]),
        ]);
        let keys: Vec<_> = link.entity_keys().iter().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["Todo:1", "Todo:2"]);
    }

    #[test]
    fn warnings_deduplicate_by_message() {
        let mut warnings = Warnings::new();
        warnings.warn_once("a");
        warnings.warn_once("a");
        warnings.warn_once("b");
        assert_eq!(warnings.len(), 2);
    }
}

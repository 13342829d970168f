//! # Key & Field Codec
//!
//! Derives the stable string identity of entities and field occurrences.
//!
//! - Entity keys are `Typename:id`, produced by a pluggable per-typename
//!   key function falling back to the `id` then `_id` fields. Data without
//!   any usable key stays key-less and is embedded under its parent.
//! - Field keys are `fieldName` or `fieldName(canonicalArgsJSON)`. The
//!   canonical serialization is argument-order independent because
//!   argument objects are `BTreeMap`-backed.

use crate::types::{EntityKey, FieldKey, Value};
use std::collections::BTreeMap;

/// A custom per-typename key function supplied at store construction.
///
/// Returns the entity's id portion, or `None` to mark it key-less.
pub type KeyFn = dyn Fn(&BTreeMap<String, Value>) -> Option<String>;

/// The registry of custom key functions, keyed by typename.
pub type KeyConfig = BTreeMap<String, Box<KeyFn>>;

// =============================================================================
// FIELD KEYS
// =============================================================================

/// Canonically serialize resolved field arguments.
///
/// `BTreeMap` ordering makes the output independent of the order arguments
/// appeared in the document, so equivalent argument objects collapse to
/// one field key.
#[must_use]
pub fn canonical_args(args: &BTreeMap<String, Value>) -> String {
    serde_json::to_string(args).unwrap_or_default()
}

/// Compute the field key for a field name and its resolved arguments.
#[must_use]
pub fn key_of_field(name: &str, args: Option<&BTreeMap<String, Value>>) -> FieldKey {
    match args {
        Some(args) if !args.is_empty() => {
            FieldKey(format!("{name}({})", canonical_args(args)))
        }
        _ => FieldKey(name.to_string()),
    }
}

/// Split a field key back into its field name and parsed arguments.
///
/// This is the inverse of [`key_of_field`], used by `inspect_fields` to
/// report every written field occurrence with structured arguments.
#[must_use]
pub fn parse_field_key(key: &FieldKey) -> (String, Option<BTreeMap<String, Value>>) {
    let raw = key.as_str();
    if let Some(open) = raw.find('(') {
        if let Some(args_json) = raw[open..].strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
            let args = serde_json::from_str::<BTreeMap<String, Value>>(args_json).ok();
            return (raw[..open].to_string(), args);
        }
    }
    (raw.to_string(), None)
}

// =============================================================================
// ENTITY KEYS
// =============================================================================

/// Extract the id portion of an entity from its data.
///
/// A custom key function for the typename wins; otherwise the `id` field,
/// then the `_id` field. String and integer ids are accepted.
#[must_use]
pub fn id_of_entity(
    typename: &str,
    data: &BTreeMap<String, Value>,
    keys: &KeyConfig,
) -> Option<String> {
    if let Some(key_fn) = keys.get(typename) {
        return key_fn(data);
    }
    for field in ["id", "_id"] {
        match data.get(field) {
            Some(Value::String(id)) => return Some(id.clone()),
            Some(Value::Int(id)) => return Some(id.to_string()),
            _ => {}
        }
    }
    None
}

/// Compute the entity key for a data object, or `None` when the entity is
/// key-less and must be embedded under its parent's field key.
#[must_use]
pub fn key_of_entity(
    typename: &str,
    data: &BTreeMap<String, Value>,
    keys: &KeyConfig,
) -> Option<EntityKey> {
    id_of_entity(typename, data, keys).map(|id| EntityKey(format!("{typename}:{id}")))
}

/// Join a parent key and field key into a generated embedded-entity key.
#[must_use]
pub fn join_keys(parent: &EntityKey, field: &FieldKey) -> EntityKey {
    EntityKey(format!("{parent}.{field}"))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn args(entries: &[(&str, Value)]) -> BTreeMap<String, Value> {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn field_key_without_args_is_plain_name() {
        assert_eq!(key_of_field("todos", None).as_str(), "todos");
        let empty = BTreeMap::new();
        assert_eq!(key_of_field("todos", Some(&empty)).as_str(), "todos");
    }

    #[test]
    fn field_key_is_argument_order_independent() {
        let a = args(&[("a", Value::from(1i64)), ("b", Value::from(2i64))]);
        let b = args(&[("b", Value::from(2i64)), ("a", Value::from(1i64))]);
        assert_eq!(key_of_field("f", Some(&a)), key_of_field("f", Some(&b)));
    }

    #[test]
    fn field_key_roundtrips_through_parse() {
        let a = args(&[("first", Value::from(10i64)), ("after", Value::from("x"))]);
        let key = key_of_field("todos", Some(&a));
        let (name, parsed) = parse_field_key(&key);
        assert_eq!(name, "todos");
        assert_eq!(parsed, Some(a));
    }

    #[test]
    fn entity_key_prefers_id_then_underscore_id() {
        let keys = KeyConfig::new();
        let with_id = args(&[("id", Value::from("1")), ("_id", Value::from("9"))]);
        assert_eq!(
            key_of_entity("Todo", &with_id, &keys),
            Some(EntityKey::new("Todo:1"))
        );

        let with_underscore = args(&[("_id", Value::from("9"))]);
        assert_eq!(
            key_of_entity("Todo", &with_underscore, &keys),
            Some(EntityKey::new("Todo:9"))
        );
    }

    #[test]
    fn integer_ids_are_stringified() {
        let keys = KeyConfig::new();
        let data = args(&[("id", Value::from(42i64))]);
        assert_eq!(
            key_of_entity("Todo", &data, &keys),
            Some(EntityKey::new("Todo:42"))
        );
    }

    #[test]
    fn keyless_data_yields_no_entity_key() {
        let keys = KeyConfig::new();
        let data = args(&[("name", Value::from("x"))]);
        assert_eq!(key_of_entity("Profile", &data, &keys), None);
    }

    #[test]
    fn custom_key_function_wins() {
        let mut keys = KeyConfig::new();
        keys.insert(
            "Todo".to_string(),
            Box::new(|data: &BTreeMap<String, Value>| {
                data.get("slug").and_then(Value::as_str).map(String::from)
            }),
        );
        let data = args(&[("id", Value::from("1")), ("slug", Value::from("go"))]);
        assert_eq!(
            key_of_entity("Todo", &data, &keys),
            Some(EntityKey::new("Todo:go"))
        );
    }

    #[test]
    fn custom_key_function_can_mark_keyless() {
        let mut keys = KeyConfig::new();
        keys.insert("Meta".to_string(), Box::new(|_| None));
        let data = args(&[("id", Value::from("1"))]);
        assert_eq!(key_of_entity("Meta", &data, &keys), None);
    }
}

//! # Query Traversal
//!
//! Maps a selection set onto the entity graph and reconstructs the
//! response object a server would have sent, reading through overlays and
//! dispatching registered read resolvers along the way.
//!
//! Field misses follow a tri-state policy: with a schema, a missing
//! nullable field coerces to `null` and flags the result as partial, while
//! a missing required field makes the whole enclosing selection a miss.
//! Without a schema any missing field is a miss; partial results require
//! nullability information to be sound.

use crate::ast::{Document, FieldNode, Fragment, SelectionSet, Variables};
use crate::data::{InMemoryData, OpContext};
use crate::iterate::{
    SelectionFields, SelectionIter, data_matches_heuristically, entity_matches_heuristically,
};
use crate::keys::{KeyConfig, key_of_entity, key_of_field};
use crate::schema::SchemaPredicates;
use crate::store::{CacheApi, FieldInfo, ResolverConfig};
use crate::types::{Dependencies, EntityKey, FieldKey, Link, Value, Warnings};
use std::collections::BTreeMap;

/// The outcome of a query read.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryResult {
    /// The reconstructed response object, or `None` on a cache miss.
    pub data: Option<Value>,
    /// Whether nullable fields were coerced to `null` for missing data.
    pub partial: bool,
    /// Entities and root fields the read depended on.
    pub dependencies: Dependencies,
}

/// One query traversal with all the borrowed store parts it needs.
pub(crate) struct QueryOp<'a> {
    pub data: &'a mut InMemoryData,
    pub keys: &'a KeyConfig,
    pub resolvers: &'a ResolverConfig,
    pub schema: Option<&'a SchemaPredicates>,
    pub warnings: &'a mut Warnings,
    pub fragments: &'a BTreeMap<String, Fragment>,
    pub variables: &'a Variables,
    pub ctx: &'a mut OpContext,
    pub partial: bool,
}

impl<'a> QueryOp<'a> {
    fn collect_fields(
        &mut self,
        typename: &str,
        entity_key: Option<&EntityKey>,
        selection_set: &'a SelectionSet,
        overlay: Option<&BTreeMap<String, Value>>,
    ) -> SelectionFields<'a> {
        let schema = self.schema;
        let data = &*self.data;
        let warnings = &mut *self.warnings;
        let variables = self.variables;
        SelectionIter::new(
            typename,
            selection_set,
            self.fragments,
            self.variables,
            move |condition, inner| match (schema, entity_key, overlay) {
                (Some(schema), _, _) => schema.is_compatible(warnings, condition, typename),
                (None, Some(key), _) => entity_matches_heuristically(data, key, inner, variables),
                (None, None, Some(overlay)) => data_matches_heuristically(overlay, inner),
                (None, None, None) => true,
            },
        )
        .collect_fields()
    }

    /// Read one selection against an entity, an in-memory overlay of
    /// resolver-provided data, or both. Returns `None` when the selection
    /// as a whole is a miss.
    pub fn read_selection(
        &mut self,
        entity_key: Option<&EntityKey>,
        typename: &str,
        selection_set: &'a SelectionSet,
        overlay: Option<&BTreeMap<String, Value>>,
    ) -> Option<BTreeMap<String, Value>> {
        let fields = self.collect_fields(typename, entity_key, selection_set, overlay);

        let mut output = BTreeMap::new();
        for response_key in fields.typename_keys {
            output.insert(response_key.to_string(), Value::String(typename.to_string()));
        }

        for node in fields.fields {
            let value = self.read_field(entity_key, typename, node, overlay);
            match value {
                Some(value) => {
                    output.insert(node.response_key().to_string(), value);
                }
                None => match self.miss(typename, node) {
                    Some(null) => {
                        output.insert(node.response_key().to_string(), null);
                    }
                    None => return None,
                },
            }
        }
        Some(output)
    }

    /// Read one field, trying resolver-provided data, a registered read
    /// resolver, and finally the stored record or link.
    fn read_field(
        &mut self,
        entity_key: Option<&EntityKey>,
        typename: &str,
        node: &'a FieldNode,
        overlay: Option<&BTreeMap<String, Value>>,
    ) -> Option<Value> {
        let element_nullable = match self.schema {
            Some(schema) => schema.is_element_nullable(self.warnings, typename, &node.name),
            None => false,
        };

        if let Some(value) = overlay.and_then(|overlay| overlay.get(node.response_key())) {
            return match &node.selection_set {
                None => Some(value.clone()),
                Some(child_set) => {
                    let value = value.clone();
                    self.resolve_data_value(&value, child_set, element_nullable)
                }
            };
        }

        let key = entity_key?;
        let arguments = node.resolve_arguments(self.variables);
        let field_key = key_of_field(&node.name, arguments.as_ref());

        if let Some(resolver) = self
            .resolvers
            .get(typename)
            .and_then(|fields| fields.get(&node.name))
        {
            let info = FieldInfo {
                parent_typename: typename,
                parent_key: key,
                field_name: &node.name,
                arguments: arguments.as_ref(),
                variables: self.variables,
            };
            let resolved = {
                let mut api = CacheApi {
                    data: &mut *self.data,
                    keys: self.keys,
                    resolvers: self.resolvers,
                    schema: self.schema,
                    warnings: &mut *self.warnings,
                    ctx: &mut *self.ctx,
                };
                resolver(&info, &mut api)
            };
            // Reads through a resolver still depend on the field it
            // shadows, so updates to the underlying data re-trigger them.
            self.data.read_record(self.ctx, key, &field_key);
            return match (resolved, &node.selection_set) {
                (Some(value), Some(child_set)) => {
                    self.resolve_data_value(&value, child_set, element_nullable)
                }
                (Some(value), None) => Some(value),
                (None, _) => None,
            };
        }

        match &node.selection_set {
            None => self.data.read_record(self.ctx, key, &field_key).cloned(),
            Some(child_set) => {
                let link = self.data.read_link(self.ctx, key, &field_key).cloned()?;
                self.read_link_value(&link, child_set, element_nullable)
            }
        }
    }

    /// Follow a stored link and read the linked entities.
    fn read_link_value(
        &mut self,
        link: &Link,
        selection_set: &'a SelectionSet,
        element_nullable: bool,
    ) -> Option<Value> {
        match link {
            Link::Null => Some(Value::Null),
            Link::Entity(key) => {
                let key = key.clone();
                self.read_entity(&key, selection_set).map(Value::Object)
            }
            Link::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match self.read_link_value(item, selection_set, element_nullable) {
                        Some(value) => out.push(value),
                        None if element_nullable => {
                            self.partial = true;
                            out.push(Value::Null);
                        }
                        None => return None,
                    }
                }
                Some(Value::List(out))
            }
        }
    }

    /// Interpret a resolver-provided value under a selection set: entity
    /// keys and keyable objects continue against the store, key-less
    /// objects are read from the provided data alone.
    fn resolve_data_value(
        &mut self,
        value: &Value,
        selection_set: &'a SelectionSet,
        element_nullable: bool,
    ) -> Option<Value> {
        match value {
            Value::Null => Some(Value::Null),
            Value::String(raw) => {
                let key = EntityKey::new(raw.clone());
                if self.data.has_entity(&key) {
                    self.read_entity(&key, selection_set).map(Value::Object)
                } else {
                    self.warnings.warn_once(format!(
                        "resolver returned {raw}, which is not a cached entity key"
                    ));
                    None
                }
            }
            Value::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match self.resolve_data_value(item, selection_set, element_nullable) {
                        Some(value) => out.push(value),
                        None if element_nullable => {
                            self.partial = true;
                            out.push(Value::Null);
                        }
                        None => return None,
                    }
                }
                Some(Value::List(out))
            }
            Value::Object(object) => {
                let Some(typename) = object.get("__typename").and_then(Value::as_str) else {
                    self.warnings
                        .warn_once("resolver returned an object with no __typename field");
                    return None;
                };
                let typename = typename.to_string();
                let key = key_of_entity(&typename, object, self.keys);
                self.read_selection(key.as_ref(), &typename, selection_set, Some(object))
                    .map(Value::Object)
            }
            _ => {
                self.warnings
                    .warn_once("resolver returned a scalar for a field with a selection set");
                None
            }
        }
    }

    /// Read an entity's selection, deriving its concrete typename from the
    /// stored `__typename` record.
    fn read_entity(
        &mut self,
        key: &EntityKey,
        selection_set: &'a SelectionSet,
    ) -> Option<BTreeMap<String, Value>> {
        let typename = self
            .data
            .read_record(self.ctx, key, &FieldKey::new("__typename"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let Some(typename) = typename else {
            self.warnings
                .warn_once(format!("entity {key} has no __typename record"));
            return None;
        };
        self.read_selection(Some(key), &typename, selection_set, None)
    }

    /// Read fragment-shaped data for one entity. The concrete typename
    /// comes from the store when the entity is cached, falling back to the
    /// fragment's type condition.
    pub fn read_fragment(
        &mut self,
        document: &'a Document,
        key: &EntityKey,
    ) -> Option<BTreeMap<String, Value>> {
        let fragment = document.first_fragment()?;
        let typename = self
            .data
            .peek_record(key, &FieldKey::new("__typename"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| fragment.type_condition.clone());
        self.read_selection(Some(key), &typename, &fragment.selection_set, None)
    }

    /// Decide what a missing field means: `Some(Null)` to coerce and mark
    /// the result partial, or `None` to make the enclosing selection a
    /// miss.
    fn miss(&mut self, typename: &str, node: &FieldNode) -> Option<Value> {
        if let Some(schema) = self.schema {
            if schema.is_field_nullable(self.warnings, typename, &node.name) {
                self.partial = true;
                return Some(Value::Null);
            }
        }
        None
    }
}

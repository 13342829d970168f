//! # Write Traversal
//!
//! Maps response data shaped like a selection set onto the normalized
//! entity graph. Leaf fields become records; fields with a sub-selection
//! become links to child entities, recursively written first. Key-less
//! objects are hoisted under a generated `parentKey.fieldKey` key so the
//! graph never stores raw nested objects.
//!
//! Mutation and subscription root fields are not persisted on their root;
//! their payloads are traversed so nested entities normalize, and any
//! registered updater runs afterwards against already-consistent state.
//!
//! `write_optimistic` performs the same traversal but sources root-field
//! values from registered optimistic resolvers and writes under a named
//! overlay, leaving base reference counts untouched.

use crate::ast::{Document, FieldNode, Fragment, SelectionSet, Variables};
use crate::data::{InMemoryData, OpContext};
use crate::iterate::{SelectionFields, SelectionIter, data_matches_heuristically};
use crate::keys::{KeyConfig, join_keys, key_of_entity, key_of_field};
use crate::schema::SchemaPredicates;
use crate::store::{CacheApi, FieldInfo, OptimisticConfig, ResolverConfig, UpdaterConfig};
use crate::types::{CacheError, Dependencies, EntityKey, FieldKey, Link, Value, Warnings};
use std::collections::BTreeMap;

/// The outcome of a write: the entities and root fields it touched.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WriteResult {
    /// Dependencies for downstream invalidation.
    pub dependencies: Dependencies,
}

/// One write traversal with all the borrowed store parts it needs.
pub(crate) struct WriteOp<'a> {
    pub data: &'a mut InMemoryData,
    pub keys: &'a KeyConfig,
    pub resolvers: &'a ResolverConfig,
    pub updates: &'a UpdaterConfig,
    pub optimistic: &'a OptimisticConfig,
    pub schema: Option<&'a SchemaPredicates>,
    pub warnings: &'a mut Warnings,
    pub fragments: &'a BTreeMap<String, Fragment>,
    pub variables: &'a Variables,
    pub ctx: &'a mut OpContext,
}

impl<'a> WriteOp<'a> {
    fn collect_fields(
        &mut self,
        typename: &str,
        selection_set: &'a SelectionSet,
        data: Option<&BTreeMap<String, Value>>,
    ) -> SelectionFields<'a> {
        let schema = self.schema;
        let warnings = &mut *self.warnings;
        SelectionIter::new(
            typename,
            selection_set,
            self.fragments,
            self.variables,
            move |condition, inner| match (schema, data) {
                (Some(schema), _) => schema.is_compatible(warnings, condition, typename),
                (None, Some(data)) => data_matches_heuristically(data, inner),
                // Without a schema or data nothing is provably missing.
                (None, None) => true,
            },
        )
        .collect_fields()
    }

    /// Write a response object into one entity's records and links.
    pub fn write_selection(
        &mut self,
        entity_key: &EntityKey,
        typename: &str,
        selection_set: &'a SelectionSet,
        data: &BTreeMap<String, Value>,
        is_query_root: bool,
    ) {
        if !is_query_root {
            self.data.write_record(
                self.ctx,
                entity_key.clone(),
                FieldKey::new("__typename"),
                Some(Value::String(typename.to_string())),
            );
        }

        let fields = self.collect_fields(typename, selection_set, Some(data));
        for node in fields.fields {
            if let Some(schema) = self.schema {
                if !schema.has_field(self.warnings, typename, &node.name) {
                    continue;
                }
            }
            let arguments = node.resolve_arguments(self.variables);
            let field_key = key_of_field(&node.name, arguments.as_ref());

            let Some(value) = data.get(node.response_key()) else {
                // An absent value would erase a previously cached one if
                // coerced to null, so the field is skipped instead.
                self.warnings.warn_once(format!(
                    "invalid undefined: field {} on {typename} is undefined, skipping write",
                    node.name
                ));
                continue;
            };

            match &node.selection_set {
                None => {
                    self.data.write_record(
                        self.ctx,
                        entity_key.clone(),
                        field_key,
                        Some(value.clone()),
                    );
                }
                Some(child_set) => {
                    let fallback = join_keys(entity_key, &field_key);
                    let link = self.write_field_value(value, child_set, fallback);
                    self.data
                        .write_link(self.ctx, entity_key.clone(), field_key.clone(), Some(link));
                    // Once a field is known to be a link it is never
                    // simultaneously also a record.
                    self.data
                        .write_record(self.ctx, entity_key.clone(), field_key, None);
                }
            }
        }
    }

    /// Normalize one linked value, recursing through lists with
    /// index-suffixed fallback keys, and return the link to store.
    fn write_field_value(
        &mut self,
        value: &Value,
        selection_set: &'a SelectionSet,
        fallback: EntityKey,
    ) -> Link {
        match value {
            Value::Null => Link::Null,
            Value::List(items) => Link::List(
                items
                    .iter()
                    .enumerate()
                    .map(|(index, item)| {
                        let item_fallback = EntityKey::new(format!("{fallback}.{index}"));
                        self.write_field_value(item, selection_set, item_fallback)
                    })
                    .collect(),
            ),
            Value::Object(object) => {
                let typename = match object.get("__typename").and_then(Value::as_str) {
                    Some(typename) => typename.to_string(),
                    None => {
                        self.warnings.warn_once(format!(
                            "entity at {fallback} has no __typename field"
                        ));
                        String::new()
                    }
                };
                let entity_key = match key_of_entity(&typename, object, self.keys) {
                    Some(key) => key,
                    None => {
                        self.warnings.warn_once(format!(
                            "no key could be generated for entity of type {typename}, \
                             embedding it under its parent field"
                        ));
                        fallback
                    }
                };
                self.write_selection(&entity_key, &typename, selection_set, object, false);
                Link::Entity(entity_key)
            }
            _ => {
                self.warnings.warn_once(format!(
                    "expected an entity or list of entities at {fallback}, got a scalar"
                ));
                Link::Null
            }
        }
    }

    /// Write a mutation or subscription response. Root fields are not
    /// persisted on the root entity; nested entities normalize as usual
    /// and registered updaters run after each field's write.
    pub fn write_operation_root(
        &mut self,
        root_typename: &str,
        selection_set: &'a SelectionSet,
        data: &BTreeMap<String, Value>,
    ) {
        let root_key = EntityKey::new(root_typename);
        let fields = self.collect_fields(root_typename, selection_set, Some(data));
        for node in fields.fields {
            let arguments = node.resolve_arguments(self.variables);
            let value = data.get(node.response_key());

            if let (Some(value), Some(child_set)) = (value, &node.selection_set) {
                self.write_root_field(value, child_set);
            }
            self.run_updater(
                root_typename,
                &root_key,
                node,
                arguments.as_ref(),
                value.unwrap_or(&Value::Null),
            );
        }
    }

    /// Normalize the payload below a mutation/subscription root field.
    /// Keyed objects are written as entities; key-less payload wrappers
    /// are traversed so deeper keyed entities still normalize.
    fn write_root_field(&mut self, value: &Value, selection_set: &'a SelectionSet) {
        match value {
            Value::List(items) => {
                for item in items {
                    self.write_root_field(item, selection_set);
                }
            }
            Value::Object(object) => {
                let typename = object
                    .get("__typename")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if let Some(entity_key) = key_of_entity(&typename, object, self.keys) {
                    self.write_selection(&entity_key, &typename, selection_set, object, false);
                    return;
                }
                let fields = self.collect_fields(&typename, selection_set, Some(object));
                for node in fields.fields {
                    if let (Some(value), Some(child_set)) =
                        (object.get(node.response_key()), &node.selection_set)
                    {
                        self.write_root_field(value, child_set);
                    }
                }
            }
            _ => {}
        }
    }

    /// Apply an optimistic mutation: root-field values come from the
    /// registered optimistic resolvers instead of a network response, and
    /// all writes go to the layer selected by the active context.
    pub fn write_optimistic_root(
        &mut self,
        root_typename: &str,
        selection_set: &'a SelectionSet,
    ) {
        let root_key = EntityKey::new(root_typename);
        let fields = self.collect_fields(root_typename, selection_set, None);
        for node in fields.fields {
            let Some(resolver) = self.optimistic.get(&node.name) else {
                continue;
            };
            let arguments = node.resolve_arguments(self.variables);
            let info = FieldInfo {
                parent_typename: root_typename,
                parent_key: &root_key,
                field_name: &node.name,
                arguments: arguments.as_ref(),
                variables: self.variables,
            };
            let value = {
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
            if let Some(child_set) = &node.selection_set {
                self.write_root_field(&value, child_set);
            }
            self.run_updater(root_typename, &root_key, node, arguments.as_ref(), &value);
        }
    }

    fn run_updater(
        &mut self,
        root_typename: &str,
        root_key: &EntityKey,
        node: &FieldNode,
        arguments: Option<&BTreeMap<String, Value>>,
        value: &Value,
    ) {
        let Some(updater) = self
            .updates
            .get(root_typename)
            .and_then(|fields| fields.get(&node.name))
        else {
            return;
        };
        let info = FieldInfo {
            parent_typename: root_typename,
            parent_key: root_key,
            field_name: &node.name,
            arguments,
            variables: self.variables,
        };
        let mut api = CacheApi {
            data: &mut *self.data,
            keys: self.keys,
            resolvers: self.resolvers,
            schema: self.schema,
            warnings: &mut *self.warnings,
            ctx: &mut *self.ctx,
        };
        updater(value, &info, &mut api);
    }

    /// Patch one entity from fragment-shaped data.
    pub fn write_fragment(
        &mut self,
        document: &'a Document,
        object: &BTreeMap<String, Value>,
    ) -> Result<EntityKey, CacheError> {
        let fragment = document.first_fragment().ok_or(CacheError::MissingFragment)?;
        let typename = object
            .get("__typename")
            .and_then(Value::as_str)
            .unwrap_or(&fragment.type_condition)
            .to_string();
        let Some(key) = key_of_entity(&typename, object, self.keys) else {
            return Err(CacheError::UnkeyableFragment { typename });
        };
        self.write_selection(&key, &typename, &fragment.selection_set, object, false);
        Ok(key)
    }
}

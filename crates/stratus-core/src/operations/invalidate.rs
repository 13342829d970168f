//! # Invalidate Traversal
//!
//! Maps a selection set onto the entity graph and deletes every record and
//! link it touches, recursing through links before severing them so nested
//! entities are cleared too. Deleted base links decrement reference
//! counts, so a subsequent sweep collects entities orphaned by the
//! invalidation.

use crate::ast::{Fragment, SelectionSet, Variables};
use crate::data::{InMemoryData, OpContext};
use crate::iterate::{SelectionFields, SelectionIter, entity_matches_heuristically};
use crate::keys::key_of_field;
use crate::schema::SchemaPredicates;
use crate::types::{EntityKey, FieldKey, Link, Value, Warnings};
use std::collections::BTreeMap;

/// One invalidate traversal with all the borrowed store parts it needs.
pub(crate) struct InvalidateOp<'a> {
    pub data: &'a mut InMemoryData,
    pub schema: Option<&'a SchemaPredicates>,
    pub warnings: &'a mut Warnings,
    pub fragments: &'a BTreeMap<String, Fragment>,
    pub variables: &'a Variables,
    pub ctx: &'a mut OpContext,
}

impl<'a> InvalidateOp<'a> {
    fn collect_fields(
        &mut self,
        typename: &str,
        entity_key: &EntityKey,
        selection_set: &'a SelectionSet,
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
            move |condition, inner| match schema {
                Some(schema) => schema.is_compatible(warnings, condition, typename),
                None => entity_matches_heuristically(data, entity_key, inner, variables),
            },
        )
        .collect_fields()
    }

    /// Delete the records and links one selection names on one entity,
    /// recursing through links before removing them.
    pub fn invalidate_selection(
        &mut self,
        entity_key: &EntityKey,
        typename: &str,
        selection_set: &'a SelectionSet,
    ) {
        let fields = self.collect_fields(typename, entity_key, selection_set);
        for node in fields.fields {
            if let Some(schema) = self.schema {
                if !schema.has_field(self.warnings, typename, &node.name) {
                    continue;
                }
            }
            let arguments = node.resolve_arguments(self.variables);
            let field_key = key_of_field(&node.name, arguments.as_ref());

            match &node.selection_set {
                None => {
                    self.data
                        .write_record(self.ctx, entity_key.clone(), field_key, None);
                }
                Some(child_set) => {
                    let Some(link) = self.data.peek_link(entity_key, &field_key).cloned() else {
                        // A selection field without a stored link may still
                        // hold seeded record data.
                        self.data
                            .write_record(self.ctx, entity_key.clone(), field_key, None);
                        continue;
                    };
                    self.invalidate_link(&link, child_set);
                    self.data
                        .write_link(self.ctx, entity_key.clone(), field_key, None);
                }
            }
        }
    }

    fn invalidate_link(&mut self, link: &Link, selection_set: &'a SelectionSet) {
        match link {
            Link::Null => {}
            Link::Entity(key) => {
                let typename = self
                    .data
                    .peek_record(key, &FieldKey::new("__typename"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let Some(typename) = typename else {
                    self.warnings
                        .warn_once(format!("entity {key} has no __typename record"));
                    return;
                };
                let key = key.clone();
                self.invalidate_selection(&key, &typename, selection_set);
            }
            Link::List(items) => {
                for item in items {
                    self.invalidate_link(item, selection_set);
                }
            }
        }
    }
}

//! # Selection Iterator
//!
//! A lazy, finite, non-restartable traversal over one selection set. The
//! iterator keeps an explicit stack of `(selections, index)` frames so a
//! fragment's inner selection set can be pushed transparently when its
//! type condition matches the current typename.
//!
//! `@skip`/`@include` directives suppress selections entirely, and
//! `__typename` selections are consumed without being yielded; callers
//! synthesize the typename separately from the recorded response keys.
//!
//! Fragment matching is pluggable: exact typename equality is handled
//! here, everything else (schema membership checks or the no-schema
//! heuristic) is delegated to the supplied matcher.

use crate::ast::{Fragment, FieldNode, Selection, SelectionSet, Variables, should_include};
use crate::data::InMemoryData;
use crate::keys::key_of_field;
use crate::types::{EntityKey, Value};
use std::collections::BTreeMap;

// =============================================================================
// ITERATOR
// =============================================================================

struct Frame<'a> {
    selections: &'a [Selection],
    index: usize,
}

/// Iterator over the field nodes of a selection set, inlining matching
/// fragments as it goes.
///
/// `'a` is the document's lifetime; the typename may be shorter-lived.
pub struct SelectionIter<'a, 't, M> {
    typename: &'t str,
    variables: &'a Variables,
    fragments: &'a BTreeMap<String, Fragment>,
    matches: M,
    stack: Vec<Frame<'a>>,
    typename_keys: Vec<&'a str>,
}

/// The result of draining a [`SelectionIter`]: the yielded field nodes
/// plus the response keys under which `__typename` was selected.
pub struct SelectionFields<'a> {
    /// Field nodes in traversal order.
    pub fields: Vec<&'a FieldNode>,
    /// Response keys of consumed `__typename` selections.
    pub typename_keys: Vec<&'a str>,
}

impl<'a, 't, M> SelectionIter<'a, 't, M>
where
    M: FnMut(&'a str, &'a SelectionSet) -> bool,
{
    /// Start a traversal over `selection_set` for an entity of `typename`.
    pub fn new(
        typename: &'t str,
        selection_set: &'a SelectionSet,
        fragments: &'a BTreeMap<String, Fragment>,
        variables: &'a Variables,
        matches: M,
    ) -> Self {
        Self {
            typename,
            variables,
            fragments,
            matches,
            stack: vec![Frame {
                selections: &selection_set.selections,
                index: 0,
            }],
            typename_keys: Vec::new(),
        }
    }

    /// Drain the iterator eagerly.
    ///
    /// Traversal operations collect fields up front so that the fragment
    /// matcher's borrows end before the store is mutated.
    pub fn collect_fields(mut self) -> SelectionFields<'a> {
        let mut fields = Vec::new();
        for node in self.by_ref() {
            fields.push(node);
        }
        SelectionFields {
            fields,
            typename_keys: self.typename_keys,
        }
    }

    fn condition_matches(&mut self, condition: Option<&'a str>, set: &'a SelectionSet) -> bool {
        match condition {
            None => true,
            Some(condition) if condition == self.typename => true,
            Some(condition) => (self.matches)(condition, set),
        }
    }
}

impl<'a, 't, M> Iterator for SelectionIter<'a, 't, M>
where
    M: FnMut(&'a str, &'a SelectionSet) -> bool,
{
    type Item = &'a FieldNode;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let frame = self.stack.last_mut()?;
            let Some(selection) = frame.selections.get(frame.index) else {
                self.stack.pop();
                continue;
            };
            frame.index += 1;

            match selection {
                Selection::Field(node) => {
                    if !should_include(&node.directives, self.variables) {
                        continue;
                    }
                    if node.name == "__typename" {
                        self.typename_keys.push(node.response_key());
                        continue;
                    }
                    return Some(node);
                }
                Selection::Inline(node) => {
                    if !should_include(&node.directives, self.variables) {
                        continue;
                    }
                    if self
                        .condition_matches(node.type_condition.as_deref(), &node.selection_set)
                    {
                        self.stack.push(Frame {
                            selections: &node.selection_set.selections,
                            index: 0,
                        });
                    }
                }
                Selection::Spread(node) => {
                    if !should_include(&node.directives, self.variables) {
                        continue;
                    }
                    // Unknown fragments were rejected by upstream
                    // validation; an absent definition is skipped.
                    let Some(fragment) = self.fragments.get(&node.name) else {
                        continue;
                    };
                    if self.condition_matches(
                        Some(&fragment.type_condition),
                        &fragment.selection_set,
                    ) {
                        self.stack.push(Frame {
                            selections: &fragment.selection_set.selections,
                            index: 0,
                        });
                    }
                }
            }
        }
    }
}

// =============================================================================
// HEURISTIC FRAGMENT MATCHING
// =============================================================================

/// No-schema fragment heuristic against response data: the fragment is
/// assumed to match unless the data object is provably missing one of the
/// fragment's own scalar fields.
pub(crate) fn data_matches_heuristically(
    data: &BTreeMap<String, Value>,
    selection_set: &SelectionSet,
) -> bool {
    selection_set.selections.iter().all(|selection| match selection {
        Selection::Field(node) if node.selection_set.is_none() => {
            data.contains_key(node.response_key())
        }
        _ => true,
    })
}

/// No-schema fragment heuristic against the store: the fragment is assumed
/// to match unless the entity is provably missing one of the fragment's
/// own scalar fields.
pub(crate) fn entity_matches_heuristically(
    data: &InMemoryData,
    key: &EntityKey,
    selection_set: &SelectionSet,
    variables: &Variables,
) -> bool {
    selection_set.selections.iter().all(|selection| match selection {
        Selection::Field(node) if node.selection_set.is_none() => {
            let field_key = key_of_field(&node.name, node.resolve_arguments(variables).as_ref());
            data.has_field(key, &field_key)
        }
        _ => true,
    })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Directive, Document, Fragment, field, inline, spread};

    fn names<'a>(fields: &[&'a FieldNode]) -> Vec<&'a str> {
        fields.iter().map(|node| node.name.as_str()).collect()
    }

    #[test]
    fn yields_fields_in_document_order() {
        let set = SelectionSet::new([field("id").into(), field("text").into()]);
        let fragments = BTreeMap::new();
        let variables = Variables::new();
        let fields =
            SelectionIter::new("Todo", &set, &fragments, &variables, |_, _| false)
                .collect_fields();
        assert_eq!(names(&fields.fields), vec!["id", "text"]);
    }

    #[test]
    fn typename_is_consumed_not_yielded() {
        let set = SelectionSet::new([
            field("__typename").into(),
            field("__typename").aliased("kind").into(),
            field("id").into(),
        ]);
        let fragments = BTreeMap::new();
        let variables = Variables::new();
        let fields =
            SelectionIter::new("Todo", &set, &fragments, &variables, |_, _| false)
                .collect_fields();
        assert_eq!(names(&fields.fields), vec!["id"]);
        assert_eq!(fields.typename_keys, vec!["__typename", "kind"]);
    }

    #[test]
    fn matching_inline_fragment_is_inlined() {
        let set = SelectionSet::new([
            field("id").into(),
            inline("Todo", [field("text").into()]),
            inline("Author", [field("name").into()]),
        ]);
        let fragments = BTreeMap::new();
        let variables = Variables::new();
        let fields =
            SelectionIter::new("Todo", &set, &fragments, &variables, |_, _| false)
                .collect_fields();
        assert_eq!(names(&fields.fields), vec!["id", "text"]);
    }

    #[test]
    fn spread_resolves_through_fragment_definitions() {
        let document = Document::query([field("id").into(), spread("todoFields")])
            .with_fragment(Fragment::new("todoFields", "Todo", [field("text").into()]));
        let variables = Variables::new();
        let fields = SelectionIter::new(
            "Todo",
            &document.selection_set,
            &document.fragments,
            &variables,
            |_, _| false,
        )
        .collect_fields();
        assert_eq!(names(&fields.fields), vec!["id", "text"]);
    }

    #[test]
    fn mismatched_condition_asks_the_matcher() {
        let set = SelectionSet::new([inline("Node", [field("id").into()])]);
        let fragments = BTreeMap::new();
        let variables = Variables::new();

        let fields = SelectionIter::new("Todo", &set, &fragments, &variables, |cond, _| {
            assert_eq!(cond, "Node");
            true
        })
        .collect_fields();
        assert_eq!(names(&fields.fields), vec!["id"]);

        let fields =
            SelectionIter::new("Todo", &set, &fragments, &variables, |_, _| false)
                .collect_fields();
        assert!(fields.fields.is_empty());
    }

    #[test]
    fn skip_and_include_suppress_selections() {
        let set = SelectionSet::new([
            field("id").directive(Directive::skip(true)).into(),
            field("text").directive(Directive::include(true)).into(),
        ]);
        let fragments = BTreeMap::new();
        let variables = Variables::new();
        let fields =
            SelectionIter::new("Todo", &set, &fragments, &variables, |_, _| false)
                .collect_fields();
        assert_eq!(names(&fields.fields), vec!["text"]);
    }

    #[test]
    fn unknown_spread_is_skipped() {
        let set = SelectionSet::new([spread("missing"), field("id").into()]);
        let fragments = BTreeMap::new();
        let variables = Variables::new();
        let fields =
            SelectionIter::new("Todo", &set, &fragments, &variables, |_, _| false)
                .collect_fields();
        assert_eq!(names(&fields.fields), vec!["id"]);
    }

    #[test]
    fn data_heuristic_requires_scalar_fields() {
        let selection = SelectionSet::new([field("id").into(), field("text").into()]);
        let mut data = BTreeMap::new();
        data.insert("id".to_string(), Value::from("1"));
        assert!(!data_matches_heuristically(&data, &selection));
        data.insert("text".to_string(), Value::from("Go"));
        assert!(data_matches_heuristically(&data, &selection));
    }
}

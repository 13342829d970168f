//! # Query Document AST
//!
//! The parsed, already-validated selection-set tree that the surrounding
//! exchange hands to the cache. Parsing the query language's concrete
//! syntax happens upstream; this module only models the structured tree:
//! operations, selection sets, fields with aliases/arguments/directives,
//! fragment spreads, inline fragments, and variable references.
//!
//! Builder helpers are provided so callers (and tests) can assemble
//! documents without a parser.

use crate::types::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// =============================================================================
// OPERATIONS & DOCUMENTS
// =============================================================================

/// The kind of a top-level operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OperationKind {
    /// A read operation against the query root.
    Query,
    /// A write operation against the mutation root.
    Mutation,
    /// A streamed operation against the subscription root.
    Subscription,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Query => "query",
            Self::Mutation => "mutation",
            Self::Subscription => "subscription",
        })
    }
}

/// One parsed document: a single operation plus its fragment definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// The operation kind.
    pub kind: OperationKind,
    /// The operation's root selection set.
    pub selection_set: SelectionSet,
    /// Fragment definitions referenced by spreads, keyed by name.
    pub fragments: BTreeMap<String, Fragment>,
}

impl Document {
    /// Build a query document from root selections.
    #[must_use]
    pub fn query(selections: impl IntoIterator<Item = Selection>) -> Self {
        Self::new(OperationKind::Query, selections)
    }

    /// Build a mutation document from root selections.
    #[must_use]
    pub fn mutation(selections: impl IntoIterator<Item = Selection>) -> Self {
        Self::new(OperationKind::Mutation, selections)
    }

    /// Build a subscription document from root selections.
    #[must_use]
    pub fn subscription(selections: impl IntoIterator<Item = Selection>) -> Self {
        Self::new(OperationKind::Subscription, selections)
    }

    /// Build a document of the given kind.
    #[must_use]
    pub fn new(kind: OperationKind, selections: impl IntoIterator<Item = Selection>) -> Self {
        Self {
            kind,
            selection_set: SelectionSet::new(selections),
            fragments: BTreeMap::new(),
        }
    }

    /// Attach a fragment definition to this document.
    #[must_use]
    pub fn with_fragment(mut self, fragment: Fragment) -> Self {
        self.fragments.insert(fragment.name.clone(), fragment);
        self
    }

    /// Build a document that consists only of fragment definitions,
    /// for use with the fragment read/write helpers.
    #[must_use]
    pub fn fragment_document(fragment: Fragment) -> Self {
        Self::query([]).with_fragment(fragment)
    }

    /// The first fragment definition of this document, in name order.
    #[must_use]
    pub fn first_fragment(&self) -> Option<&Fragment> {
        self.fragments.values().next()
    }
}

/// A named fragment definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    /// The fragment's name.
    pub name: String,
    /// The type condition the fragment applies to.
    pub type_condition: String,
    /// The fragment's selections.
    pub selection_set: SelectionSet,
}

impl Fragment {
    /// Build a fragment definition.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        type_condition: impl Into<String>,
        selections: impl IntoIterator<Item = Selection>,
    ) -> Self {
        Self {
            name: name.into(),
            type_condition: type_condition.into(),
            selection_set: SelectionSet::new(selections),
        }
    }
}

// =============================================================================
// SELECTION SETS
// =============================================================================

/// An ordered list of selections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SelectionSet {
    /// The selections, in document order.
    pub selections: Vec<Selection>,
}

impl SelectionSet {
    /// Build a selection set.
    #[must_use]
    pub fn new(selections: impl IntoIterator<Item = Selection>) -> Self {
        Self {
            selections: selections.into_iter().collect(),
        }
    }
}

/// One selection: a field, a fragment spread, or an inline fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Selection {
    /// A field selection.
    Field(FieldNode),
    /// A named fragment spread (`...FragmentName`).
    Spread(SpreadNode),
    /// An inline fragment (`... on Type { ... }`).
    Inline(InlineNode),
}

impl From<FieldNode> for Selection {
    fn from(node: FieldNode) -> Self {
        Self::Field(node)
    }
}

/// A field selection with alias, arguments, directives, and an optional
/// nested selection set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldNode {
    /// The field's schema name.
    pub name: String,
    /// The response alias, if any.
    pub alias: Option<String>,
    /// The field's arguments, in document order.
    pub arguments: Vec<Argument>,
    /// Directives attached to this field.
    pub directives: Vec<Directive>,
    /// The nested selection set, absent for leaf fields.
    pub selection_set: Option<SelectionSet>,
}

impl FieldNode {
    /// The key under which this field appears in response data.
    #[must_use]
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Resolve this field's arguments against the given variables.
    ///
    /// Returns `None` when the field has no effective arguments. Arguments
    /// referencing a missing variable are dropped.
    #[must_use]
    pub fn resolve_arguments(&self, variables: &Variables) -> Option<BTreeMap<String, Value>> {
        if self.arguments.is_empty() {
            return None;
        }
        let mut out = BTreeMap::new();
        for argument in &self.arguments {
            if let Some(value) = argument.value.resolve(variables) {
                out.insert(argument.name.clone(), value);
            }
        }
        if out.is_empty() { None } else { Some(out) }
    }

    /// Attach an alias.
    #[must_use]
    pub fn aliased(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Attach an argument.
    #[must_use]
    pub fn arg(mut self, name: impl Into<String>, value: impl Into<InputValue>) -> Self {
        self.arguments.push(Argument {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// Attach an argument referencing a variable.
    #[must_use]
    pub fn var_arg(mut self, name: impl Into<String>, variable: impl Into<String>) -> Self {
        self.arguments.push(Argument {
            name: name.into(),
            value: InputValue::Variable(variable.into()),
        });
        self
    }

    /// Attach a directive.
    #[must_use]
    pub fn directive(mut self, directive: Directive) -> Self {
        self.directives.push(directive);
        self
    }

    /// Attach a nested selection set.
    #[must_use]
    pub fn select(mut self, selections: impl IntoIterator<Item = Selection>) -> Self {
        self.selection_set = Some(SelectionSet::new(selections));
        self
    }
}

/// Build a leaf field selection; nest with [`FieldNode::select`].
#[must_use]
pub fn field(name: impl Into<String>) -> FieldNode {
    FieldNode {
        name: name.into(),
        alias: None,
        arguments: Vec::new(),
        directives: Vec::new(),
        selection_set: None,
    }
}

/// A named fragment spread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpreadNode {
    /// The referenced fragment's name.
    pub name: String,
    /// Directives attached to the spread.
    pub directives: Vec<Directive>,
}

/// Build a fragment spread selection.
#[must_use]
pub fn spread(name: impl Into<String>) -> Selection {
    Selection::Spread(SpreadNode {
        name: name.into(),
        directives: Vec::new(),
    })
}

/// An inline fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineNode {
    /// The optional type condition.
    pub type_condition: Option<String>,
    /// Directives attached to the fragment.
    pub directives: Vec<Directive>,
    /// The fragment's selections.
    pub selection_set: SelectionSet,
}

/// Build an inline fragment selection with a type condition.
#[must_use]
pub fn inline(
    type_condition: impl Into<String>,
    selections: impl IntoIterator<Item = Selection>,
) -> Selection {
    Selection::Inline(InlineNode {
        type_condition: Some(type_condition.into()),
        directives: Vec::new(),
        selection_set: SelectionSet::new(selections),
    })
}

// =============================================================================
// ARGUMENTS & DIRECTIVES
// =============================================================================

/// A named argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    /// The argument's name.
    pub name: String,
    /// The argument's value.
    pub value: InputValue,
}

/// An argument value: a constant, a variable reference, or a structured
/// value containing either.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InputValue {
    /// A literal value.
    Const(Value),
    /// A reference to a variable by name.
    Variable(String),
    /// A list of input values.
    List(Vec<InputValue>),
    /// An object of input values, in document order.
    Object(Vec<(String, InputValue)>),
}

impl InputValue {
    /// Resolve this input value against the given variables.
    ///
    /// A reference to a missing variable resolves to `None`; inside lists
    /// it becomes `null`, inside objects the entry is dropped.
    #[must_use]
    pub fn resolve(&self, variables: &Variables) -> Option<Value> {
        match self {
            Self::Const(value) => Some(value.clone()),
            Self::Variable(name) => variables.get(name).cloned(),
            Self::List(items) => Some(Value::List(
                items
                    .iter()
                    .map(|item| item.resolve(variables).unwrap_or(Value::Null))
                    .collect(),
            )),
            Self::Object(entries) => Some(Value::Object(
                entries
                    .iter()
                    .filter_map(|(name, item)| {
                        item.resolve(variables).map(|value| (name.clone(), value))
                    })
                    .collect(),
            )),
        }
    }
}

impl From<Value> for InputValue {
    fn from(value: Value) -> Self {
        Self::Const(value)
    }
}

impl From<bool> for InputValue {
    fn from(value: bool) -> Self {
        Self::Const(Value::Boolean(value))
    }
}

impl From<i64> for InputValue {
    fn from(value: i64) -> Self {
        Self::Const(Value::Int(value))
    }
}

impl From<&str> for InputValue {
    fn from(value: &str) -> Self {
        Self::Const(Value::String(value.to_string()))
    }
}

impl From<String> for InputValue {
    fn from(value: String) -> Self {
        Self::Const(Value::String(value))
    }
}

/// A directive attached to a selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Directive {
    /// The directive's name.
    pub name: String,
    /// The directive's arguments.
    pub arguments: Vec<Argument>,
}

impl Directive {
    /// Build a `@skip(if: ...)` directive.
    #[must_use]
    pub fn skip(condition: impl Into<InputValue>) -> Self {
        Self {
            name: "skip".to_string(),
            arguments: vec![Argument {
                name: "if".to_string(),
                value: condition.into(),
            }],
        }
    }

    /// Build an `@include(if: ...)` directive.
    #[must_use]
    pub fn include(condition: impl Into<InputValue>) -> Self {
        Self {
            name: "include".to_string(),
            arguments: vec![Argument {
                name: "if".to_string(),
                value: condition.into(),
            }],
        }
    }
}

/// Variables supplied alongside an operation.
pub type Variables = BTreeMap<String, Value>;

/// Evaluate `@skip`/`@include` directives for one selection.
///
/// A missing or non-boolean condition leaves the selection included, which
/// mirrors upstream validation having already rejected malformed documents.
#[must_use]
pub fn should_include(directives: &[Directive], variables: &Variables) -> bool {
    for directive in directives {
        let condition = directive
            .arguments
            .iter()
            .find(|argument| argument.name == "if")
            .and_then(|argument| argument.value.resolve(variables));
        let Some(Value::Boolean(condition)) = condition else {
            continue;
        };
        match directive.name.as_str() {
            "skip" if condition => return false,
            "include" if !condition => return false,
            _ => {}
        }
    }
    true
}

// =============================================================================
// REQUESTS
// =============================================================================

/// One operation plus its variables, as handed in by the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// The parsed document.
    pub document: Document,
    /// The operation's variables.
    pub variables: Variables,
}

impl Request {
    /// Build a request with no variables.
    #[must_use]
    pub fn new(document: Document) -> Self {
        Self {
            document,
            variables: Variables::new(),
        }
    }

    /// Build a request with variables.
    #[must_use]
    pub fn with_variables(
        document: Document,
        variables: impl IntoIterator<Item = (String, Value)>,
    ) -> Self {
        Self {
            document,
            variables: variables.into_iter().collect(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

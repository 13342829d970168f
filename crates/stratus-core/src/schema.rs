//! # Schema Predicates
//!
//! Stateless query functions over an introspected schema: field
//! nullability, list-element nullability, field existence, and
//! interface/union membership.
//!
//! Every mismatch warns at most once per distinct message instead of
//! failing, so missing schema information degrades traversal quality but
//! never crashes a production read or write. Without a schema the cache
//! falls back to heuristic behavior in the selection iterator and the read
//! policy.

use crate::types::{CacheError, Warnings};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// SCHEMA MODEL
// =============================================================================

/// The kind of a named output type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeKind {
    /// A concrete object type.
    Object,
    /// An abstract interface type.
    Interface,
    /// An abstract union type.
    Union,
}

/// Shape of one field as far as the cache cares: nullability of the field
/// itself and, for list fields, of its elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    /// Whether the field itself may be null.
    pub nullable: bool,
    /// Whether the field is a list.
    pub list: bool,
    /// For list fields, whether elements may be null.
    pub element_nullable: bool,
}

impl SchemaField {
    /// A nullable non-list field.
    #[must_use]
    pub const fn nullable() -> Self {
        Self {
            nullable: true,
            list: false,
            element_nullable: false,
        }
    }

    /// A non-nullable non-list field.
    #[must_use]
    pub const fn required() -> Self {
        Self {
            nullable: false,
            list: false,
            element_nullable: false,
        }
    }

    /// A list field.
    #[must_use]
    pub const fn list(nullable: bool, element_nullable: bool) -> Self {
        Self {
            nullable,
            list: true,
            element_nullable,
        }
    }
}

/// One named type with its fields and, for abstract types, the concrete
/// types satisfying it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaType {
    /// The type's kind.
    pub kind: TypeKind,
    /// Output fields by name.
    pub fields: BTreeMap<String, SchemaField>,
    /// Concrete types satisfying this abstract type.
    pub possible_types: BTreeSet<String>,
}

/// An introspected schema reduced to what the cache needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    /// Name of the query root type.
    pub query_type: String,
    /// Name of the mutation root type, if any.
    pub mutation_type: Option<String>,
    /// Name of the subscription root type, if any.
    pub subscription_type: Option<String>,
    /// All named types by name.
    pub types: BTreeMap<String, SchemaType>,
}

impl Default for Schema {
    fn default() -> Self {
        Self {
            query_type: "Query".to_string(),
            mutation_type: Some("Mutation".to_string()),
            subscription_type: Some("Subscription".to_string()),
            types: BTreeMap::new(),
        }
    }
}

impl Schema {
    /// Create an empty schema with the default root type names.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an object type with its fields.
    #[must_use]
    pub fn object<N: Into<String>>(
        mut self,
        name: impl Into<String>,
        fields: impl IntoIterator<Item = (N, SchemaField)>,
    ) -> Self {
        self.types.insert(name.into(), SchemaType {
            kind: TypeKind::Object,
            fields: fields
                .into_iter()
                .map(|(name, field)| (name.into(), field))
                .collect(),
            possible_types: BTreeSet::new(),
        });
        self
    }

    /// Register an interface type with its fields and implementors.
    #[must_use]
    pub fn interface<N: Into<String>, P: Into<String>>(
        mut self,
        name: impl Into<String>,
        fields: impl IntoIterator<Item = (N, SchemaField)>,
        possible_types: impl IntoIterator<Item = P>,
    ) -> Self {
        self.types.insert(name.into(), SchemaType {
            kind: TypeKind::Interface,
            fields: fields
                .into_iter()
                .map(|(name, field)| (name.into(), field))
                .collect(),
            possible_types: possible_types.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Register a union type with its members.
    #[must_use]
    pub fn union<P: Into<String>>(
        mut self,
        name: impl Into<String>,
        possible_types: impl IntoIterator<Item = P>,
    ) -> Self {
        self.types.insert(name.into(), SchemaType {
            kind: TypeKind::Union,
            fields: BTreeMap::new(),
            possible_types: possible_types.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Build a schema from a standard introspection result.
    ///
    /// Accepts either the full result (`{"__schema": {...}}`) or the bare
    /// `__schema` object. Only object, interface, and union types are
    /// retained; scalar kinds carry no information the cache uses.
    pub fn from_introspection(document: &serde_json::Value) -> Result<Self, CacheError> {
        let root = document.get("__schema").unwrap_or(document);
        let invalid = |msg: &str| CacheError::InvalidIntrospection(msg.to_string());

        let root_name = |field: &str| -> Option<String> {
            root.get(field)?.get("name")?.as_str().map(String::from)
        };
        let mut schema = Self {
            query_type: root_name("queryType").ok_or_else(|| invalid("missing queryType"))?,
            mutation_type: root_name("mutationType"),
            subscription_type: root_name("subscriptionType"),
            types: BTreeMap::new(),
        };

        let types = root
            .get("types")
            .and_then(|types| types.as_array())
            .ok_or_else(|| invalid("missing types array"))?;
        for ty in types {
            let Some(name) = ty.get("name").and_then(|name| name.as_str()) else {
                continue;
            };
            let kind = match ty.get("kind").and_then(|kind| kind.as_str()) {
                Some("OBJECT") => TypeKind::Object,
                Some("INTERFACE") => TypeKind::Interface,
                Some("UNION") => TypeKind::Union,
                _ => continue,
            };
            let mut fields = BTreeMap::new();
            if let Some(raw_fields) = ty.get("fields").and_then(|fields| fields.as_array()) {
                for raw in raw_fields {
                    let Some(field_name) = raw.get("name").and_then(|name| name.as_str()) else {
                        continue;
                    };
                    let Some(type_ref) = raw.get("type") else {
                        continue;
                    };
                    fields.insert(field_name.to_string(), field_from_type_ref(type_ref));
                }
            }
            let possible_types = ty
                .get("possibleTypes")
                .and_then(|possible| possible.as_array())
                .map(|possible| {
                    possible
                        .iter()
                        .filter_map(|ty| ty.get("name")?.as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default();
            schema.types.insert(name.to_string(), SchemaType {
                kind,
                fields,
                possible_types,
            });
        }

        Ok(schema)
    }
}

/// Reduce an introspection type reference (`NON_NULL`/`LIST`/named chains)
/// to the nullability shape the cache tracks.
fn field_from_type_ref(type_ref: &serde_json::Value) -> SchemaField {
    let kind_of = |ty: &serde_json::Value| {
        ty.get("kind")
            .and_then(|kind| kind.as_str())
            .unwrap_or("")
            .to_string()
    };

    let mut current = type_ref;
    let nullable = kind_of(current) != "NON_NULL";
    if !nullable {
        if let Some(inner) = current.get("ofType") {
            current = inner;
        }
    }

    if kind_of(current) == "LIST" {
        let mut element_nullable = true;
        if let Some(element) = current.get("ofType") {
            element_nullable = kind_of(element) != "NON_NULL";
        }
        SchemaField {
            nullable,
            list: true,
            element_nullable,
        }
    } else {
        SchemaField {
            nullable,
            list: false,
            element_nullable: false,
        }
    }
}

// =============================================================================
// PREDICATES
// =============================================================================

/// Query functions over a [`Schema`], warning once per distinct message on
/// every mismatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaPredicates {
    schema: Schema,
}

impl SchemaPredicates {
    /// Wrap a schema.
    #[must_use]
    pub fn new(schema: Schema) -> Self {
        Self { schema }
    }

    /// The wrapped schema.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Check whether a field exists on a type, warning when it does not.
    pub fn has_field(&self, warnings: &mut Warnings, typename: &str, field: &str) -> bool {
        let Some(ty) = self.schema.types.get(typename) else {
            warnings.warn_once(format!("schema has no type named {typename}"));
            return false;
        };
        if field == "__typename" || ty.fields.contains_key(field) {
            true
        } else {
            warnings.warn_once(format!("type {typename} has no field named {field}"));
            false
        }
    }

    /// Check whether a field is nullable. Unknown types and fields warn
    /// and report non-nullable, so reads treat them as hard misses.
    pub fn is_field_nullable(&self, warnings: &mut Warnings, typename: &str, field: &str) -> bool {
        self.lookup_field(warnings, typename, field)
            .is_some_and(|field| field.nullable)
    }

    /// Check whether a list field's elements are nullable.
    pub fn is_element_nullable(
        &self,
        warnings: &mut Warnings,
        typename: &str,
        field: &str,
    ) -> bool {
        self.lookup_field(warnings, typename, field)
            .is_some_and(|field| field.list && field.element_nullable)
    }

    /// Check whether a concrete typename satisfies a fragment's type
    /// condition. Applying a fragment on a concrete type to a different
    /// concrete type warns and reports no match.
    pub fn is_compatible(
        &self,
        warnings: &mut Warnings,
        type_condition: &str,
        typename: &str,
    ) -> bool {
        if type_condition == typename {
            return true;
        }
        let Some(ty) = self.schema.types.get(type_condition) else {
            warnings.warn_once(format!("schema has no type named {type_condition}"));
            return false;
        };
        match ty.kind {
            TypeKind::Interface | TypeKind::Union => ty.possible_types.contains(typename),
            TypeKind::Object => {
                warnings.warn_once(format!(
                    "fragment on concrete type {type_condition} cannot match {typename}"
                ));
                false
            }
        }
    }

    fn lookup_field(
        &self,
        warnings: &mut Warnings,
        typename: &str,
        field: &str,
    ) -> Option<&SchemaField> {
        let Some(ty) = self.schema.types.get(typename) else {
            warnings.warn_once(format!("schema has no type named {typename}"));
            return None;
        };
        let Some(schema_field) = ty.fields.get(field) else {
            warnings.warn_once(format!("type {typename} has no field named {field}"));
            return None;
        };
        Some(schema_field)
    }
}

// =============================================================================
// TESTS
// =============================================================================

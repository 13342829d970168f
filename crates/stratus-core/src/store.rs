//! # Store Facade
//!
//! The public surface of the cache: construction-time registries (custom
//! key functions, read resolvers, updaters, optimistic resolvers, an
//! optional schema), the operation entry points (`write`,
//! `write_optimistic`, `query`, `invalidate`, `clear_optimistic`, `gc`),
//! and the helper API handed to resolver and updater callbacks as
//! [`CacheApi`].
//!
//! Every operation owns exactly one [`OpContext`]; the dependency sets it
//! collects are returned to the caller so the surrounding exchange can
//! re-evaluate affected queries. Garbage collection runs at the end of
//! every base-layer write and invalidation.

use crate::ast::{Document, OperationKind, Request, Variables};
use crate::data::{InMemoryData, OpContext};
use crate::formats;
use crate::keys::{KeyConfig, key_of_entity, key_of_field, parse_field_key};
use crate::operations::invalidate::InvalidateOp;
use crate::operations::query::{QueryOp, QueryResult};
use crate::operations::write::{WriteOp, WriteResult};
use crate::schema::{Schema, SchemaPredicates};
use crate::types::{
    CacheError, Dependencies, EntityKey, FieldKey, LayerKey, Link, Value, Warnings,
};
use std::collections::BTreeMap;

// =============================================================================
// CALLBACK REGISTRIES
// =============================================================================

/// Context handed to every resolver, updater, and optimistic callback.
#[derive(Debug, Clone, Copy)]
pub struct FieldInfo<'i> {
    /// Typename of the entity the field sits on.
    pub parent_typename: &'i str,
    /// Key of the entity the field sits on.
    pub parent_key: &'i EntityKey,
    /// The field's schema name.
    pub field_name: &'i str,
    /// The field's resolved arguments, if any.
    pub arguments: Option<&'i BTreeMap<String, Value>>,
    /// The operation's variables.
    pub variables: &'i Variables,
}

/// A custom read resolver. Returning `None` makes the field a miss.
pub type ResolverFn = dyn Fn(&FieldInfo<'_>, &mut CacheApi<'_>) -> Option<Value>;

/// Read resolvers by typename, then field name.
pub type ResolverConfig = BTreeMap<String, BTreeMap<String, Box<ResolverFn>>>;

/// An updater run after a mutation or subscription root field is written,
/// receiving the field's response value.
pub type UpdaterFn = dyn Fn(&Value, &FieldInfo<'_>, &mut CacheApi<'_>);

/// Updaters by root typename, then field name.
pub type UpdaterConfig = BTreeMap<String, BTreeMap<String, Box<UpdaterFn>>>;

/// An optimistic resolver producing a mutation root field's value without
/// a network response.
pub type OptimisticFn = dyn Fn(&FieldInfo<'_>, &mut CacheApi<'_>) -> Value;

/// Optimistic resolvers by mutation field name.
pub type OptimisticConfig = BTreeMap<String, Box<OptimisticFn>>;

/// Construction-time configuration for a [`Store`].
#[derive(Default)]
pub struct CacheConfig {
    schema: Option<SchemaPredicates>,
    keys: KeyConfig,
    resolvers: ResolverConfig,
    updates: UpdaterConfig,
    optimistic: OptimisticConfig,
}

impl CacheConfig {
    /// Start an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a schema; enables membership checks, nullability-aware
    /// partial results, and field-existence validation.
    #[must_use]
    pub fn schema(mut self, schema: Schema) -> Self {
        self.schema = Some(SchemaPredicates::new(schema));
        self
    }

    /// Register a custom key function for a typename.
    #[must_use]
    pub fn key(
        mut self,
        typename: impl Into<String>,
        key_fn: impl Fn(&BTreeMap<String, Value>) -> Option<String> + 'static,
    ) -> Self {
        self.keys.insert(typename.into(), Box::new(key_fn));
        self
    }

    /// Register a read resolver for a field.
    #[must_use]
    pub fn resolver(
        mut self,
        typename: impl Into<String>,
        field: impl Into<String>,
        resolver: impl Fn(&FieldInfo<'_>, &mut CacheApi<'_>) -> Option<Value> + 'static,
    ) -> Self {
        self.resolvers
            .entry(typename.into())
            .or_default()
            .insert(field.into(), Box::new(resolver));
        self
    }

    /// Register an updater for a mutation or subscription root field.
    #[must_use]
    pub fn updater(
        mut self,
        typename: impl Into<String>,
        field: impl Into<String>,
        updater: impl Fn(&Value, &FieldInfo<'_>, &mut CacheApi<'_>) + 'static,
    ) -> Self {
        self.updates
            .entry(typename.into())
            .or_default()
            .insert(field.into(), Box::new(updater));
        self
    }

    /// Register an optimistic resolver for a mutation field.
    #[must_use]
    pub fn optimistic(
        mut self,
        field: impl Into<String>,
        resolver: impl Fn(&FieldInfo<'_>, &mut CacheApi<'_>) -> Value + 'static,
    ) -> Self {
        self.optimistic.insert(field.into(), Box::new(resolver));
        self
    }
}

// =============================================================================
// ENTITIES & FIELD INSPECTION
// =============================================================================

/// How callers name an entity in the helper API: by key, or by partial
/// data carrying at least `__typename` and the entity's id fields.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityArg {
    /// An entity key.
    Key(EntityKey),
    /// Partial entity data to derive the key from.
    Data(BTreeMap<String, Value>),
}

impl From<EntityKey> for EntityArg {
    fn from(key: EntityKey) -> Self {
        Self::Key(key)
    }
}

/// One stored field occurrence of an entity, with its arguments parsed
/// back out of the field key.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldInspection {
    /// The field's name.
    pub field_name: String,
    /// The full stored field key.
    pub field_key: FieldKey,
    /// The parsed arguments, if the occurrence has any.
    pub arguments: Option<BTreeMap<String, Value>>,
}

fn inspect_entity_fields(data: &InMemoryData, entity: &EntityKey) -> Vec<FieldInspection> {
    data.field_keys(entity)
        .into_iter()
        .filter(|field_key| field_key.as_str() != "__typename")
        .map(|field_key| {
            let (field_name, arguments) = parse_field_key(&field_key);
            FieldInspection {
                field_name,
                field_key,
                arguments,
            }
        })
        .collect()
}

// =============================================================================
// CACHE API
// =============================================================================

/// The cache handle passed to resolver, updater, and optimistic callbacks.
///
/// All reads and writes through this handle share the calling operation's
/// context: they mark dependencies into the same set and, during an
/// optimistic write, land on the same overlay.
pub struct CacheApi<'c> {
    pub(crate) data: &'c mut InMemoryData,
    pub(crate) keys: &'c KeyConfig,
    pub(crate) resolvers: &'c ResolverConfig,
    pub(crate) schema: Option<&'c SchemaPredicates>,
    pub(crate) warnings: &'c mut Warnings,
    pub(crate) ctx: &'c mut OpContext,
}

impl CacheApi<'_> {
    /// Resolve an [`EntityArg`] to a concrete key.
    #[must_use]
    pub fn key_of(&mut self, entity: &EntityArg) -> Option<EntityKey> {
        match entity {
            EntityArg::Key(key) => Some(key.clone()),
            EntityArg::Data(object) => {
                let Some(typename) = object.get("__typename").and_then(Value::as_str) else {
                    self.warnings
                        .warn_once("entity data has no __typename field");
                    return None;
                };
                key_of_entity(typename, object, self.keys)
            }
        }
    }

    /// Read one field of one entity: its record value, or its link with
    /// entity keys rendered as strings.
    #[must_use]
    pub fn resolve(
        &mut self,
        entity: &EntityArg,
        field: &str,
        args: Option<&BTreeMap<String, Value>>,
    ) -> Option<Value> {
        let key = self.key_of(entity)?;
        let field_key = key_of_field(field, args);
        if let Some(record) = self.data.read_record(self.ctx, &key, &field_key) {
            return Some(record.clone());
        }
        let link = self.data.read_link(self.ctx, &key, &field_key)?;
        Some(link_to_value(link))
    }

    /// List every stored field occurrence of an entity.
    #[must_use]
    pub fn inspect_fields(&mut self, entity: &EntityArg) -> Vec<FieldInspection> {
        match self.key_of(entity) {
            Some(key) => inspect_entity_fields(self.data, &key),
            None => Vec::new(),
        }
    }

    /// Delete one field occurrence, or every field, of one entity.
    pub fn invalidate(
        &mut self,
        entity: &EntityArg,
        field: Option<&str>,
        args: Option<&BTreeMap<String, Value>>,
    ) {
        let Some(key) = self.key_of(entity) else {
            return;
        };
        invalidate_entity_fields(self.data, self.ctx, &key, field, args);
    }

    /// Read a query document against the cache, returning `None` on a
    /// miss.
    #[must_use]
    pub fn read_query(&mut self, request: &Request) -> Option<Value> {
        if request.document.kind != OperationKind::Query {
            self.warnings
                .warn_once("read_query requires a query operation");
            return None;
        }
        let root = self.data.query_root().clone();
        let mut op = QueryOp {
            data: &mut *self.data,
            keys: self.keys,
            resolvers: self.resolvers,
            schema: self.schema,
            warnings: &mut *self.warnings,
            fragments: &request.document.fragments,
            variables: &request.variables,
            ctx: &mut *self.ctx,
            partial: false,
        };
        op.read_selection(Some(&root), root.as_str(), &request.document.selection_set, None)
            .map(Value::Object)
    }

    /// Read a query, transform its data, and write the result back.
    /// Returning `None` from the transform leaves the cache untouched.
    pub fn update_query(
        &mut self,
        request: &Request,
        update: impl FnOnce(Option<Value>) -> Option<Value>,
    ) {
        let current = self.read_query(request);
        let Some(updated) = update(current) else {
            return;
        };
        let Value::Object(object) = updated else {
            self.warnings
                .warn_once("update_query produced a non-object value, skipping write");
            return;
        };
        let root = self.data.query_root().clone();
        let updates = UpdaterConfig::new();
        let optimistic = OptimisticConfig::new();
        let mut op = WriteOp {
            data: &mut *self.data,
            keys: self.keys,
            resolvers: self.resolvers,
            updates: &updates,
            optimistic: &optimistic,
            schema: self.schema,
            warnings: &mut *self.warnings,
            fragments: &request.document.fragments,
            variables: &request.variables,
            ctx: &mut *self.ctx,
        };
        op.write_selection(&root, root.as_str(), &request.document.selection_set, &object, true);
    }

    /// Read fragment-shaped data for one entity, returning `None` on a
    /// miss.
    #[must_use]
    pub fn read_fragment(&mut self, document: &Document, entity: &EntityArg) -> Option<Value> {
        let key = self.key_of(entity)?;
        let empty = Variables::new();
        let mut op = QueryOp {
            data: &mut *self.data,
            keys: self.keys,
            resolvers: self.resolvers,
            schema: self.schema,
            warnings: &mut *self.warnings,
            fragments: &document.fragments,
            variables: &empty,
            ctx: &mut *self.ctx,
            partial: false,
        };
        op.read_fragment(document, &key).map(Value::Object)
    }

    /// Patch one entity from fragment-shaped data. Failures (no fragment
    /// definition, key-less data) warn instead of erroring, since callback
    /// code has nowhere to propagate them.
    pub fn write_fragment(&mut self, document: &Document, data: &Value) {
        let Some(object) = data.as_object() else {
            self.warnings
                .warn_once("write_fragment data must be an object");
            return;
        };
        let empty = Variables::new();
        let updates = UpdaterConfig::new();
        let optimistic = OptimisticConfig::new();
        let outcome = {
            let mut op = WriteOp {
                data: &mut *self.data,
                keys: self.keys,
                resolvers: self.resolvers,
                updates: &updates,
                optimistic: &optimistic,
                schema: self.schema,
                warnings: &mut *self.warnings,
                fragments: &document.fragments,
                variables: &empty,
                ctx: &mut *self.ctx,
            };
            op.write_fragment(document, object)
        };
        if let Err(error) = outcome {
            self.warnings.warn_once(format!("write_fragment failed: {error}"));
        }
    }
}

fn link_to_value(link: &Link) -> Value {
    match link {
        Link::Null => Value::Null,
        Link::Entity(key) => Value::String(key.as_str().to_string()),
        Link::List(items) => Value::List(items.iter().map(link_to_value).collect()),
    }
}

fn invalidate_entity_fields(
    data: &mut InMemoryData,
    ctx: &mut OpContext,
    entity: &EntityKey,
    field: Option<&str>,
    args: Option<&BTreeMap<String, Value>>,
) {
    let field_keys: Vec<FieldKey> = match (field, args) {
        // A specific occurrence.
        (Some(name), Some(args)) => vec![key_of_field(name, Some(args))],
        // Every occurrence of one field, regardless of arguments.
        (Some(name), None) => data
            .field_keys(entity)
            .into_iter()
            .filter(|field_key| parse_field_key(field_key).0 == name)
            .collect(),
        // The whole entity.
        (None, _) => data.field_keys(entity).into_iter().collect(),
    };
    for field_key in field_keys {
        data.write_record(ctx, entity.clone(), field_key.clone(), None);
        data.write_link(ctx, entity.clone(), field_key, None);
    }
}

// =============================================================================
// ROOT NAMES
// =============================================================================

#[derive(Debug, Clone)]
struct RootNames {
    query: String,
    mutation: String,
    subscription: String,
}

impl RootNames {
    fn from_schema(schema: Option<&SchemaPredicates>) -> Self {
        let defaults = Schema::default();
        match schema {
            Some(predicates) => Self {
                query: predicates.schema().query_type.clone(),
                mutation: predicates
                    .schema()
                    .mutation_type
                    .clone()
                    .unwrap_or_else(|| "Mutation".to_string()),
                subscription: predicates
                    .schema()
                    .subscription_type
                    .clone()
                    .unwrap_or_else(|| "Subscription".to_string()),
            },
            None => Self {
                query: defaults.query_type,
                mutation: "Mutation".to_string(),
                subscription: "Subscription".to_string(),
            },
        }
    }

    fn for_kind(&self, kind: OperationKind) -> &str {
        match kind {
            OperationKind::Query => &self.query,
            OperationKind::Mutation => &self.mutation,
            OperationKind::Subscription => &self.subscription,
        }
    }
}

// =============================================================================
// STORE
// =============================================================================

/// The normalized document cache.
pub struct Store {
    data: InMemoryData,
    schema: Option<SchemaPredicates>,
    keys: KeyConfig,
    resolvers: ResolverConfig,
    updates: UpdaterConfig,
    optimistic: OptimisticConfig,
    warnings: Warnings,
    root_names: RootNames,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    /// Create a store with an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(CacheConfig::new())
    }

    /// Create a store from a configuration.
    #[must_use]
    pub fn with_config(config: CacheConfig) -> Self {
        let root_names = RootNames::from_schema(config.schema.as_ref());
        Self {
            data: InMemoryData::new(EntityKey::new(root_names.query.clone())),
            schema: config.schema,
            keys: config.keys,
            resolvers: config.resolvers,
            updates: config.updates,
            optimistic: config.optimistic,
            warnings: Warnings::new(),
            root_names,
        }
    }

    /// The configured schema predicates, if a schema was attached.
    #[must_use]
    pub fn schema(&self) -> Option<&SchemaPredicates> {
        self.schema.as_ref()
    }

    /// The warn-once sink, for observing non-fatal mismatches.
    #[must_use]
    pub fn warnings(&self) -> &Warnings {
        &self.warnings
    }

    /// Number of currently active optimistic layers.
    #[must_use]
    pub fn layer_count(&self) -> usize {
        self.data.layer_count()
    }

    // =========================================================================
    // OPERATIONS
    // =========================================================================

    /// Write a server response for an operation into the base layer.
    ///
    /// Query responses persist on the query root; mutation and
    /// subscription responses normalize their payloads without persisting
    /// root fields, then run registered updaters. Ends with a GC sweep.
    pub fn write(&mut self, request: &Request, data: &Value) -> Result<WriteResult, CacheError> {
        let object = data.as_object().ok_or(CacheError::NotAnObject)?;
        let kind = request.document.kind;
        let root_typename = self.root_names.for_kind(kind).to_string();
        let mut ctx = OpContext::base();
        {
            let mut op = WriteOp {
                data: &mut self.data,
                keys: &self.keys,
                resolvers: &self.resolvers,
                updates: &self.updates,
                optimistic: &self.optimistic,
                schema: self.schema.as_ref(),
                warnings: &mut self.warnings,
                fragments: &request.document.fragments,
                variables: &request.variables,
                ctx: &mut ctx,
            };
            match kind {
                OperationKind::Query => {
                    let root = EntityKey::new(root_typename.clone());
                    op.write_selection(
                        &root,
                        &root_typename,
                        &request.document.selection_set,
                        object,
                        true,
                    );
                }
                OperationKind::Mutation | OperationKind::Subscription => {
                    op.write_operation_root(
                        &root_typename,
                        &request.document.selection_set,
                        object,
                    );
                }
            }
        }
        self.data.gc();
        Ok(WriteResult {
            dependencies: ctx.dependencies,
        })
    }

    /// Apply a mutation's optimistic resolvers under the given layer.
    ///
    /// The layer masks the base until it is cleared; base reference counts
    /// are never touched, only the layer's locks.
    pub fn write_optimistic(
        &mut self,
        request: &Request,
        layer: LayerKey,
    ) -> Result<WriteResult, CacheError> {
        if request.document.kind != OperationKind::Mutation {
            return Err(CacheError::WrongOperationKind {
                expected: "mutation",
                found: request.document.kind.to_string(),
            });
        }
        let root_typename = self.root_names.mutation.clone();
        self.data.ensure_layer(layer);
        let mut ctx = OpContext::optimistic(layer);
        {
            let mut op = WriteOp {
                data: &mut self.data,
                keys: &self.keys,
                resolvers: &self.resolvers,
                updates: &self.updates,
                optimistic: &self.optimistic,
                schema: self.schema.as_ref(),
                warnings: &mut self.warnings,
                fragments: &request.document.fragments,
                variables: &request.variables,
                ctx: &mut ctx,
            };
            op.write_optimistic_root(&root_typename, &request.document.selection_set);
        }
        Ok(WriteResult {
            dependencies: ctx.dependencies,
        })
    }

    /// Read a query against the cache.
    pub fn query(&mut self, request: &Request) -> Result<QueryResult, CacheError> {
        self.query_seeded(request, None)
    }

    /// Read a query, preferring fields of `seed` (typically a fresh
    /// network response) over stored data.
    pub fn query_seeded(
        &mut self,
        request: &Request,
        seed: Option<&Value>,
    ) -> Result<QueryResult, CacheError> {
        if request.document.kind != OperationKind::Query {
            return Err(CacheError::WrongOperationKind {
                expected: "query",
                found: request.document.kind.to_string(),
            });
        }
        let overlay = match seed {
            Some(seed) => Some(seed.as_object().ok_or(CacheError::NotAnObject)?),
            None => None,
        };
        let root = self.data.query_root().clone();
        let mut ctx = OpContext::base();
        let (data, partial) = {
            let mut op = QueryOp {
                data: &mut self.data,
                keys: &self.keys,
                resolvers: &self.resolvers,
                schema: self.schema.as_ref(),
                warnings: &mut self.warnings,
                fragments: &request.document.fragments,
                variables: &request.variables,
                ctx: &mut ctx,
                partial: false,
            };
            let data = op.read_selection(
                Some(&root),
                root.as_str(),
                &request.document.selection_set,
                overlay,
            );
            let partial = op.partial && data.is_some();
            (data, partial)
        };
        Ok(QueryResult {
            data: data.map(Value::Object),
            partial,
            dependencies: ctx.dependencies,
        })
    }

    /// Delete everything a query document's selections touch, then sweep.
    pub fn invalidate(&mut self, request: &Request) -> Result<Dependencies, CacheError> {
        if request.document.kind != OperationKind::Query {
            return Err(CacheError::WrongOperationKind {
                expected: "query",
                found: request.document.kind.to_string(),
            });
        }
        let root = self.data.query_root().clone();
        let mut ctx = OpContext::base();
        {
            let mut op = InvalidateOp {
                data: &mut self.data,
                schema: self.schema.as_ref(),
                warnings: &mut self.warnings,
                fragments: &request.document.fragments,
                variables: &request.variables,
                ctx: &mut ctx,
            };
            op.invalidate_selection(&root, root.as_str(), &request.document.selection_set);
        }
        self.data.gc();
        Ok(ctx.dependencies)
    }

    /// Delete one field occurrence, every occurrence of one field, or
    /// every field of one entity, then sweep.
    pub fn invalidate_entity(
        &mut self,
        entity: &EntityKey,
        field: Option<&str>,
        args: Option<&BTreeMap<String, Value>>,
    ) -> Dependencies {
        let mut ctx = OpContext::base();
        invalidate_entity_fields(&mut self.data, &mut ctx, entity, field, args);
        self.data.gc();
        ctx.dependencies
    }

    /// Drop one optimistic layer and sweep entities its locks were
    /// keeping alive.
    pub fn clear_optimistic(&mut self, layer: LayerKey) {
        self.data.clear_layer(layer);
        self.data.gc();
    }

    /// Sweep the pending garbage-collection batch.
    pub fn gc(&mut self) {
        self.data.gc();
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    /// Read one field of one entity outside any traversal.
    #[must_use]
    pub fn resolve(
        &mut self,
        entity: &EntityArg,
        field: &str,
        args: Option<&BTreeMap<String, Value>>,
    ) -> Option<Value> {
        let mut ctx = OpContext::base();
        self.api(&mut ctx).resolve(entity, field, args)
    }

    /// List every stored field occurrence of an entity, with parsed
    /// arguments, in deterministic order.
    #[must_use]
    pub fn inspect_fields(&self, entity: &EntityKey) -> Vec<FieldInspection> {
        inspect_entity_fields(&self.data, entity)
    }

    /// Read a query, returning only its data.
    #[must_use]
    pub fn read_query(&mut self, request: &Request) -> Option<Value> {
        let mut ctx = OpContext::base();
        self.api(&mut ctx).read_query(request)
    }

    /// Read a query, transform its data, and write the result back, then
    /// sweep. Returns the dependencies of the write.
    pub fn update_query(
        &mut self,
        request: &Request,
        update: impl FnOnce(Option<Value>) -> Option<Value>,
    ) -> Dependencies {
        let mut ctx = OpContext::base();
        self.api(&mut ctx).update_query(request, update);
        self.data.gc();
        ctx.dependencies
    }

    /// Read fragment-shaped data for one entity.
    #[must_use]
    pub fn read_fragment(&mut self, document: &Document, entity: &EntityArg) -> Option<Value> {
        let mut ctx = OpContext::base();
        self.api(&mut ctx).read_fragment(document, entity)
    }

    /// Patch one entity from fragment-shaped data, then sweep. Returns
    /// the dependencies of the write.
    pub fn write_fragment(
        &mut self,
        document: &Document,
        data: &Value,
    ) -> Result<Dependencies, CacheError> {
        let object = data.as_object().ok_or(CacheError::NotAnObject)?;
        let empty = Variables::new();
        let mut ctx = OpContext::base();
        {
            let mut op = WriteOp {
                data: &mut self.data,
                keys: &self.keys,
                resolvers: &self.resolvers,
                updates: &self.updates,
                optimistic: &self.optimistic,
                schema: self.schema.as_ref(),
                warnings: &mut self.warnings,
                fragments: &document.fragments,
                variables: &empty,
                ctx: &mut ctx,
            };
            op.write_fragment(document, object)?;
        }
        self.data.gc();
        Ok(ctx.dependencies)
    }

    // =========================================================================
    // SNAPSHOTS
    // =========================================================================

    /// Serialize the base layer. Optimistic overlays are volatile and not
    /// included.
    pub fn snapshot(&self) -> Result<Vec<u8>, CacheError> {
        formats::write_snapshot(&self.data)
    }

    /// Replace this store's data with a previously serialized base layer.
    pub fn hydrate(&mut self, bytes: &[u8]) -> Result<(), CacheError> {
        self.data = formats::read_snapshot(bytes, self.data.query_root().clone())?;
        Ok(())
    }

    fn api<'c>(&'c mut self, ctx: &'c mut OpContext) -> CacheApi<'c> {
        CacheApi {
            data: &mut self.data,
            keys: &self.keys,
            resolvers: &self.resolvers,
            schema: self.schema.as_ref(),
            warnings: &mut self.warnings,
            ctx,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Document, Fragment, Request, field};
    use crate::schema::SchemaField;

    fn todo(id: &str, text: &str) -> Value {
        Value::object([
            ("__typename", Value::from("Todo")),
            ("id", Value::from(id)),
            ("text", Value::from(text)),
        ])
    }

    fn todos_request() -> Request {
        Request::new(Document::query([field("todos")
            .select([
                field("__typename").into(),
                field("id").into(),
                field("text").into(),
            ])
            .into()]))
    }

    #[test]
    fn write_then_query_roundtrip() {
        let mut store = Store::new();
        let request = todos_request();
        let response = Value::object([("todos", Value::list([todo("1", "Go")]))]);

        let written = store.write(&request, &response).expect("write");
        assert!(written.dependencies.contains("Query.todos"));
        assert!(written.dependencies.contains("Todo:1"));

        let result = store.query(&request).expect("query");
        assert_eq!(result.data, Some(response));
        assert!(!result.partial);
        assert!(result.dependencies.contains("Query.todos"));
    }

    #[test]
    fn query_miss_before_any_write() {
        let mut store = Store::new();
        let result = store.query(&todos_request()).expect("query");
        assert_eq!(result.data, None);
        assert!(!result.partial);
    }

    #[test]
    fn wrong_operation_kind_is_an_error() {
        let mut store = Store::new();
        let mutation = Request::new(Document::mutation([field("addTodo").into()]));
        assert!(matches!(
            store.query(&mutation),
            Err(CacheError::WrongOperationKind { expected: "query", .. })
        ));
        assert!(matches!(
            store.write_optimistic(&todos_request(), LayerKey(1)),
            Err(CacheError::WrongOperationKind { expected: "mutation", .. })
        ));
    }

    #[test]
    fn non_object_response_is_an_error() {
        let mut store = Store::new();
        assert!(matches!(
            store.write(&todos_request(), &Value::from(1i64)),
            Err(CacheError::NotAnObject)
        ));
    }

    #[test]
    fn mutation_updater_patches_query() {
        let list_request = todos_request();
        let updater_request = todos_request();
        let config = CacheConfig::new().updater("Mutation", "addTodo", move |value, _info, cache| {
            let added = value.clone();
            cache.update_query(&updater_request, |previous| {
                let Some(Value::Object(mut object)) = previous else {
                    return None;
                };
                if let Some(Value::List(todos)) = object.get_mut("todos") {
                    todos.push(added);
                }
                Some(Value::Object(object))
            });
        });
        let mut store = Store::with_config(config);

        let response = Value::object([("todos", Value::list([todo("1", "Go")]))]);
        store.write(&list_request, &response).expect("write");

        let mutation = Request::new(Document::mutation([field("addTodo")
            .select([
                field("__typename").into(),
                field("id").into(),
                field("text").into(),
            ])
            .into()]));
        let payload = Value::object([("addTodo", todo("2", "Ship"))]);
        store.write(&mutation, &payload).expect("mutation write");

        let result = store.query(&list_request).expect("query");
        let expected = Value::object([(
            "todos",
            Value::list([todo("1", "Go"), todo("2", "Ship")]),
        )]);
        assert_eq!(result.data, Some(expected));
    }

    #[test]
    fn optimistic_mutation_masks_and_clears() {
        let config = CacheConfig::new().optimistic("updateTodo", |_info, _cache| {
            todo("1", "Optimistic")
        });
        let mut store = Store::with_config(config);

        let request = todos_request();
        let response = Value::object([("todos", Value::list([todo("1", "Go")]))]);
        store.write(&request, &response).expect("write");

        let mutation = Request::new(Document::mutation([field("updateTodo")
            .select([
                field("__typename").into(),
                field("id").into(),
                field("text").into(),
            ])
            .into()]));
        store
            .write_optimistic(&mutation, LayerKey(7))
            .expect("optimistic");
        assert_eq!(store.layer_count(), 1);

        let masked = store.query(&request).expect("query").data;
        assert_eq!(
            masked,
            Some(Value::object([(
                "todos",
                Value::list([todo("1", "Optimistic")])
            )]))
        );

        store.clear_optimistic(LayerKey(7));
        let restored = store.query(&request).expect("query").data;
        assert_eq!(restored, Some(response));
    }

    #[test]
    fn resolver_shadows_stored_record() {
        let config = CacheConfig::new().resolver("Todo", "text", |_info, _cache| {
            Some(Value::from("Shadowed"))
        });
        let mut store = Store::with_config(config);

        let request = todos_request();
        let response = Value::object([("todos", Value::list([todo("1", "Go")]))]);
        store.write(&request, &response).expect("write");

        let result = store.query(&request).expect("query").data;
        assert_eq!(
            result,
            Some(Value::object([(
                "todos",
                Value::list([todo("1", "Shadowed")])
            )]))
        );
    }

    #[test]
    fn custom_key_function_drives_entity_keys() {
        let config = CacheConfig::new().key("Todo", |data| {
            data.get("slug").and_then(Value::as_str).map(String::from)
        });
        let mut store = Store::with_config(config);

        let request = Request::new(Document::query([field("todo")
            .select([
                field("__typename").into(),
                field("slug").into(),
                field("text").into(),
            ])
            .into()]));
        let response = Value::object([(
            "todo",
            Value::object([
                ("__typename", Value::from("Todo")),
                ("slug", Value::from("go-shopping")),
                ("text", Value::from("Go")),
            ]),
        )]);
        let written = store.write(&request, &response).expect("write");
        assert!(written.dependencies.contains("Todo:go-shopping"));
    }

    #[test]
    fn resolve_returns_records_and_links() {
        let mut store = Store::new();
        let request = todos_request();
        let response = Value::object([("todos", Value::list([todo("1", "Go")]))]);
        store.write(&request, &response).expect("write");

        let entity = EntityArg::Key(EntityKey::new("Todo:1"));
        assert_eq!(store.resolve(&entity, "text", None), Some(Value::from("Go")));

        let root = EntityArg::Key(EntityKey::new("Query"));
        assert_eq!(
            store.resolve(&root, "todos", None),
            Some(Value::list(["Todo:1"]))
        );
    }

    #[test]
    fn inspect_fields_parses_arguments() {
        let mut store = Store::new();
        let request = Request::new(Document::query([
            field("todos")
                .arg("first", 2i64)
                .select([
                    field("__typename").into(),
                    field("id").into(),
                    field("text").into(),
                ])
                .into(),
        ]));
        let response = Value::object([(
            "todos",
            Value::list([todo("1", "Go")]),
        )]);
        store.write(&request, &response).expect("write");

        let fields = store.inspect_fields(&EntityKey::new("Query"));
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].field_name, "todos");
        assert_eq!(
            fields[0].arguments.as_ref().and_then(|args| args.get("first")),
            Some(&Value::from(2i64))
        );
    }

    #[test]
    fn invalidate_entity_removes_and_collects() {
        let mut store = Store::new();
        let request = todos_request();
        let response = Value::object([("todos", Value::list([todo("1", "Go")]))]);
        store.write(&request, &response).expect("write");

        let deps = store.invalidate_entity(&EntityKey::new("Query"), Some("todos"), None);
        assert!(deps.contains("Query.todos"));

        let result = store.query(&request).expect("query");
        assert_eq!(result.data, None);
        // The orphaned todo was swept.
        assert!(store.resolve(&EntityArg::Key(EntityKey::new("Todo:1")), "text", None).is_none());
    }

    #[test]
    fn invalidate_query_document() {
        let mut store = Store::new();
        let request = todos_request();
        let response = Value::object([("todos", Value::list([todo("1", "Go")]))]);
        store.write(&request, &response).expect("write");

        let deps = store.invalidate(&request).expect("invalidate");
        assert!(deps.contains("Query.todos"));
        assert_eq!(store.query(&request).expect("query").data, None);
    }

    #[test]
    fn fragment_write_and_read() {
        let mut store = Store::new();
        let fragment = Document::fragment_document(Fragment::new("todoFields", "Todo", [
            field("id").into(),
            field("text").into(),
        ]));

        store
            .write_fragment(&fragment, &todo("1", "Go"))
            .expect("write fragment");

        let read = store.read_fragment(&fragment, &EntityArg::Key(EntityKey::new("Todo:1")));
        assert_eq!(
            read,
            Some(Value::object([
                ("id", Value::from("1")),
                ("text", Value::from("Go")),
            ]))
        );
    }

    #[test]
    fn unkeyable_fragment_is_an_error() {
        let mut store = Store::new();
        let fragment = Document::fragment_document(Fragment::new("meta", "Meta", [
            field("flag").into(),
        ]));
        let data = Value::object([("flag", true)]);
        assert!(matches!(
            store.write_fragment(&fragment, &data),
            Err(CacheError::UnkeyableFragment { .. })
        ));
    }

    #[test]
    fn seeded_query_prefers_response_fields() {
        let mut store = Store::new();
        let request = todos_request();
        let response = Value::object([("todos", Value::list([todo("1", "Go")]))]);
        store.write(&request, &response).expect("write");

        let seed = Value::object([("todos", Value::list([todo("1", "Fresh")]))]);
        let result = store.query_seeded(&request, Some(&seed)).expect("query");
        assert_eq!(result.data, Some(seed));
    }

    #[test]
    fn schema_enables_partial_results() {
        let schema = Schema::new()
            .object("Query", [
                ("todos", SchemaField::list(true, true)),
                ("latestTodo", SchemaField::nullable()),
            ])
            .object("Todo", [
                ("id", SchemaField::required()),
                ("text", SchemaField::nullable()),
            ]);
        let mut store = Store::with_config(CacheConfig::new().schema(schema));

        let write_request = todos_request();
        let response = Value::object([("todos", Value::list([todo("1", "Go")]))]);
        store.write(&write_request, &response).expect("write");

        let read_request = Request::new(Document::query([
            field("todos")
                .select([
                    field("__typename").into(),
                    field("id").into(),
                    field("text").into(),
                ])
                .into(),
            field("latestTodo").select([field("id").into()]).into(),
        ]));
        let result = store.query(&read_request).expect("query");
        assert!(result.partial);
        let data = result.data.expect("data");
        assert_eq!(data.get("latestTodo"), Some(&Value::Null));
    }

    #[test]
    fn update_query_transforms_cached_data() {
        let mut store = Store::new();
        let request = todos_request();
        let response = Value::object([("todos", Value::list([todo("1", "Go")]))]);
        store.write(&request, &response).expect("write");

        store.update_query(&request, |previous| {
            let Some(Value::Object(mut object)) = previous else {
                return None;
            };
            if let Some(Value::List(todos)) = object.get_mut("todos") {
                todos.push(todo("2", "Ship"));
            }
            Some(Value::Object(object))
        });

        let result = store.query(&request).expect("query").data;
        assert_eq!(
            result,
            Some(Value::object([(
                "todos",
                Value::list([todo("1", "Go"), todo("2", "Ship")]),
            )]))
        );
    }
}

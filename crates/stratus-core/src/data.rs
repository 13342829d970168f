//! # Layered Entity Store
//!
//! The authoritative entity graph: a durable base layer plus a stack of
//! numbered optimistic overlays, per-entity reference counts, per-layer
//! reference locks, and the deferred garbage-collection batch.
//!
//! Reads consult overlays newest-first and return the first layer that has
//! *any* entry for the requested field, including an explicit tombstone,
//! before falling back to the base layer. Writes go to the layer selected
//! by the active [`OpContext`]; base-layer link writes maintain reference
//! counts by diffing the previous link against the new one.
//!
//! All maps are `BTreeMap` for deterministic iteration order.

use crate::types::{Dependencies, EntityKey, FieldKey, LayerKey, Link, Value};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// OPERATION CONTEXT
// =============================================================================

/// State scoped to exactly one top-level operation (write, read, or
/// invalidate): the selected layer and the dependency set being collected.
///
/// The original implementation threads this through ambient module state;
/// here it is an explicit struct owned by the top-level operation function
/// and passed by reference through the traversal call graph, so the store
/// carries no hidden statics. Traversals are not reentrant with respect to
/// one context.
#[derive(Debug, Default)]
pub struct OpContext {
    /// The optimistic layer writes go to; `None` selects the base layer.
    pub layer: Option<LayerKey>,
    /// Entities and root fields touched so far.
    pub dependencies: Dependencies,
}

impl OpContext {
    /// Context for a base-layer operation.
    #[must_use]
    pub fn base() -> Self {
        Self::default()
    }

    /// Context for an operation writing under an optimistic layer.
    #[must_use]
    pub fn optimistic(layer: LayerKey) -> Self {
        Self {
            layer: Some(layer),
            dependencies: Dependencies::new(),
        }
    }
}

// =============================================================================
// MAP SHAPES
// =============================================================================

/// Per-entity field table in the base layer.
type FieldMap<T> = BTreeMap<FieldKey, T>;
/// Base layer: entity -> field -> value. Absent entries are misses.
type BaseMap<T> = BTreeMap<EntityKey, FieldMap<T>>;
/// One optimistic overlay: entries are `Some` values or `None` tombstones
/// that mask the base layer without mutating it.
type OverlayMap<T> = BTreeMap<EntityKey, FieldMap<Option<T>>>;

// =============================================================================
// IN-MEMORY DATA
// =============================================================================

/// The layered entity store.
#[derive(Debug)]
pub struct InMemoryData {
    /// Key of the query root, used for root-field dependency entries.
    query_root: EntityKey,
    /// Base-layer records (scalars and embedded values).
    records_base: BaseMap<Value>,
    /// Base-layer links (graph edges).
    links_base: BaseMap<Link>,
    /// Optimistic record overlays by layer.
    records_optimistic: BTreeMap<LayerKey, OverlayMap<Value>>,
    /// Optimistic link overlays by layer.
    links_optimistic: BTreeMap<LayerKey, OverlayMap<Link>>,
    /// Layer priority, most recent first.
    optimistic_order: Vec<LayerKey>,
    /// Incoming base-layer link counts per entity.
    ref_counts: BTreeMap<EntityKey, i64>,
    /// Incoming link counts created within each optimistic layer. A lock
    /// prevents collection of an entity only reachable through a
    /// not-yet-committed optimistic write.
    ref_locks: BTreeMap<LayerKey, BTreeMap<EntityKey, i64>>,
    /// Entities whose refcount dropped to zero, awaiting the next sweep.
    gc_batch: BTreeSet<EntityKey>,
}

impl Default for InMemoryData {
    fn default() -> Self {
        Self::new(EntityKey::new("Query"))
    }
}

impl InMemoryData {
    /// Create an empty store with the given query-root key.
    #[must_use]
    pub fn new(query_root: EntityKey) -> Self {
        Self {
            query_root,
            records_base: BaseMap::new(),
            links_base: BaseMap::new(),
            records_optimistic: BTreeMap::new(),
            links_optimistic: BTreeMap::new(),
            optimistic_order: Vec::new(),
            ref_counts: BTreeMap::new(),
            ref_locks: BTreeMap::new(),
            gc_batch: BTreeSet::new(),
        }
    }

    /// The query-root key.
    #[must_use]
    pub fn query_root(&self) -> &EntityKey {
        &self.query_root
    }

    // =========================================================================
    // DEPENDENCIES
    // =========================================================================

    /// Record that an operation touched `(entity, field)`.
    ///
    /// Fields on the query root become `Query.fieldKey` entries; every
    /// other entity is recorded by its key alone. `__typename` reads are
    /// not dependencies.
    fn mark_dependency(&self, ctx: &mut OpContext, key: &EntityKey, field: &FieldKey) {
        if field.as_str() == "__typename" {
            return;
        }
        if *key == self.query_root {
            ctx.dependencies.insert(format!("{key}.{field}"));
        } else {
            ctx.dependencies.insert(key.to_string());
        }
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// Read a record without marking a dependency.
    #[must_use]
    pub fn peek_record(&self, key: &EntityKey, field: &FieldKey) -> Option<&Value> {
        read_layered(
            &self.optimistic_order,
            &self.records_optimistic,
            &self.records_base,
            key,
            field,
        )
    }

    /// Read a link without marking a dependency.
    #[must_use]
    pub fn peek_link(&self, key: &EntityKey, field: &FieldKey) -> Option<&Link> {
        read_layered(
            &self.optimistic_order,
            &self.links_optimistic,
            &self.links_base,
            key,
            field,
        )
    }

    /// Read the highest-priority record for a key pair, marking it as a
    /// dependency of the active operation.
    pub fn read_record(
        &self,
        ctx: &mut OpContext,
        key: &EntityKey,
        field: &FieldKey,
    ) -> Option<&Value> {
        self.mark_dependency(ctx, key, field);
        self.peek_record(key, field)
    }

    /// Read the highest-priority link for a key pair, marking it as a
    /// dependency of the active operation.
    pub fn read_link(
        &self,
        ctx: &mut OpContext,
        key: &EntityKey,
        field: &FieldKey,
    ) -> Option<&Link> {
        self.mark_dependency(ctx, key, field);
        self.peek_link(key, field)
    }

    /// Check whether any layer stores a record or link for a key pair.
    #[must_use]
    pub fn has_field(&self, key: &EntityKey, field: &FieldKey) -> bool {
        self.peek_record(key, field).is_some() || self.peek_link(key, field).is_some()
    }

    /// Check whether an entity has any record in any layer. An entity is
    /// considered present once at least `__typename` has been written.
    #[must_use]
    pub fn has_entity(&self, key: &EntityKey) -> bool {
        if self.records_base.contains_key(key) {
            return true;
        }
        self.records_optimistic
            .values()
            .any(|overlay| overlay.get(key).is_some_and(|fields| !fields.is_empty()))
    }

    /// Every field key written for an entity, across the base layer and
    /// all overlays, in deterministic order. Tombstoned overlay entries
    /// without a base value are excluded.
    #[must_use]
    pub fn field_keys(&self, key: &EntityKey) -> BTreeSet<FieldKey> {
        fn extend_from_base<T>(out: &mut BTreeSet<FieldKey>, base: &BaseMap<T>, key: &EntityKey) {
            if let Some(fields) = base.get(key) {
                out.extend(fields.keys().cloned());
            }
        }
        fn extend_from_overlays<T>(
            out: &mut BTreeSet<FieldKey>,
            overlays: &BTreeMap<LayerKey, OverlayMap<T>>,
            key: &EntityKey,
        ) {
            for overlay in overlays.values() {
                if let Some(fields) = overlay.get(key) {
                    out.extend(
                        fields
                            .iter()
                            .filter(|(_, entry)| entry.is_some())
                            .map(|(field, _)| field.clone()),
                    );
                }
            }
        }
        let mut out = BTreeSet::new();
        extend_from_base(&mut out, &self.records_base, key);
        extend_from_base(&mut out, &self.links_base, key);
        extend_from_overlays(&mut out, &self.records_optimistic, key);
        extend_from_overlays(&mut out, &self.links_optimistic, key);
        out
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    /// Write (or, with `None` in the base layer, remove) a record.
    pub fn write_record(
        &mut self,
        ctx: &mut OpContext,
        key: EntityKey,
        field: FieldKey,
        value: Option<Value>,
    ) {
        self.mark_dependency(ctx, &key, &field);
        match ctx.layer {
            Some(layer) => {
                self.ensure_layer(layer);
                self.records_optimistic
                    .entry(layer)
                    .or_default()
                    .entry(key)
                    .or_default()
                    .insert(field, value);
            }
            None => match value {
                Some(value) => {
                    self.records_base.entry(key).or_default().insert(field, value);
                }
                None => {
                    if let Some(fields) = self.records_base.get_mut(&key) {
                        fields.remove(&field);
                        if fields.is_empty() {
                            self.records_base.remove(&key);
                        }
                    }
                }
            },
        }
    }

    /// Write (or, with `None` in the base layer, remove) a link, updating
    /// reference counts by diffing the previous link in the same layer.
    ///
    /// Base-layer writes adjust `ref_counts` and schedule entities whose
    /// count drops to zero for collection. Optimistic writes only adjust
    /// that layer's lock table and never touch base counts.
    pub fn write_link(
        &mut self,
        ctx: &mut OpContext,
        key: EntityKey,
        field: FieldKey,
        link: Option<Link>,
    ) {
        self.mark_dependency(ctx, &key, &field);
        match ctx.layer {
            Some(layer) => {
                self.ensure_layer(layer);
                let previous = self
                    .links_optimistic
                    .entry(layer)
                    .or_default()
                    .entry(key)
                    .or_default()
                    .insert(field, link.clone());
                let locks = self.ref_locks.entry(layer).or_default();
                if let Some(Some(previous)) = previous {
                    for target in previous.entity_keys() {
                        let count = locks.entry(target.clone()).or_insert(0);
                        *count -= 1;
                        if *count <= 0 {
                            locks.remove(target);
                        }
                    }
                }
                if let Some(link) = link {
                    for target in link.entity_keys() {
                        *locks.entry(target.clone()).or_insert(0) += 1;
                    }
                }
            }
            None => {
                let previous = {
                    let fields = self.links_base.entry(key.clone()).or_default();
                    let previous = match &link {
                        Some(link) => fields.insert(field, link.clone()),
                        None => fields.remove(&field),
                    };
                    if fields.is_empty() {
                        self.links_base.remove(&key);
                    }
                    previous
                };
                if let Some(previous) = previous {
                    let targets: Vec<EntityKey> =
                        previous.entity_keys().into_iter().cloned().collect();
                    for target in targets {
                        self.dec_ref(target);
                    }
                }
                if let Some(link) = link {
                    let targets: Vec<EntityKey> = link.entity_keys().into_iter().cloned().collect();
                    for target in targets {
                        self.inc_ref(target);
                    }
                }
            }
        }
    }

    fn inc_ref(&mut self, key: EntityKey) {
        *self.ref_counts.entry(key).or_insert(0) += 1;
    }

    fn dec_ref(&mut self, key: EntityKey) {
        let count = self.ref_counts.entry(key.clone()).or_insert(0);
        *count -= 1;
        if *count <= 0 {
            self.gc_batch.insert(key);
        }
    }

    // =========================================================================
    // OPTIMISTIC LAYERS
    // =========================================================================

    /// Register a layer as the current highest-priority overlay.
    pub fn ensure_layer(&mut self, layer: LayerKey) {
        if !self.optimistic_order.contains(&layer) {
            self.optimistic_order.insert(0, layer);
        }
    }

    /// Remove one overlay: its records, links, and its lock table, in
    /// O(overlay size). Clearing an unknown layer is a no-op, since a
    /// mutation's success and teardown paths may both clear it.
    pub fn clear_layer(&mut self, layer: LayerKey) {
        self.optimistic_order.retain(|existing| *existing != layer);
        self.records_optimistic.remove(&layer);
        self.links_optimistic.remove(&layer);
        self.ref_locks.remove(&layer);
    }

    /// Check whether any optimistic layer holds a lock on an entity.
    #[must_use]
    pub fn is_locked(&self, key: &EntityKey) -> bool {
        self.ref_locks
            .values()
            .any(|locks| locks.get(key).copied().unwrap_or(0) > 0)
    }

    /// Number of currently registered optimistic layers.
    #[must_use]
    pub fn layer_count(&self) -> usize {
        self.optimistic_order.len()
    }

    // =========================================================================
    // GARBAGE COLLECTION
    // =========================================================================

    /// Sweep the pending-collection batch.
    ///
    /// Only entities whose refcount transitioned to zero are examined, not
    /// the whole graph. Deleting an entity decrements everything its own
    /// base links referenced, which re-feeds the batch; cycles are safe
    /// because decrementing only schedules, never deletes inline. Entities
    /// held by an optimistic lock stay in the batch for a later sweep.
    pub fn gc(&mut self) {
        let mut deferred = Vec::new();
        while let Some(key) = self.gc_batch.pop_first() {
            if self.ref_counts.get(&key).copied().unwrap_or(0) > 0 {
                continue;
            }
            if self.is_locked(&key) {
                deferred.push(key);
                continue;
            }
            self.ref_counts.remove(&key);
            self.records_base.remove(&key);
            if let Some(links) = self.links_base.remove(&key) {
                for link in links.values() {
                    let targets: Vec<EntityKey> =
                        link.entity_keys().into_iter().cloned().collect();
                    for target in targets {
                        self.dec_ref(target);
                    }
                }
            }
        }
        self.gc_batch.extend(deferred);
    }

    // =========================================================================
    // SNAPSHOT ACCESS
    // =========================================================================

    /// Iterate the base layer for snapshot serialization. Optimistic
    /// overlays are volatile and never serialized.
    pub(crate) fn base_parts(
        &self,
    ) -> (
        &BTreeMap<EntityKey, BTreeMap<FieldKey, Value>>,
        &BTreeMap<EntityKey, BTreeMap<FieldKey, Link>>,
        &BTreeMap<EntityKey, i64>,
    ) {
        (&self.records_base, &self.links_base, &self.ref_counts)
    }

    /// Rebuild a store from snapshot parts. Entities whose persisted
    /// refcount is not positive are scheduled for collection.
    pub(crate) fn from_base_parts(
        query_root: EntityKey,
        records: BTreeMap<EntityKey, BTreeMap<FieldKey, Value>>,
        links: BTreeMap<EntityKey, BTreeMap<FieldKey, Link>>,
        ref_counts: BTreeMap<EntityKey, i64>,
    ) -> Self {
        let mut data = Self::new(query_root);
        let mut batch = BTreeSet::new();
        for key in records.keys().chain(links.keys()) {
            if ref_counts.get(key).copied().unwrap_or(0) <= 0 && *key != data.query_root {
                batch.insert(key.clone());
            }
        }
        data.records_base = records;
        data.links_base = links;
        data.ref_counts = ref_counts;
        data.gc_batch = batch;
        data
    }
}

/// Layered read: overlays newest-first, where any entry (including a
/// tombstone) wins, then the base layer.
fn read_layered<'a, T>(
    order: &[LayerKey],
    overlays: &'a BTreeMap<LayerKey, OverlayMap<T>>,
    base: &'a BaseMap<T>,
    key: &EntityKey,
    field: &FieldKey,
) -> Option<&'a T> {
    for layer in order {
        if let Some(fields) = overlays.get(layer).and_then(|overlay| overlay.get(key)) {
            if let Some(entry) = fields.get(field) {
                return entry.as_ref();
            }
        }
    }
    base.get(key).and_then(|fields| fields.get(field))
}

// =============================================================================
// TESTS
// =============================================================================

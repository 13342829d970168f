//! # stratus-core
//!
//! The normalized document cache for Stratus - THE STORE.
//!
//! This crate implements a schema-aware, normalized cache for structured
//! query documents: responses are flattened into an entity graph keyed by
//! stable entity keys, and selection sets are mapped back onto that graph
//! to write, read, and invalidate data.
//!
//! ## Layered Design
//!
//! - `types` / `ast` / `keys` → identity, values, and the document tree
//! - `data` → the layered entity store (base + optimistic overlays,
//!   refcounts, GC batch)
//! - `iterate` → the selection iterator with pluggable fragment matching
//! - `operations` → the write, query, and invalidate traversals
//! - `store` → the public facade and callback registries
//! - `formats` → binary snapshots of the base layer
//!
//! ## Architectural Constraints
//!
//! The cache:
//! - Is pure, synchronous, and single-threaded (no async, no network)
//! - Is deterministic: `BTreeMap`/`BTreeSet` everywhere, iteration order
//!   is part of the observable contract
//! - Never panics on bad data; mismatches warn once and degrade
//!   best-effort, fatal caller-contract violations return `CacheError`

// =============================================================================
// MODULES
// =============================================================================

pub mod ast;
pub mod data;
pub mod formats;
pub mod iterate;
pub mod keys;
pub mod operations;
pub mod schema;
pub mod store;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    CacheError, Dependencies, EntityKey, FieldKey, LayerKey, Link, Value, Warnings,
};

// =============================================================================
// RE-EXPORTS: Documents & Requests
// =============================================================================

pub use ast::{
    Document, Fragment, OperationKind, Request, Selection, SelectionSet, Variables, field,
    inline, spread,
};

// =============================================================================
// RE-EXPORTS: Store Engine
// =============================================================================

pub use data::{InMemoryData, OpContext};
pub use keys::{key_of_entity, key_of_field};
pub use operations::{QueryResult, WriteResult};
pub use schema::{Schema, SchemaField, SchemaPredicates, TypeKind};
pub use store::{
    CacheApi, CacheConfig, EntityArg, FieldInfo, FieldInspection, OptimisticFn, ResolverFn,
    Store, UpdaterFn,
};

// =============================================================================
// RE-EXPORTS: Formats (from formats module)
// =============================================================================

pub use formats::{SnapshotHeader, read_snapshot, write_snapshot};

//! # Cache Integration Tests
//!
//! End-to-end scenarios through the public [`Store`] surface: writes,
//! reads, optimistic flows, invalidation, and snapshots.

use stratus_core::ast::{Directive, Document, Fragment, Request, field, inline, spread};
use stratus_core::{
    CacheConfig, EntityArg, EntityKey, LayerKey, Schema, SchemaField, Store, Value,
};

// =============================================================================
// HELPERS
// =============================================================================

fn todo(id: &str, text: &str) -> Value {
    Value::object([
        ("__typename", Value::from("Todo")),
        ("id", Value::from(id)),
        ("text", Value::from(text)),
    ])
}

fn todo_selection() -> Vec<stratus_core::Selection> {
    vec![
        field("__typename").into(),
        field("id").into(),
        field("text").into(),
    ]
}

fn todos_request() -> Request {
    Request::new(Document::query([
        field("todos").select(todo_selection()).into(),
    ]))
}

// =============================================================================
// WRITES & READS
// =============================================================================

#[test]
fn nested_entities_with_aliases_and_fragments() {
    let document = Document::query([field("todos")
        .select([
            field("__typename").into(),
            field("id").into(),
            spread("todoFields"),
            field("author")
                .select([
                    field("__typename").into(),
                    field("id").into(),
                    field("name").aliased("displayName").into(),
                ])
                .into(),
        ])
        .into()])
    .with_fragment(Fragment::new("todoFields", "Todo", [field("text").into()]));
    let request = Request::new(document);

    let response = Value::object([(
        "todos",
        Value::list([Value::object([
            ("__typename", Value::from("Todo")),
            ("id", Value::from("1")),
            ("text", Value::from("Go")),
            (
                "author",
                Value::object([
                    ("__typename", Value::from("Author")),
                    ("id", Value::from("a1")),
                    ("displayName", Value::from("Ada")),
                ]),
            ),
        ])]),
    )]);

    let mut store = Store::new();
    let written = store.write(&request, &response).expect("write");
    assert!(written.dependencies.contains("Query.todos"));
    assert!(written.dependencies.contains("Todo:1"));
    assert!(written.dependencies.contains("Author:a1"));

    let result = store.query(&request).expect("query");
    assert_eq!(result.data, Some(response));

    // The alias never leaks into storage; the field is keyed by name.
    let author = EntityArg::Key(EntityKey::new("Author:a1"));
    assert_eq!(store.resolve(&author, "name", None), Some(Value::from("Ada")));
}

#[test]
fn equivalent_argument_orders_share_one_field_key() {
    let write_request = Request::new(Document::query([field("todos")
        .arg("first", 10i64)
        .arg("after", "a")
        .select(todo_selection())
        .into()]));
    let read_request = Request::new(Document::query([field("todos")
        .arg("after", "a")
        .arg("first", 10i64)
        .select(todo_selection())
        .into()]));

    let response = Value::object([("todos", Value::list([todo("1", "Go")]))]);
    let mut store = Store::new();
    store.write(&write_request, &response).expect("write");

    let result = store.query(&read_request).expect("query");
    assert_eq!(result.data, Some(response));
}

#[test]
fn variables_resolve_into_field_keys() {
    let document = Document::query([field("todos")
        .var_arg("first", "limit")
        .select(todo_selection())
        .into()]);
    let request = Request::with_variables(
        document.clone(),
        [("limit".to_string(), Value::from(2i64))],
    );

    let response = Value::object([("todos", Value::list([todo("1", "Go")]))]);
    let mut store = Store::new();
    store.write(&request, &response).expect("write");

    // Same variables hit.
    assert!(store.query(&request).expect("query").data.is_some());

    // Different variables are a different field occurrence.
    let other = Request::with_variables(document, [("limit".to_string(), Value::from(3i64))]);
    assert_eq!(store.query(&other).expect("query").data, None);
}

#[test]
fn skip_directive_suppresses_selection() {
    let request = Request::new(Document::query([
        field("todos").select(todo_selection()).into(),
        field("hidden").directive(Directive::skip(true)).into(),
    ]));
    let response = Value::object([("todos", Value::list([todo("1", "Go")]))]);

    let mut store = Store::new();
    store.write(&request, &response).expect("write");

    // The skipped field is never read, so its absence is not a miss.
    let result = store.query(&request).expect("query");
    assert_eq!(result.data, Some(response));
}

#[test]
fn keyless_objects_embed_under_their_parent() {
    let request = Request::new(Document::query([field("settings")
        .select([field("__typename").into(), field("theme").into()])
        .into()]));
    let response = Value::object([(
        "settings",
        Value::object([
            ("__typename", Value::from("Settings")),
            ("theme", Value::from("dark")),
        ]),
    )]);

    let mut store = Store::new();
    store.write(&request, &response).expect("write");
    assert!(!store.warnings().is_empty());

    let result = store.query(&request).expect("query");
    assert_eq!(result.data, Some(response));

    let embedded = EntityArg::Key(EntityKey::new("Query.settings"));
    assert_eq!(
        store.resolve(&embedded, "theme", None),
        Some(Value::from("dark"))
    );
}

// =============================================================================
// MISS POLICY
// =============================================================================

#[test]
fn missing_field_without_schema_is_a_total_miss() {
    let write_request = todos_request();
    let response = Value::object([("todos", Value::list([todo("1", "Go")]))]);

    let mut store = Store::new();
    store.write(&write_request, &response).expect("write");

    let read_request = Request::new(Document::query([field("todos")
        .select([
            field("__typename").into(),
            field("id").into(),
            field("text").into(),
            field("done").into(),
        ])
        .into()]));
    let result = store.query(&read_request).expect("query");
    assert_eq!(result.data, None);
    assert!(!result.partial);
}

#[test]
fn schema_interface_fragments_match_members() {
    let schema = Schema::new()
        .object("Query", [("node", SchemaField::nullable())])
        .object("Todo", [
            ("id", SchemaField::required()),
            ("text", SchemaField::nullable()),
        ])
        .interface("Node", [("id", SchemaField::required())], ["Todo"]);
    let mut store = Store::with_config(CacheConfig::new().schema(schema));

    let request = Request::new(Document::query([field("node")
        .select([
            field("__typename").into(),
            inline("Node", [field("id").into()]),
            inline("Todo", [field("text").into()]),
        ])
        .into()]));
    let response = Value::object([("node", todo("1", "Go"))]);

    store.write(&request, &response).expect("write");
    let result = store.query(&request).expect("query");
    assert_eq!(result.data, Some(response));
    assert!(store.warnings().is_empty());
}

// =============================================================================
// OPTIMISTIC FLOW
// =============================================================================

#[test]
fn optimistic_mutation_commits_through_clear_and_rewrite() {
    let list_request = todos_request();
    let updater_request = todos_request();
    let config = CacheConfig::new()
        .optimistic("addTodo", |_info, _cache| todo("2", "Draft"))
        .updater("Mutation", "addTodo", move |value, _info, cache| {
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

    let base = Value::object([("todos", Value::list([todo("1", "Go")]))]);
    store.write(&list_request, &base).expect("write");

    let mutation = Request::new(Document::mutation([field("addTodo")
        .select(todo_selection())
        .into()]));

    // Optimistic phase: the overlay shows the draft immediately.
    store
        .write_optimistic(&mutation, LayerKey(9))
        .expect("optimistic");
    let optimistic = store.query(&list_request).expect("query").data;
    assert_eq!(
        optimistic,
        Some(Value::object([(
            "todos",
            Value::list([todo("1", "Go"), todo("2", "Draft")]),
        )]))
    );

    // Server response arrives: drop the overlay, write the real payload.
    store.clear_optimistic(LayerKey(9));
    let payload = Value::object([("addTodo", todo("2", "Ship"))]);
    store.write(&mutation, &payload).expect("mutation write");

    assert_eq!(store.layer_count(), 0);
    let settled = store.query(&list_request).expect("query").data;
    assert_eq!(
        settled,
        Some(Value::object([(
            "todos",
            Value::list([todo("1", "Go"), todo("2", "Ship")]),
        )]))
    );
}

// =============================================================================
// INVALIDATION & GC
// =============================================================================

#[test]
fn invalidation_cascades_to_orphaned_entities() {
    let document = Document::query([field("todos")
        .select([
            field("__typename").into(),
            field("id").into(),
            field("author")
                .select([
                    field("__typename").into(),
                    field("id").into(),
                    field("name").into(),
                ])
                .into(),
        ])
        .into()]);
    let request = Request::new(document);
    let response = Value::object([(
        "todos",
        Value::list([Value::object([
            ("__typename", Value::from("Todo")),
            ("id", Value::from("1")),
            (
                "author",
                Value::object([
                    ("__typename", Value::from("Author")),
                    ("id", Value::from("a1")),
                    ("name", Value::from("Ada")),
                ]),
            ),
        ])]),
    )]);

    let mut store = Store::new();
    store.write(&request, &response).expect("write");

    store.invalidate(&request).expect("invalidate");
    assert_eq!(store.query(&request).expect("query").data, None);

    let author = EntityArg::Key(EntityKey::new("Author:a1"));
    assert_eq!(store.resolve(&author, "name", None), None);
}

#[test]
fn shared_entities_survive_partial_invalidation() {
    let author_selection = |slot: i64, alias: &str| {
        field("author")
            .arg("slot", slot)
            .aliased(alias)
            .select([
                field("__typename").into(),
                field("id").into(),
                field("name").into(),
            ])
    };
    let request = Request::new(Document::query([
        author_selection(1, "a").into(),
        author_selection(2, "b").into(),
    ]));
    let author = Value::object([
        ("__typename", Value::from("Author")),
        ("id", Value::from("a1")),
        ("name", Value::from("Ada")),
    ]);
    let response = Value::object([("a", author.clone()), ("b", author)]);

    let mut store = Store::new();
    store.write(&request, &response).expect("write");

    let entity = EntityArg::Key(EntityKey::new("Author:a1"));
    let root = EntityKey::new("Query");
    let mut slot_one = std::collections::BTreeMap::new();
    slot_one.insert("slot".to_string(), Value::from(1i64));

    // Both occurrences link the same author; dropping one keeps it alive.
    store.invalidate_entity(&root, Some("author"), Some(&slot_one));
    assert_eq!(store.resolve(&entity, "name", None), Some(Value::from("Ada")));

    // Dropping every occurrence orphans it for collection.
    store.invalidate_entity(&root, Some("author"), None);
    assert_eq!(store.resolve(&entity, "name", None), None);
}

#[test]
fn replacing_a_list_collects_the_dropped_entities() {
    let request = todos_request();
    let mut store = Store::new();

    let both = Value::object([("todos", Value::list([todo("1", "Go"), todo("2", "Ship")]))]);
    store.write(&request, &both).expect("write");

    let only_first = Value::object([("todos", Value::list([todo("1", "Go")]))]);
    store.write(&request, &only_first).expect("write");

    assert_eq!(
        store.resolve(&EntityArg::Key(EntityKey::new("Todo:1")), "text", None),
        Some(Value::from("Go"))
    );
    assert_eq!(
        store.resolve(&EntityArg::Key(EntityKey::new("Todo:2")), "text", None),
        None
    );
}

// =============================================================================
// RESOLVERS
// =============================================================================

#[test]
fn connection_resolver_merges_pages() {
    let config = CacheConfig::new().resolver("Query", "todos", |info, cache| {
        let root = EntityArg::Key(info.parent_key.clone());
        let mut merged = Vec::new();
        for occurrence in cache.inspect_fields(&root) {
            if occurrence.field_name != "todos" {
                continue;
            }
            if let Some(Value::List(keys)) =
                cache.resolve(&root, "todos", occurrence.arguments.as_ref())
            {
                merged.extend(keys);
            }
        }
        Some(Value::List(merged))
    });
    let mut store = Store::with_config(config);

    let page = |n: i64| {
        Request::new(Document::query([field("todos")
            .arg("page", n)
            .select(todo_selection())
            .into()]))
    };
    let page_one = Value::object([("todos", Value::list([todo("1", "Go")]))]);
    let page_two = Value::object([("todos", Value::list([todo("2", "Ship")]))]);
    store.write(&page(1), &page_one).expect("write");
    store.write(&page(2), &page_two).expect("write");

    // Any page argument now reads the merged list.
    let result = store.query(&page(3)).expect("query").data;
    assert_eq!(
        result,
        Some(Value::object([(
            "todos",
            Value::list([todo("1", "Go"), todo("2", "Ship")]),
        )]))
    );
}

// =============================================================================
// SNAPSHOTS
// =============================================================================

#[test]
fn snapshot_hydrates_into_a_fresh_store() {
    let request = todos_request();
    let response = Value::object([("todos", Value::list([todo("1", "Go")]))]);

    let mut store = Store::new();
    store.write(&request, &response).expect("write");
    let bytes = store.snapshot().expect("snapshot");

    let mut fresh = Store::new();
    fresh.hydrate(&bytes).expect("hydrate");
    let result = fresh.query(&request).expect("query");
    assert_eq!(result.data, Some(response));
}

// Integration tests for the reconciliation engine: idempotent redeploys,
// tenant isolation, orphan deletion, resolution failures, and the
// explicit-primary-key batch mode

mod common;

use common::{count_rows, setup_store};
use mosaic_core::{
    FieldMetadata, ForeignKey, Lookup, MosaicError, Record, SchemaRegistry, TableMetadata, Value,
    ValueKind,
};
use mosaic_store::{FilterOptions, Store};
use rusqlite::Connection;

fn t1() -> Value {
    Value::Text("t1".to_string())
}

fn t2() -> Value {
    Value::Text("t2".to_string())
}

#[test]
fn test_redeploy_is_idempotent() {
    let mut store = setup_store();
    let tenant = t1();
    let batch = vec![Record::new()
        .with("sku", "w-1")
        .with("name", "widget")
        .with_child("variants", Record::new().with("label", "S"))
        .with_child("variants", Record::new().with("label", "L"))];

    let first = store.deploy("Product", &batch, Some(&tenant)).unwrap();
    assert_eq!(first.inserted, 3);
    assert_eq!(first.updated, 0);

    let second = store.deploy("Product", &batch, Some(&tenant)).unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.updated, 3);
    assert_eq!(second.deleted, 0);

    // zero net row-count change after the second call
    assert_eq!(count_rows(&store, "products"), 1);
    assert_eq!(count_rows(&store, "variants"), 2);
}

#[test]
fn test_insert_then_update_references_generated_id() {
    let mut store = setup_store();
    let tenant = t1();

    store
        .deploy(
            "Product",
            &[Record::new().with("sku", "pops")],
            Some(&tenant),
        )
        .unwrap();
    let first_id: i64 = store
        .connection()
        .query_row("SELECT id FROM products WHERE sku = 'pops'", [], |r| r.get(0))
        .unwrap();

    store
        .deploy(
            "Product",
            &[Record::new().with("sku", "pops").with("name", "renamed")],
            Some(&tenant),
        )
        .unwrap();
    let (second_id, name): (i64, String) = store
        .connection()
        .query_row(
            "SELECT id, name FROM products WHERE sku = 'pops'",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .unwrap();

    assert_eq!(second_id, first_id);
    assert_eq!(name, "renamed");
    assert_eq!(count_rows(&store, "products"), 1);
}

#[test]
fn test_tenant_isolation() {
    let mut store = setup_store();

    store
        .deploy("Product", &[Record::new().with("sku", "pops")], Some(&t1()))
        .unwrap();

    // the second tenant cannot see the first tenant's row
    let visible = store
        .filter("Product", None, &FilterOptions::new(), Some(&t2()))
        .unwrap();
    assert!(visible.is_empty());

    // deploying the same business key under the second tenant inserts a
    // second, distinct row
    let report = store
        .deploy("Product", &[Record::new().with("sku", "pops")], Some(&t2()))
        .unwrap();
    assert_eq!(report.inserted, 1);
    assert_eq!(count_rows(&store, "products"), 2);

    // nor can the second tenant delete across the boundary
    let deleted = store
        .delete_model("Product", &Record::new().with("sku", "pops"), Some(&t2()))
        .unwrap();
    assert_eq!(deleted, 1);
    let survivors = store
        .filter("Product", None, &FilterOptions::new(), Some(&t1()))
        .unwrap();
    assert_eq!(survivors.len(), 1);
}

#[test]
fn test_delete_orphans_removes_missing_children() {
    let mut store = setup_store();
    let tenant = t1();

    store
        .deploy(
            "Product",
            &[Record::new()
                .with("sku", "w-1")
                .with_child("variants", Record::new().with("label", "A").with("position", 1i64))
                .with_child("variants", Record::new().with("label", "B").with("position", 2i64))],
            Some(&tenant),
        )
        .unwrap();
    assert_eq!(count_rows(&store, "variants"), 2);

    let report = store
        .deploy(
            "Product",
            &[Record::new()
                .with("sku", "w-1")
                .with_child("variants", Record::new().with("label", "A").with("position", 9i64))],
            Some(&tenant),
        )
        .unwrap();

    // B deleted, A updated, nothing inserted
    assert_eq!(report.deleted, 1);
    assert_eq!(report.inserted, 0);
    assert_eq!(report.updated, 2); // parent + surviving child
    assert_eq!(count_rows(&store, "variants"), 1);

    let (label, position): (String, i64) = store
        .connection()
        .query_row("SELECT label, position FROM variants", [], |r| {
            Ok((r.get(0)?, r.get(1)?))
        })
        .unwrap();
    assert_eq!(label, "A");
    assert_eq!(position, 9);
}

#[test]
fn test_required_unresolved_relation_commits_nothing() {
    fn setup() -> Store {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE depots (id INTEGER PRIMARY KEY, code TEXT);
             CREATE TABLE shipments (id INTEGER PRIMARY KEY, ref_no TEXT, depot_id INTEGER);",
        )
        .unwrap();
        let mut registry = SchemaRegistry::new();
        registry
            .register(
                TableMetadata::new("Depot", "depots")
                    .with_field(FieldMetadata::new("id", "id", ValueKind::Int).with_primary_key())
                    .with_field(FieldMetadata::new("code", "code", ValueKind::Text))
                    .with_lookup(Lookup::new("depots", "code", "code")),
            )
            .unwrap();
        registry
            .register(
                TableMetadata::new("Shipment", "shipments")
                    .with_field(FieldMetadata::new("id", "id", ValueKind::Int).with_primary_key())
                    .with_field(FieldMetadata::new("ref_no", "ref_no", ValueKind::Text))
                    .with_field(
                        FieldMetadata::new("depot_id", "depot_id", ValueKind::Int)
                            .with_foreign_key("Depot"),
                    )
                    .with_lookup(Lookup::new("shipments", "ref_no", "ref_no"))
                    .with_foreign_key(
                        ForeignKey::new("depot_id", "depot_id", "Depot", "depot")
                            .with_required()
                            .with_needs_lookup(),
                    ),
            )
            .unwrap();
        Store::new(conn, registry)
    }

    let mut store = setup();
    let batch = vec![
        Record::new().with("ref_no", "s-1"),
        Record::new()
            .with("ref_no", "s-2")
            .with_related("depot", Record::new().with("code", "nowhere")),
    ];
    let err = store.deploy("Shipment", &batch, None).unwrap_err();
    assert!(matches!(err, MosaicError::UnresolvedRelation { .. }));
    assert_eq!(err.code(), "ERR_RESOLUTION");

    // the transaction rolled back: no partial batch committed
    assert_eq!(count_rows(&store, "shipments"), 0);
}

#[test]
fn test_explicit_pk_switches_whole_batch() {
    let mut store = setup_store();
    let tenant = t1();

    store
        .deploy(
            "Product",
            &[Record::new().with("sku", "w-1").with("name", "original")],
            Some(&tenant),
        )
        .unwrap();
    let id: i64 = store
        .connection()
        .query_row("SELECT id FROM products", [], |r| r.get(0))
        .unwrap();

    // one explicit key puts the whole batch in primary-key-only mode:
    // the keyed entity updates, the keyless one composes no key and inserts
    // even though its sku already exists
    let report = store
        .deploy(
            "Product",
            &[
                Record::new().with("id", id).with("sku", "w-1").with("name", "renamed"),
                Record::new().with("sku", "w-1").with("name", "shadow"),
            ],
            Some(&tenant),
        )
        .unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(report.inserted, 1);
    assert_eq!(count_rows(&store, "products"), 2);

    let renamed: String = store
        .connection()
        .query_row("SELECT name FROM products WHERE id = ?1", [id], |r| r.get(0))
        .unwrap();
    assert_eq!(renamed, "renamed");
}

#[test]
fn test_update_never_touches_created_audit() {
    let mut store = setup_store();
    let tenant = t1();

    store
        .deploy("Product", &[Record::new().with("sku", "w-1")], Some(&tenant))
        .unwrap();
    let created: i64 = store
        .connection()
        .query_row("SELECT created_at FROM products", [], |r| r.get(0))
        .unwrap();

    store
        .connection()
        .execute("UPDATE products SET created_at = created_at - 5000", [])
        .unwrap();
    store
        .deploy("Product", &[Record::new().with("sku", "w-1")], Some(&tenant))
        .unwrap();

    let after: i64 = store
        .connection()
        .query_row("SELECT created_at FROM products", [], |r| r.get(0))
        .unwrap();
    assert_eq!(after, created - 5000);
}

#[test]
fn test_keyed_children_stamp_key_and_value_mappings() {
    fn setup() -> Store {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE configs (id INTEGER PRIMARY KEY, name TEXT, env TEXT);
             CREATE TABLE settings (id INTEGER PRIMARY KEY, config_id INTEGER, key TEXT, env TEXT, value TEXT);",
        )
        .unwrap();
        let mut registry = SchemaRegistry::new();
        registry
            .register(
                TableMetadata::new("Config", "configs")
                    .with_field(FieldMetadata::new("id", "id", ValueKind::Int).with_primary_key())
                    .with_field(FieldMetadata::new("name", "name", ValueKind::Text))
                    .with_field(FieldMetadata::new("env", "env", ValueKind::Text))
                    .with_lookup(Lookup::new("configs", "name", "name"))
                    .with_child(
                        mosaic_core::Child::new("settings", "Setting", "config_id")
                            .keyed_by("key")
                            .with_value_mapping("env", "env"),
                    ),
            )
            .unwrap();
        registry
            .register(
                TableMetadata::new("Setting", "settings")
                    .with_field(FieldMetadata::new("id", "id", ValueKind::Int).with_primary_key())
                    .with_field(FieldMetadata::new("config_id", "config_id", ValueKind::Int))
                    .with_field(FieldMetadata::new("key", "key", ValueKind::Text))
                    .with_field(FieldMetadata::new("env", "env", ValueKind::Text))
                    .with_field(FieldMetadata::new("value", "value", ValueKind::Text))
                    .with_lookup(Lookup::new("settings", "config_id", "config_id"))
                    .with_lookup(Lookup::new("settings", "key", "key")),
            )
            .unwrap();
        Store::new(conn, registry)
    }

    let mut store = setup();
    let config = Record::new()
        .with("name", "primary")
        .with("env", "prod")
        .with_keyed_child("settings", "timeout", Record::new().with("value", "30"))
        .with_keyed_child("settings", "retries", Record::new().with("value", "5"));
    let report = store.deploy("Config", &[config], None).unwrap();
    assert_eq!(report.inserted, 3);

    // the map key and the parent's env were stamped onto each child row
    let (key, env): (String, String) = store
        .connection()
        .query_row(
            "SELECT key, env FROM settings WHERE value = '30'",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .unwrap();
    assert_eq!(key, "timeout");
    assert_eq!(env, "prod");

    // hydration recovers the map key on each child entry
    let found = store
        .filter(
            "Config",
            None,
            &FilterOptions::new().with_association("settings"),
            None,
        )
        .unwrap();
    let entries = found[0].children("settings");
    assert_eq!(entries.len(), 2);
    let mut keys: Vec<&str> = entries.iter().filter_map(|e| e.key.as_deref()).collect();
    keys.sort_unstable();
    assert_eq!(keys, vec!["retries", "timeout"]);
}

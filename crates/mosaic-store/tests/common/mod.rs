// Shared fixtures: a product catalog schema with tenancy, lookups,
// a lookup-resolved relation, encrypted/JSON columns, and a child
// collection with orphan deletion

#![allow(dead_code)]

use mosaic_core::codec::Cipher;
use mosaic_core::{
    AuditRole, Child, FieldMetadata, ForeignKey, Lookup, Result, SchemaRegistry, TableMetadata,
    ValueKind,
};
use mosaic_store::Store;
use rusqlite::Connection;

/// Reversible toy cipher so tests can observe encrypt/decrypt actually ran
pub struct XorCipher(pub u8);

impl Cipher for XorCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        Ok(plaintext.iter().map(|b| b ^ self.0).collect())
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        Ok(ciphertext.iter().map(|b| b ^ self.0).collect())
    }
}

pub fn registry() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();
    registry
        .register(
            TableMetadata::new("Category", "categories")
                .with_field(FieldMetadata::new("id", "id", ValueKind::Int).with_primary_key())
                .with_field(FieldMetadata::new("org", "org_id", ValueKind::Text).with_tenant_key())
                .with_field(FieldMetadata::new("name", "name", ValueKind::Text))
                .with_field(
                    FieldMetadata::new("created_at", "created_at", ValueKind::Timestamp)
                        .with_audit(AuditRole::CreatedAt),
                )
                .with_field(
                    FieldMetadata::new("updated_at", "updated_at", ValueKind::Timestamp)
                        .with_audit(AuditRole::UpdatedAt),
                )
                .with_lookup(Lookup::new("categories", "name", "name")),
        )
        .unwrap();
    registry
        .register(
            TableMetadata::new("Product", "products")
                .with_field(FieldMetadata::new("id", "id", ValueKind::Int).with_primary_key())
                .with_field(FieldMetadata::new("org", "org_id", ValueKind::Text).with_tenant_key())
                .with_field(FieldMetadata::new("sku", "sku", ValueKind::Text))
                .with_field(FieldMetadata::new("name", "name", ValueKind::Text))
                .with_field(FieldMetadata::new("price", "price", ValueKind::Float))
                .with_field(FieldMetadata::new("attrs", "attrs", ValueKind::Json).with_json())
                .with_field(
                    FieldMetadata::new("secret", "secret", ValueKind::Text).with_encrypted(),
                )
                .with_field(
                    FieldMetadata::new("category_id", "category_id", ValueKind::Int)
                        .with_foreign_key("Category"),
                )
                .with_field(
                    FieldMetadata::new("created_at", "created_at", ValueKind::Timestamp)
                        .with_audit(AuditRole::CreatedAt),
                )
                .with_field(
                    FieldMetadata::new("updated_at", "updated_at", ValueKind::Timestamp)
                        .with_audit(AuditRole::UpdatedAt),
                )
                .with_lookup(Lookup::new("products", "sku", "sku"))
                .with_foreign_key(
                    ForeignKey::new("category_id", "category_id", "Category", "category")
                        .with_needs_lookup(),
                )
                .with_child(
                    Child::new("variants", "Variant", "product_id").with_delete_orphans(),
                ),
        )
        .unwrap();
    registry
        .register(
            TableMetadata::new("Variant", "variants")
                .with_field(FieldMetadata::new("id", "id", ValueKind::Int).with_primary_key())
                .with_field(FieldMetadata::new("org", "org_id", ValueKind::Text).with_tenant_key())
                .with_field(FieldMetadata::new("product_id", "product_id", ValueKind::Int))
                .with_field(FieldMetadata::new("label", "label", ValueKind::Text))
                .with_field(FieldMetadata::new("position", "position", ValueKind::Int))
                .with_lookup(Lookup::new("variants", "product_id", "product_id"))
                .with_lookup(Lookup::new("variants", "label", "label")),
        )
        .unwrap();
    registry
}

pub fn setup_test_db() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "CREATE TABLE categories (
            id INTEGER PRIMARY KEY,
            org_id TEXT,
            name TEXT,
            created_at INTEGER,
            updated_at INTEGER
        );
        CREATE TABLE products (
            id INTEGER PRIMARY KEY,
            org_id TEXT,
            sku TEXT,
            name TEXT,
            price REAL,
            attrs TEXT,
            secret TEXT,
            category_id INTEGER,
            created_at INTEGER,
            updated_at INTEGER
        );
        CREATE TABLE variants (
            id INTEGER PRIMARY KEY,
            org_id TEXT,
            product_id INTEGER,
            label TEXT,
            position INTEGER
        );",
    )
    .unwrap();
    conn
}

pub fn setup_store() -> Store {
    Store::new(setup_test_db(), registry()).with_cipher(Box::new(XorCipher(0x2a)))
}

/// Count rows in a table through the store's connection
pub fn count_rows(store: &Store, table: &str) -> i64 {
    store
        .connection()
        .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
        .unwrap()
}

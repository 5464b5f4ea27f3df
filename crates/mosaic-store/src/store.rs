//! Store facade
//!
//! The public read/write API over one connection: filtered reads with
//! association loading, transactional batch deploys, and typed wrappers
//! over the `Model` seam.

#![allow(clippy::result_large_err)]

use rusqlite::Connection;

use mosaic_core::{Cipher, Model, MosaicError, NoopCipher, Record, SchemaRegistry, Value};

use crate::builder::{build_query, Associations, FilterOptions};
use crate::deploy::{DeployPass, DeployReport};
use crate::errors::{from_rusqlite, Result};
use crate::hydrate::{hydrate_rows, merge_children};
use crate::lookup::DEFAULT_SEPARATOR;
use crate::sql::{run_select, Predicate};

/// Metadata-driven store over one SQLite connection
///
/// Reads need no transaction; every write call (deploys included, cascades
/// and all) runs inside a single transaction and rolls back entirely on
/// any error.
pub struct Store {
    conn: Connection,
    registry: SchemaRegistry,
    cipher: Box<dyn Cipher>,
    separator: String,
}

impl Store {
    /// Create a store over a connection and a built registry
    pub fn new(conn: Connection, registry: SchemaRegistry) -> Self {
        Self {
            conn,
            registry,
            cipher: Box::new(NoopCipher),
            separator: DEFAULT_SEPARATOR.to_string(),
        }
    }

    /// Install a field-level cipher
    pub fn with_cipher(mut self, cipher: Box<dyn Cipher>) -> Self {
        self.cipher = cipher;
        self
    }

    /// Use a different composite-key separator
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// The schema registry in use
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// The underlying connection, for callers composing their own reads
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    // ===== Read API =====

    /// Query a type, hydrating nested relations and requested child
    /// collections
    pub fn filter(
        &self,
        type_name: &str,
        filter: Option<&Record>,
        options: &FilterOptions,
        tenant: Option<&Value>,
    ) -> Result<Vec<Record>> {
        let built = build_query(&self.registry, type_name, filter, options, tenant)?;
        let rows = run_select(&self.conn, &built.select_spec())?;
        let mut records = hydrate_rows(
            &self.registry,
            type_name,
            &rows,
            &built.descriptors,
            self.cipher.as_ref(),
        )?;
        self.load_children(type_name, &mut records, &options.associations, tenant)?;
        Ok(records)
    }

    /// Typed wrapper over `filter`
    pub fn filter_models<M: Model>(
        &self,
        filter: Option<&Record>,
        options: &FilterOptions,
        tenant: Option<&Value>,
    ) -> Result<Vec<M>> {
        let type_name = M::table_metadata().type_name;
        self.filter(&type_name, filter, options, tenant)?
            .iter()
            .map(M::from_record)
            .collect()
    }

    /// Child collections load via a second query per parent batch, scoped
    /// by the parents' primary keys, never joined into the parent query
    fn load_children(
        &self,
        type_name: &str,
        parents: &mut [Record],
        associations: &Associations,
        tenant: Option<&Value>,
    ) -> Result<()> {
        if parents.is_empty() {
            return Ok(());
        }
        let meta = self.registry.get(type_name)?;
        for child in &meta.children {
            if !associations.contains(&child.field) {
                continue;
            }
            let parent_pk =
                meta.primary_key_field()
                    .ok_or_else(|| MosaicError::MissingPrimaryKey {
                        type_name: meta.type_name.clone(),
                        context: format!("child collection '{}'", child.field),
                    })?;
            let parent_keys: Vec<Value> = parents
                .iter()
                .filter_map(|p| p.get(&parent_pk.field))
                .filter(|v| !v.is_empty())
                .cloned()
                .collect();
            if parent_keys.is_empty() {
                continue;
            }

            let child_meta = self.registry.get(&child.element_type)?;
            let parent_column = child_meta
                .column_for(&child.parent_key_field)
                .ok_or_else(|| MosaicError::UnknownField {
                    type_name: child.element_type.clone(),
                    field: child.parent_key_field.clone(),
                })?;

            let child_options = FilterOptions {
                associations: associations.child(&child.field),
                ..Default::default()
            };
            let built = build_query(
                &self.registry,
                &child.element_type,
                None,
                &child_options,
                tenant,
            )?;
            let mut spec = built.select_spec();
            spec.predicates.push(Predicate::In {
                column: format!("t0.{}", parent_column),
                values: parent_keys,
            });
            let rows = run_select(&self.conn, &spec)?;
            let mut child_records = hydrate_rows(
                &self.registry,
                &child.element_type,
                &rows,
                &built.descriptors,
                self.cipher.as_ref(),
            )?;
            self.load_children(
                &child.element_type,
                &mut child_records,
                &child_options.associations,
                tenant,
            )?;
            merge_children(parents, meta, child, child_records)?;
        }
        Ok(())
    }

    // ===== Write API =====

    /// Reconcile one batch against storage inside a single transaction
    pub fn deploy(
        &mut self,
        type_name: &str,
        batch: &[Record],
        tenant: Option<&Value>,
    ) -> Result<DeployReport> {
        let tx = self.conn.transaction().map_err(from_rusqlite)?;
        let mut pass = DeployPass::new(
            &self.registry,
            self.cipher.as_ref(),
            &self.separator,
            tenant.cloned(),
        );
        let report = pass.run(&tx, type_name, batch)?;
        tx.commit().map_err(from_rusqlite)?;
        Ok(report)
    }

    /// Reconcile several batches inside one shared transaction
    pub fn deploy_multiple(
        &mut self,
        batches: &[(String, Vec<Record>)],
        tenant: Option<&Value>,
    ) -> Result<DeployReport> {
        let tx = self.conn.transaction().map_err(from_rusqlite)?;
        let mut pass = DeployPass::new(
            &self.registry,
            self.cipher.as_ref(),
            &self.separator,
            tenant.cloned(),
        );
        let mut report = DeployReport::default();
        for (type_name, batch) in batches {
            let sub = pass.run(&tx, type_name, batch)?;
            report.inserted += sub.inserted;
            report.updated += sub.updated;
            report.deleted += sub.deleted;
        }
        tx.commit().map_err(from_rusqlite)?;
        Ok(report)
    }

    /// Insert a typed entity without existence matching
    pub fn create_model<M: Model>(
        &mut self,
        entity: M,
        tenant: Option<&Value>,
    ) -> Result<DeployReport> {
        let type_name = M::table_metadata().type_name;
        let batch = vec![entity.into_record()];
        let tx = self.conn.transaction().map_err(from_rusqlite)?;
        let mut pass = DeployPass::new(
            &self.registry,
            self.cipher.as_ref(),
            &self.separator,
            tenant.cloned(),
        );
        let report = pass.run_inserts(&tx, &type_name, &batch)?;
        tx.commit().map_err(from_rusqlite)?;
        Ok(report)
    }

    /// Upsert a typed entity through lookup matching
    pub fn save_model<M: Model>(
        &mut self,
        entity: M,
        tenant: Option<&Value>,
    ) -> Result<DeployReport> {
        let type_name = M::table_metadata().type_name;
        let batch = vec![entity.into_record()];
        self.deploy(&type_name, &batch, tenant)
    }

    /// Delete rows matching a filter record, returning rows affected
    pub fn delete_model(
        &mut self,
        type_name: &str,
        filter: &Record,
        tenant: Option<&Value>,
    ) -> Result<usize> {
        let tx = self.conn.transaction().map_err(from_rusqlite)?;
        let mut pass = DeployPass::new(
            &self.registry,
            self.cipher.as_ref(),
            &self.separator,
            tenant.cloned(),
        );
        let deleted = pass.run_delete_filter(&tx, type_name, filter)?;
        tx.commit().map_err(from_rusqlite)?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mosaic_core::{FieldMetadata, TableMetadata, ValueKind};

    fn setup_store() -> Store {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE widgets (id INTEGER PRIMARY KEY, org_id TEXT, name TEXT)",
        )
        .unwrap();
        let mut registry = SchemaRegistry::new();
        registry
            .register(
                TableMetadata::new("Widget", "widgets")
                    .with_field(FieldMetadata::new("id", "id", ValueKind::Int).with_primary_key())
                    .with_field(
                        FieldMetadata::new("org", "org_id", ValueKind::Text).with_tenant_key(),
                    )
                    .with_field(FieldMetadata::new("name", "name", ValueKind::Text))
                    .with_lookup(mosaic_core::Lookup::new("widgets", "name", "name")),
            )
            .unwrap();
        Store::new(conn, registry)
    }

    #[test]
    fn test_deploy_then_filter() {
        let mut store = setup_store();
        let tenant = Value::Text("t1".to_string());
        let batch = vec![Record::new().with("name", "pops")];
        let report = store.deploy("Widget", &batch, Some(&tenant)).unwrap();
        assert_eq!(report.inserted, 1);

        let found = store
            .filter("Widget", None, &FilterOptions::new(), Some(&tenant))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get("name"), Some(&Value::Text("pops".to_string())));
        assert!(found[0].has_value("id"));
    }

    #[test]
    fn test_delete_model_returns_rows_affected() {
        let mut store = setup_store();
        let tenant = Value::Text("t1".to_string());
        store
            .deploy(
                "Widget",
                &[
                    Record::new().with("name", "a"),
                    Record::new().with("name", "b"),
                ],
                Some(&tenant),
            )
            .unwrap();

        let deleted = store
            .delete_model("Widget", &Record::new().with("name", "a"), Some(&tenant))
            .unwrap();
        assert_eq!(deleted, 1);

        let remaining = store
            .filter("Widget", None, &FilterOptions::new(), Some(&tenant))
            .unwrap();
        assert_eq!(remaining.len(), 1);
    }

    #[test]
    fn test_failed_deploy_rolls_back_everything() {
        fn reject_b(record: &Record) -> std::result::Result<(), String> {
            if record.get("name") == Some(&Value::Text("b".to_string())) {
                Err("name 'b' is not allowed".to_string())
            } else {
                Ok(())
            }
        }
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE widgets (id INTEGER PRIMARY KEY, org_id TEXT, name TEXT)")
            .unwrap();
        let mut registry = SchemaRegistry::new();
        registry
            .register(
                TableMetadata::new("Widget", "widgets")
                    .with_field(FieldMetadata::new("id", "id", ValueKind::Int).with_primary_key())
                    .with_field(
                        FieldMetadata::new("org", "org_id", ValueKind::Text).with_tenant_key(),
                    )
                    .with_field(FieldMetadata::new("name", "name", ValueKind::Text))
                    .with_lookup(mosaic_core::Lookup::new("widgets", "name", "name"))
                    .with_validator(reject_b),
            )
            .unwrap();
        let mut store = Store::new(conn, registry);

        let tenant = Value::Text("t1".to_string());
        let err = store
            .deploy(
                "Widget",
                &[
                    Record::new().with("name", "a"),
                    Record::new().with("name", "b"),
                ],
                Some(&tenant),
            )
            .unwrap_err();
        assert!(matches!(err, MosaicError::Validation { .. }));

        let found = store
            .filter("Widget", None, &FilterOptions::new(), Some(&tenant))
            .unwrap();
        assert!(found.is_empty());
    }
}

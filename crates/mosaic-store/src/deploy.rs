//! Reconciliation engine
//!
//! Matches an in-memory batch against storage via composite lookup keys,
//! classifies inserts/updates/deletes, executes them, and cascades into
//! child collections. One pass per top-level call; every statement of the
//! pass runs inside the caller's transaction.

#![allow(clippy::result_large_err)]

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{debug, info, warn};

use mosaic_core::codec::{encode_transport, marshal, Cipher};
use mosaic_core::{
    AuditRole, ChildKind, FieldMetadata, Lookup, MosaicError, Record, SchemaRegistry,
    TableMetadata, Value,
};

use crate::errors::Result;
use crate::lookup::{effective_lookups, LookupResolver};
use crate::sql::{run_delete, run_insert, run_update, DeleteSpec, InsertSpec, Predicate, UpdateSpec};

/// Inserts are batched into multi-row statements of at most this many rows;
/// chunking bounds statement size and never splits the transaction
const INSERT_CHUNK: usize = 100;

/// Classification of one row change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One classified change, carrying a back-reference to the entity it was
/// classified from so child collections can be cascaded once the primary
/// key is known
#[derive(Debug, Clone)]
pub struct Change {
    pub kind: ChangeKind,
    /// Column -> typed value; transport encoding happens at statement build
    pub values: BTreeMap<String, Value>,
    /// Index of the originating entity in the batch
    pub entity: usize,
    /// Composite lookup key, when the entity was matchable
    pub key: Option<String>,
    /// Stored primary key: carried over for updates, written back from
    /// RETURNING for inserts
    pub pk: Option<Value>,
}

/// The classified changes for one batch
///
/// Deletes are predicate-scoped rather than per-row: the caller (or an
/// orphan cascade) supplies the filter, and the executed spec is recorded
/// here.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub inserts: Vec<Change>,
    pub updates: Vec<Change>,
    pub deletes: Vec<DeleteSpec>,
    /// An insert in this batch carried an explicit primary key; the insert
    /// column list then includes the primary-key column
    pub explicit_pk: bool,
}

/// Row counts produced by one deploy call, cascades included
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeployReport {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl DeployReport {
    fn absorb(&mut self, other: DeployReport) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.deleted += other.deleted;
    }
}

struct FkResolution {
    lookups: Vec<Lookup>,
    by_key: HashMap<String, Value>,
}

/// One reconciliation pass
///
/// Holds the per-call caches (join-alias cache, tenant value); never
/// shared across calls.
pub struct DeployPass<'a> {
    registry: &'a SchemaRegistry,
    cipher: &'a dyn Cipher,
    resolver: LookupResolver,
    tenant: Option<Value>,
}

impl<'a> DeployPass<'a> {
    pub fn new(
        registry: &'a SchemaRegistry,
        cipher: &'a dyn Cipher,
        separator: &str,
        tenant: Option<Value>,
    ) -> Self {
        Self {
            registry,
            cipher,
            resolver: LookupResolver::new().with_separator(separator),
            tenant,
        }
    }

    /// Reconcile a batch against storage, cascading into children
    pub fn run(&mut self, conn: &Connection, type_name: &str, batch: &[Record]) -> Result<DeployReport> {
        let report = self.deploy_batch(conn, type_name, batch, None, false)?;
        info!(
            type_name,
            inserted = report.inserted,
            updated = report.updated,
            deleted = report.deleted,
            "batch deployed"
        );
        Ok(report)
    }

    /// Insert a batch without existence matching (creation path); children
    /// still cascade through normal reconciliation
    pub fn run_inserts(
        &mut self,
        conn: &Connection,
        type_name: &str,
        batch: &[Record],
    ) -> Result<DeployReport> {
        self.deploy_batch(conn, type_name, batch, None, true)
    }

    /// Delete rows matching a caller-supplied filter, tenant-scoped
    pub fn run_delete_filter(
        &mut self,
        conn: &Connection,
        type_name: &str,
        filter: &Record,
    ) -> Result<usize> {
        let meta = self.registry.get(type_name)?;
        let mut predicates = Vec::new();
        for field in &meta.fields {
            if field.tenant_key {
                continue;
            }
            if let Some(value) = filter.get(&field.field) {
                if !value.is_empty() {
                    if field.encrypted {
                        return Err(MosaicError::EncryptedFilter {
                            type_name: meta.type_name.clone(),
                            field: field.field.clone(),
                        });
                    }
                    predicates.push(Predicate::Eq {
                        expr: field.column.clone(),
                        value: value.clone(),
                    });
                }
            }
        }
        self.push_tenant(meta, &mut predicates);
        run_delete(
            conn,
            &DeleteSpec {
                table: meta.table.clone(),
                predicates,
            },
        )
    }

    fn deploy_batch(
        &mut self,
        conn: &Connection,
        type_name: &str,
        batch: &[Record],
        delete_scope: Option<Vec<Predicate>>,
        force_insert: bool,
    ) -> Result<DeployReport> {
        let meta = self.registry.get(type_name)?;
        let mut report = DeployReport::default();
        if batch.is_empty() && delete_scope.is_none() {
            return Ok(report);
        }

        // a child cascade demands a primary key; fail before any query runs
        if !meta.children.is_empty() {
            meta.primary_key_field()
                .ok_or_else(|| MosaicError::MissingPrimaryKey {
                    type_name: meta.type_name.clone(),
                    context: "child cascade".to_string(),
                })?;
        }

        let refs: Vec<&Record> = batch.iter().collect();

        // gather the lookups usable for this batch
        let effective = effective_lookups(self.registry, meta, &refs)?;

        // resolve existing rows; unmatchable entities are excluded
        let keys: Vec<Option<String>> = refs
            .iter()
            .map(|r| self.resolver.compose(&effective.lookups, r))
            .collect();
        let existing = if force_insert {
            HashMap::new()
        } else {
            let mut distinct: Vec<String> = Vec::new();
            for key in keys.iter().flatten() {
                if !distinct.contains(key) {
                    distinct.push(key.clone());
                }
            }
            self.resolver.resolve(
                conn,
                self.registry,
                meta,
                &effective.lookups,
                &distinct,
                self.tenant.as_ref(),
            )?
        };
        let fk_maps = self.resolve_foreign(conn, meta, &refs)?;

        // classify changes
        let now = Utc::now();
        let mut set = ChangeSet {
            explicit_pk: effective.explicit_pk,
            ..Default::default()
        };
        for (index, record) in refs.iter().enumerate() {
            let key = keys[index].clone();
            let matched = key.as_ref().and_then(|k| existing.get(k)).cloned();
            let kind = if matched.is_some() {
                ChangeKind::Update
            } else {
                ChangeKind::Insert
            };
            if kind == ChangeKind::Insert {
                if let Some(validate) = meta.validate {
                    validate(record).map_err(|reason| MosaicError::Validation {
                        type_name: meta.type_name.clone(),
                        reason,
                    })?;
                }
            }
            let values =
                self.build_values(meta, record, kind, effective.explicit_pk, &fk_maps, &now)?;
            let change = Change {
                kind,
                values,
                entity: index,
                key,
                pk: matched,
            };
            match kind {
                ChangeKind::Update => set.updates.push(change),
                _ => set.inserts.push(change),
            }
        }
        debug!(
            type_name,
            inserts = set.inserts.len(),
            updates = set.updates.len(),
            "change set classified"
        );

        // execute: deletes first, anti-joined against rows being updated
        let update_pks: Vec<Value> = set.updates.iter().filter_map(|c| c.pk.clone()).collect();
        if let Some(scope) = delete_scope {
            let mut predicates = scope;
            if let Some(pk) = meta.primary_key_field() {
                predicates.push(Predicate::NotIn {
                    column: pk.column.clone(),
                    values: update_pks.clone(),
                });
            }
            self.push_tenant(meta, &mut predicates);
            set.deletes.push(DeleteSpec {
                table: meta.table.clone(),
                predicates,
            });
        }
        for spec in &set.deletes {
            report.deleted += run_delete(conn, spec)?;
        }

        // updates, one statement per row
        if !set.updates.is_empty() {
            let pk = meta
                .primary_key_field()
                .ok_or_else(|| MosaicError::MissingPrimaryKey {
                    type_name: meta.type_name.clone(),
                    context: "update execution".to_string(),
                })?;
            for change in &set.updates {
                let Some(pk_value) = change.pk.clone() else {
                    continue;
                };
                let mut assignments = Vec::with_capacity(change.values.len());
                for (column, value) in &change.values {
                    assignments.push((column.clone(), self.transport_value(meta, column, value)?));
                }
                if assignments.is_empty() {
                    continue;
                }
                let mut predicates = vec![Predicate::Eq {
                    expr: pk.column.clone(),
                    value: pk_value,
                }];
                self.push_tenant(meta, &mut predicates);
                report.updated += run_update(
                    conn,
                    &UpdateSpec {
                        table: meta.table.clone(),
                        assignments,
                        predicates,
                    },
                )?;
            }
        }

        // inserts, one multi-row statement per chunk, generated keys written
        // back in submission order
        let mut resolved_pks: Vec<Option<Value>> = vec![None; batch.len()];
        for change in &set.updates {
            resolved_pks[change.entity] = change.pk.clone();
        }
        if !set.inserts.is_empty() {
            let columns: Vec<String> = meta
                .fields
                .iter()
                .map(|f| f.column.clone())
                .filter(|c| set.inserts.iter().any(|ch| ch.values.contains_key(c)))
                .collect();
            let returning = meta.primary_key_field().map(|f| f.column.clone());
            for chunk in set.inserts.chunks(INSERT_CHUNK) {
                let mut rows = Vec::with_capacity(chunk.len());
                for change in chunk {
                    let mut row = Vec::with_capacity(columns.len());
                    for column in &columns {
                        let value = match change.values.get(column) {
                            Some(value) => self.transport_value(meta, column, value)?,
                            None => Value::Null,
                        };
                        row.push(value);
                    }
                    rows.push(row);
                }
                let returned = run_insert(
                    conn,
                    &InsertSpec {
                        table: meta.table.clone(),
                        columns: columns.clone(),
                        rows,
                        returning: returning.clone(),
                    },
                )?;
                for (offset, pk_value) in returned.into_iter().enumerate() {
                    resolved_pks[chunk[offset].entity] = Some(pk_value);
                }
                report.inserted += chunk.len();
            }
        }

        // cascade children inside the same transaction
        for child in &meta.children {
            let child_meta = self.registry.get(&child.element_type)?;
            let parent_column = child_meta
                .column_for(&child.parent_key_field)
                .ok_or_else(|| MosaicError::UnknownField {
                    type_name: child.element_type.clone(),
                    field: child.parent_key_field.clone(),
                })?
                .to_string();

            let mut child_batch: Vec<Record> = Vec::new();
            let mut orphan_parent_pks: Vec<Value> = Vec::new();
            for change in set.updates.iter().chain(set.inserts.iter()) {
                let parent = &batch[change.entity];
                let Some(parent_pk) = resolved_pks[change.entity].clone() else {
                    continue;
                };
                if child.delete_orphans && change.kind == ChangeKind::Update {
                    orphan_parent_pks.push(parent_pk.clone());
                }
                for entry in parent.children(&child.field) {
                    let mut record = entry.record.clone();
                    record.set(&child.parent_key_field, parent_pk.clone());
                    if child.kind == ChildKind::KeyedMap {
                        if let (Some(key_field), Some(key)) = (&child.key_mapping, &entry.key) {
                            record.set(key_field, Value::Text(key.clone()));
                        }
                    }
                    for (parent_field, child_field) in &child.value_mappings {
                        if let Some(value) = parent.get(parent_field) {
                            record.set(child_field, value.clone());
                        }
                    }
                    child_batch.push(record);
                }
            }

            let scope = if !orphan_parent_pks.is_empty() {
                Some(vec![Predicate::In {
                    column: parent_column,
                    values: orphan_parent_pks,
                }])
            } else {
                None
            };
            if child_batch.is_empty() && scope.is_none() {
                continue;
            }
            let sub = self.deploy_batch(conn, &child.element_type, &child_batch, scope, false)?;
            report.absorb(sub);
        }

        Ok(report)
    }

    /// Resolve the existence map for every required-or-lookup-needing
    /// relation of the batch
    fn resolve_foreign(
        &mut self,
        conn: &Connection,
        meta: &TableMetadata,
        refs: &[&Record],
    ) -> Result<HashMap<String, FkResolution>> {
        let mut maps = HashMap::new();
        for fk in &meta.foreign_keys {
            if !fk.required && !fk.needs_lookup {
                continue;
            }
            let related_meta = self.registry.get(&fk.related_type)?;
            let nested: Vec<&Record> = refs
                .iter()
                .filter_map(|r| r.related(&fk.related_field))
                .collect();
            if nested.is_empty() {
                continue;
            }
            let effective = effective_lookups(self.registry, related_meta, &nested)?;
            let mut nested_keys: Vec<String> = Vec::new();
            for record in &nested {
                if let Some(key) = self.resolver.compose(&effective.lookups, record) {
                    if !nested_keys.contains(&key) {
                        nested_keys.push(key);
                    }
                }
            }
            let by_key = self.resolver.resolve(
                conn,
                self.registry,
                related_meta,
                &effective.lookups,
                &nested_keys,
                self.tenant.as_ref(),
            )?;
            maps.insert(
                fk.field.clone(),
                FkResolution {
                    lookups: effective.lookups,
                    by_key,
                },
            );
        }
        Ok(maps)
    }

    /// Build the column -> value map for one classified entity
    ///
    /// Primary, tenant, and created-audit columns are never updated;
    /// encrypted and JSON values stay typed here and are encoded at
    /// statement build so validation sees originals.
    fn build_values(
        &self,
        meta: &TableMetadata,
        record: &Record,
        kind: ChangeKind,
        explicit_pk: bool,
        fk_maps: &HashMap<String, FkResolution>,
        now: &DateTime<Utc>,
    ) -> Result<BTreeMap<String, Value>> {
        let mut values = BTreeMap::new();
        let inserting = kind == ChangeKind::Insert;

        for field in &meta.fields {
            if field.primary_key {
                if inserting && explicit_pk {
                    if let Some(value) = record.get(&field.field) {
                        if !value.is_empty() {
                            values.insert(field.column.clone(), value.clone());
                        }
                    }
                }
                continue;
            }
            if field.tenant_key {
                if inserting {
                    let value = self
                        .tenant
                        .clone()
                        .or_else(|| record.get(&field.field).cloned());
                    if let Some(value) = value {
                        values.insert(field.column.clone(), value);
                    }
                }
                continue;
            }
            match field.audit {
                Some(AuditRole::CreatedAt) => {
                    if inserting {
                        values.insert(field.column.clone(), Value::Timestamp(*now));
                    }
                    continue;
                }
                Some(AuditRole::UpdatedAt) => {
                    values.insert(field.column.clone(), Value::Timestamp(*now));
                    continue;
                }
                Some(AuditRole::CreatedBy) => {
                    if inserting {
                        if let Some(value) = record.get(&field.field) {
                            values.insert(field.column.clone(), value.clone());
                        }
                    }
                    continue;
                }
                Some(AuditRole::UpdatedBy) => {
                    if let Some(value) = record.get(&field.field) {
                        values.insert(field.column.clone(), value.clone());
                    }
                    continue;
                }
                None => {}
            }
            if field.foreign_key {
                // relation key columns are resolved below
                continue;
            }
            if let Some(value) = record.get(&field.field) {
                values.insert(field.column.clone(), value.clone());
            }
        }

        for fk in &meta.foreign_keys {
            if !fk.needs_lookup {
                // fast path: the key value is already known
                if let Some(value) = record.get(&fk.field) {
                    if !value.is_empty() {
                        values.insert(fk.column.clone(), value.clone());
                        continue;
                    }
                }
            }
            let resolution = fk_maps.get(&fk.field);
            let nested_key = record
                .related(&fk.related_field)
                .zip(resolution)
                .and_then(|(nested, res)| self.resolver.compose(&res.lookups, nested));
            let resolved = nested_key
                .as_ref()
                .zip(resolution)
                .and_then(|(key, res)| res.by_key.get(key))
                .cloned();
            match resolved {
                Some(value) => {
                    values.insert(fk.column.clone(), value);
                }
                None if fk.required => {
                    return Err(MosaicError::UnresolvedRelation {
                        type_name: meta.type_name.clone(),
                        field: fk.field.clone(),
                        key: nested_key.unwrap_or_default(),
                    });
                }
                None => {
                    warn!(
                        type_name = %meta.type_name,
                        field = %fk.field,
                        "optional relation left unresolved"
                    );
                }
            }
        }

        Ok(values)
    }

    /// Encode a value for transport immediately before statement build
    fn transport_value(&self, meta: &TableMetadata, column: &str, value: &Value) -> Result<Value> {
        let Some(field) = meta.field_by_column(column) else {
            return Ok(value.clone());
        };
        if field.encrypted {
            return self.encrypt_value(field, value);
        }
        if field.json {
            if let Value::Json(document) = value {
                return Ok(Value::Text(marshal(&field.field, document)?));
            }
        }
        Ok(value.clone())
    }

    fn encrypt_value(&self, field: &FieldMetadata, value: &Value) -> Result<Value> {
        if value.is_empty() {
            return Ok(value.clone());
        }
        let plaintext = match value {
            Value::Text(s) => s.clone().into_bytes(),
            Value::Bytes(b) => b.clone(),
            other => other.key_form().into_bytes(),
        };
        let ciphertext = self.cipher.encrypt(&plaintext)?;
        Ok(Value::Text(encode_transport(&ciphertext)))
    }

    fn push_tenant(&self, meta: &TableMetadata, predicates: &mut Vec<Predicate>) {
        if let (Some(value), Some(field)) = (&self.tenant, meta.tenant_field()) {
            predicates.push(Predicate::Eq {
                expr: field.column.clone(),
                value: value.clone(),
            });
        }
    }
}

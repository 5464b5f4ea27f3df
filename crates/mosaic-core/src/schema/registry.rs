//! Explicit schema registry
//!
//! Built once ahead of time and passed into the engine; replaces any
//! implicit per-type metadata cache. Construction-once, read-many.

use std::collections::BTreeMap;

use crate::errors::{MosaicError, Result};
use crate::record::Model;
use crate::schema::table::TableMetadata;

/// Registry of table descriptions, keyed by type name
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    tables: BTreeMap<String, TableMetadata>,
}

impl SchemaRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table description
    ///
    /// Structural invariants are checked here so schema errors surface
    /// before any query runs.
    pub fn register(&mut self, meta: TableMetadata) -> Result<()> {
        if meta.table.is_empty() {
            return Err(MosaicError::MissingTableName {
                type_name: meta.type_name.clone(),
            });
        }
        if meta.fields.iter().filter(|f| f.primary_key).count() > 1 {
            return Err(MosaicError::MultiplePrimaryKeys {
                type_name: meta.type_name.clone(),
            });
        }
        if meta.fields.iter().filter(|f| f.tenant_key).count() > 1 {
            return Err(MosaicError::MultipleTenantKeys {
                type_name: meta.type_name.clone(),
            });
        }
        if self.tables.contains_key(&meta.type_name) {
            return Err(MosaicError::DuplicateType {
                type_name: meta.type_name.clone(),
            });
        }
        self.tables.insert(meta.type_name.clone(), meta);
        Ok(())
    }

    /// Register a typed model's table description
    pub fn register_model<M: Model>(&mut self) -> Result<()> {
        self.register(M::table_metadata())
    }

    /// Resolve a type name to its table description
    ///
    /// Absence is a configuration error, not an empty result.
    pub fn get(&self, type_name: &str) -> Result<&TableMetadata> {
        self.tables
            .get(type_name)
            .ok_or_else(|| MosaicError::UnknownType {
                type_name: type_name.to_string(),
            })
    }

    /// Check whether a type is registered
    pub fn contains(&self, type_name: &str) -> bool {
        self.tables.contains_key(type_name)
    }

    /// Iterate over registered type names
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(|k| k.as_str())
    }
}

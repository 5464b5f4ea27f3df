//! Lookup-key engine
//!
//! Composes deterministic composite keys from business-key lookups and
//! resolves them against storage, joining through chained foreign keys.
//! The composite key is the sole join surface between entities held in
//! memory and rows found in storage.

#![allow(clippy::result_large_err)]

use std::collections::HashMap;

use rusqlite::Connection;
use tracing::debug;

use mosaic_core::{Lookup, MosaicError, Record, SchemaRegistry, TableMetadata, Value};

use crate::errors::Result;
use crate::sql::{run_select, Predicate, SelectSpec};

/// Default composite-key separator
///
/// A separator character appearing inside a lookup value collides with the
/// composed key; the separator is configurable on the resolver for data
/// where `|` can occur.
pub const DEFAULT_SEPARATOR: &str = "|";

/// Keys are resolved in bounded slices to keep membership tests small
const KEY_CHUNK: usize = 100;

/// The lookup list in effect for one batch
///
/// `explicit_pk` is set when any entity in the batch carried a non-empty
/// primary key: the primary key then becomes the sole lookup for the whole
/// batch and business-key matching is skipped for every entity in it.
#[derive(Debug, Clone)]
pub struct EffectiveLookups {
    pub lookups: Vec<Lookup>,
    pub explicit_pk: bool,
}

/// Compose the deterministic composite key for one entity
///
/// Reads each lookup's match property off the record (following dotted
/// paths through nested related records) and joins the canonical string
/// forms with the separator. Returns `None` when every non-literal lookup
/// value is empty: such an entity has no matchable key and cannot be
/// existence-checked.
pub fn compose_key(lookups: &[Lookup], record: &Record, separator: &str) -> Option<String> {
    let mut parts = Vec::with_capacity(lookups.len());
    let mut matchable = false;
    for lookup in lookups {
        let part = match (&lookup.literal, record.get_path(&lookup.property)) {
            (Some(literal), _) => literal.key_form(),
            (None, Some(value)) => {
                if !value.is_empty() {
                    matchable = true;
                }
                value.key_form()
            }
            (None, None) => String::new(),
        };
        parts.push(part);
    }
    if matchable {
        Some(parts.join(separator))
    } else {
        None
    }
}

/// Determine the lookups usable for a batch
///
/// One explicit primary key anywhere in the batch switches the whole batch
/// to primary-key-only matching. Otherwise declared lookups apply first
/// (sub-lookups flattened in place), then lookups derived from foreign
/// keys whose values need business-key resolution, prefixed with the
/// relation path, in declaration order.
pub fn effective_lookups(
    registry: &SchemaRegistry,
    meta: &TableMetadata,
    batch: &[&Record],
) -> Result<EffectiveLookups> {
    if let Some(pk) = meta.primary_key_field() {
        let any_pk = batch.iter().any(|r| r.has_value(&pk.field));
        if any_pk {
            return Ok(EffectiveLookups {
                lookups: vec![Lookup::new(
                    meta.table.clone(),
                    pk.column.clone(),
                    pk.field.clone(),
                )],
                explicit_pk: true,
            });
        }
    }

    let mut lookups = Vec::new();
    collect_declared(&meta.lookups, &mut lookups);
    let mut visited = vec![meta.type_name.clone()];
    collect_foreign(registry, meta, "", &mut lookups, &mut visited)?;
    Ok(EffectiveLookups {
        lookups,
        explicit_pk: false,
    })
}

fn collect_declared(declared: &[Lookup], out: &mut Vec<Lookup>) {
    for lookup in declared {
        let mut flat = lookup.clone();
        flat.sub_lookups = Vec::new();
        out.push(flat);
        collect_declared(&lookup.sub_lookups, out);
    }
}

fn collect_foreign(
    registry: &SchemaRegistry,
    meta: &TableMetadata,
    prefix: &str,
    out: &mut Vec<Lookup>,
    visited: &mut Vec<String>,
) -> Result<()> {
    for fk in &meta.foreign_keys {
        if !fk.needs_lookup {
            continue;
        }
        // relation cycles terminate the walk
        if visited.contains(&fk.related_type) {
            continue;
        }
        visited.push(fk.related_type.clone());

        let related = registry.get(&fk.related_type)?;
        let path = if prefix.is_empty() {
            fk.related_field.clone()
        } else {
            format!("{}.{}", prefix, fk.related_field)
        };

        let mut declared = Vec::new();
        collect_declared(&related.lookups, &mut declared);
        for lookup in declared {
            out.push(prefixed(&lookup, &path));
        }
        collect_foreign(registry, related, &path, out, visited)?;
    }
    Ok(())
}

fn prefixed(lookup: &Lookup, path: &str) -> Lookup {
    Lookup {
        column: lookup.column.clone(),
        property: format!("{}.{}", path, lookup.property),
        table: lookup.table.clone(),
        join_key: if lookup.join_key.is_empty() {
            path.to_string()
        } else {
            format!("{}.{}", path, lookup.join_key)
        },
        literal: lookup.literal.clone(),
        sub_lookups: Vec::new(),
    }
}

/// Resolves composite keys against storage
///
/// Join aliases are cached per (base type, relation path) and reused
/// across the queries of a single reconciliation pass. Never shared
/// across calls.
pub struct LookupResolver {
    separator: String,
    aliases: HashMap<(String, String), String>,
    next_alias: usize,
}

impl Default for LookupResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl LookupResolver {
    /// Create a resolver with the default separator
    pub fn new() -> Self {
        Self {
            separator: DEFAULT_SEPARATOR.to_string(),
            aliases: HashMap::new(),
            next_alias: 1,
        }
    }

    /// Use a different composite-key separator
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// The separator in effect
    pub fn separator(&self) -> &str {
        &self.separator
    }

    /// Compose the key for one entity with this resolver's separator
    pub fn compose(&self, lookups: &[Lookup], record: &Record) -> Option<String> {
        compose_key(lookups, record, &self.separator)
    }

    /// Match in-memory composite keys against stored rows
    ///
    /// Builds one SELECT joining only the tables needed to reach every
    /// lookup column and matches the stored
    /// `COALESCE(CAST(col AS TEXT),'') || sep || ...` concatenation against
    /// the supplied keys. Returns key -> stored primary key.
    pub fn resolve(
        &mut self,
        conn: &Connection,
        registry: &SchemaRegistry,
        meta: &TableMetadata,
        lookups: &[Lookup],
        keys: &[String],
        tenant: Option<&Value>,
    ) -> Result<HashMap<String, Value>> {
        let mut matched = HashMap::new();
        if keys.is_empty() || lookups.is_empty() {
            return Ok(matched);
        }
        let pk = meta
            .primary_key_field()
            .ok_or_else(|| MosaicError::MissingPrimaryKey {
                type_name: meta.type_name.clone(),
                context: "lookup resolution".to_string(),
            })?;

        let mut spec = SelectSpec {
            from: format!("{} t0", meta.table),
            ..Default::default()
        };

        let mut joined_paths: Vec<String> = Vec::new();
        let mut parts = Vec::with_capacity(lookups.len());
        for lookup in lookups {
            let alias = self.ensure_joins(&mut spec, &mut joined_paths, registry, meta, &lookup.join_key)?;
            parts.push(format!("COALESCE(CAST({}.{} AS TEXT),'')", alias, lookup.column));
            if let Some(literal) = &lookup.literal {
                spec.predicates.push(Predicate::Eq {
                    expr: format!("{}.{}", alias, lookup.column),
                    value: literal.clone(),
                });
            }
        }

        let separator_literal = format!("'{}'", self.separator.replace('\'', "''"));
        let key_expr = parts.join(&format!(" || {} || ", separator_literal));
        spec.columns.push(format!("t0.{} AS pk", pk.column));
        spec.columns.push(format!("{} AS match_key", key_expr));

        if let (Some(value), Some(tenant_field)) = (tenant, meta.tenant_field()) {
            spec.predicates.push(Predicate::Eq {
                expr: format!("t0.{}", tenant_field.column),
                value: value.clone(),
            });
        }

        for chunk in keys.chunks(KEY_CHUNK) {
            let mut chunk_spec = spec.clone();
            chunk_spec.predicates.push(Predicate::InText {
                expr: key_expr.clone(),
                values: chunk.to_vec(),
            });
            for row in run_select(conn, &chunk_spec)? {
                if let (Some(Value::Text(key)), Some(pk_value)) =
                    (row.get("match_key"), row.get("pk"))
                {
                    matched.insert(key.clone(), pk_value.clone());
                }
            }
        }

        debug!(
            type_name = %meta.type_name,
            requested = keys.len(),
            matched = matched.len(),
            "lookup keys resolved"
        );
        Ok(matched)
    }

    /// Join the relation chain for a dotted path, returning the alias of
    /// the path's final table
    fn ensure_joins(
        &mut self,
        spec: &mut SelectSpec,
        joined_paths: &mut Vec<String>,
        registry: &SchemaRegistry,
        meta: &TableMetadata,
        join_key: &str,
    ) -> Result<String> {
        if join_key.is_empty() {
            return Ok("t0".to_string());
        }
        let mut current_meta = meta;
        let mut current_alias = "t0".to_string();
        let mut path = String::new();
        for segment in join_key.split('.') {
            path = if path.is_empty() {
                segment.to_string()
            } else {
                format!("{}.{}", path, segment)
            };
            let fk = current_meta
                .foreign_key_for_relation(segment)
                .ok_or_else(|| MosaicError::UnknownRelation {
                    type_name: current_meta.type_name.clone(),
                    segment: segment.to_string(),
                })?;
            let related = registry.get(&fk.related_type)?;
            let related_pk =
                related
                    .primary_key_field()
                    .ok_or_else(|| MosaicError::MissingPrimaryKey {
                        type_name: related.type_name.clone(),
                        context: format!("lookup join via '{}'", segment),
                    })?;

            let cache_key = (meta.type_name.clone(), path.clone());
            let alias = match self.aliases.get(&cache_key) {
                Some(alias) => alias.clone(),
                None => {
                    let alias = format!("t{}", self.next_alias);
                    self.next_alias += 1;
                    self.aliases.insert(cache_key, alias.clone());
                    alias
                }
            };
            if !joined_paths.contains(&path) {
                spec.joins.push(format!(
                    "LEFT JOIN {} {} ON {}.{} = {}.{}",
                    related.table, alias, current_alias, fk.column, alias, related_pk.column
                ));
                joined_paths.push(path.clone());
            }
            current_alias = alias;
            current_meta = related;
        }
        Ok(current_alias)
    }
}

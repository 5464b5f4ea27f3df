//! Query builder
//!
//! Turns a schema-annotated filter record plus a requested association tree
//! into an aliased table/join tree with per-alias column lists and
//! predicates, and a descriptor map for the hydrator.

#![allow(clippy::result_large_err)]

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use mosaic_core::{MosaicError, Record, SchemaRegistry, TableMetadata, Value};

use crate::errors::Result;
use crate::sql::{Predicate, SelectSpec};

/// Requested nested associations, keyed by relation or child field name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Associations(BTreeMap<String, Associations>);

impl Associations {
    /// Create an empty association tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree from dotted paths like `"category"` or
    /// `"category.owner"`
    pub fn from_paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut tree = Self::new();
        for path in paths {
            tree.add_path(path.as_ref());
        }
        tree
    }

    /// Add one dotted path to the tree
    pub fn add_path(&mut self, path: &str) {
        if path.is_empty() {
            return;
        }
        match path.split_once('.') {
            None => {
                self.0.entry(path.to_string()).or_default();
            }
            Some((head, rest)) => {
                self.0.entry(head.to_string()).or_default().add_path(rest);
            }
        }
    }

    /// Check whether a name is requested at this level
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// The subtree requested under a name (empty if absent)
    pub fn child(&self, name: &str) -> Associations {
        self.0.get(name).cloned().unwrap_or_default()
    }

    /// Iterate over the names requested at this level
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|k| k.as_str())
    }

    /// Check whether nothing is requested
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Per-call query options
#[derive(Debug, Clone, Default)]
pub struct FilterOptions {
    /// Relations and child collections to eager-load
    pub associations: Associations,
    /// Root-level field subset to select (all declared columns when empty)
    pub select: Vec<String>,
    /// Root-level ordering, as field names with an optional direction
    /// (`"name"`, `"name DESC"`)
    pub order_by: Vec<String>,
}

impl FilterOptions {
    /// Create default options: no associations, all columns, no ordering
    pub fn new() -> Self {
        Self::default()
    }

    /// Request an association by dotted path, chainable
    pub fn with_association(mut self, path: &str) -> Self {
        self.associations.add_path(path);
        self
    }

    /// Restrict root-level selection to the given fields, chainable
    pub fn with_select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Append an ordering item, chainable
    pub fn with_order_by(mut self, item: impl Into<String>) -> Self {
        self.order_by.push(item.into());
        self
    }
}

/// One joined table hanging off a parent alias
#[derive(Debug, Clone)]
pub struct Join {
    pub left_alias: String,
    pub left_column: String,
    pub right_column: String,
    pub table: Table,
}

/// Aliased table node, built per query and discarded after SQL generation
#[derive(Debug, Clone)]
pub struct Table {
    pub alias: String,
    pub name: String,
    /// Selected columns as (column, result label) pairs
    pub columns: Vec<(String, String)>,
    pub joins: Vec<Join>,
    pub predicates: Vec<Predicate>,
}

/// Reverse index entry from a result-column label back to its source
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub alias: String,
    pub table: String,
    pub column: String,
    pub field: String,
    /// Relation path from the query root (empty at the root)
    pub path: String,
}

/// Map of result-column label to descriptor, consumed by the hydrator
pub type DescriptorMap = BTreeMap<String, FieldDescriptor>;

/// A built query: the alias tree plus its descriptor map
#[derive(Debug, Clone)]
pub struct BuiltQuery {
    pub root: Table,
    pub descriptors: DescriptorMap,
    pub order_by: Vec<String>,
}

impl BuiltQuery {
    /// Flatten the alias tree into an executable SELECT spec
    pub fn select_spec(&self) -> SelectSpec {
        let mut spec = SelectSpec {
            from: format!("{} {}", self.root.name, self.root.alias),
            order_by: self.order_by.clone(),
            ..Default::default()
        };
        flatten(&self.root, &mut spec);
        spec
    }
}

fn flatten(table: &Table, spec: &mut SelectSpec) {
    for (column, label) in &table.columns {
        spec.columns
            .push(format!("{}.{} AS {}", table.alias, column, label));
    }
    spec.predicates.extend(table.predicates.iter().cloned());
    for join in &table.joins {
        spec.joins.push(format!(
            "LEFT JOIN {} {} ON {}.{} = {}.{}",
            join.table.name,
            join.table.alias,
            join.left_alias,
            join.left_column,
            join.table.alias,
            join.right_column
        ));
        flatten(&join.table, spec);
    }
}

/// Build an aliased query tree for a root type
///
/// Aliases are assigned depth-first and monotonically, `t0` for the root,
/// in the order joins are discovered while walking declarations. Every
/// table in the tree is independently tenant-scoped.
pub fn build_query(
    registry: &SchemaRegistry,
    type_name: &str,
    filter: Option<&Record>,
    options: &FilterOptions,
    tenant: Option<&Value>,
) -> Result<BuiltQuery> {
    let meta = registry.get(type_name)?;
    let mut counter = 0usize;
    let mut descriptors = DescriptorMap::new();
    let root = build_table(
        registry,
        meta,
        filter,
        &options.associations,
        &options.select,
        tenant,
        "",
        &mut counter,
        &mut descriptors,
    )?;

    let mut order_by = Vec::with_capacity(options.order_by.len());
    for item in &options.order_by {
        let mut parts = item.split_whitespace();
        let name = parts.next().unwrap_or_default();
        let field = meta.field(name).ok_or_else(|| MosaicError::UnknownField {
            type_name: meta.type_name.clone(),
            field: name.to_string(),
        })?;
        order_by.push(match parts.next() {
            Some(direction) => format!("t0.{} {}", field.column, direction.to_uppercase()),
            None => format!("t0.{}", field.column),
        });
    }

    debug!(type_name, aliases = counter, "query built");
    Ok(BuiltQuery {
        root,
        descriptors,
        order_by,
    })
}

#[allow(clippy::too_many_arguments)]
fn build_table(
    registry: &SchemaRegistry,
    meta: &TableMetadata,
    filter: Option<&Record>,
    associations: &Associations,
    select: &[String],
    tenant: Option<&Value>,
    path: &str,
    counter: &mut usize,
    descriptors: &mut DescriptorMap,
) -> Result<Table> {
    let alias = format!("t{}", *counter);
    *counter += 1;

    let mut table = Table {
        alias: alias.clone(),
        name: meta.table.clone(),
        columns: Vec::new(),
        joins: Vec::new(),
        predicates: Vec::new(),
    };

    for name in associations.names() {
        let known = meta.foreign_key_for_relation(name).is_some()
            || meta.children.iter().any(|c| c.field == name);
        if !known {
            return Err(MosaicError::UnknownAssociation {
                type_name: meta.type_name.clone(),
                name: name.to_string(),
            });
        }
    }

    // explicit field subsets apply at the root; the primary key stays
    // selected so child collections can be merged back in
    let subset: Option<HashSet<&str>> = if path.is_empty() && !select.is_empty() {
        let mut set = HashSet::new();
        for name in select {
            let field = meta
                .field(name)
                .ok_or_else(|| MosaicError::UnknownField {
                    type_name: meta.type_name.clone(),
                    field: name.clone(),
                })?;
            set.insert(field.field.as_str());
        }
        Some(set)
    } else {
        None
    };

    for field in &meta.fields {
        let selected = subset
            .as_ref()
            .map_or(true, |s| s.contains(field.field.as_str()) || field.primary_key);
        if selected {
            let label = format!("{}_{}", alias, field.column);
            table.columns.push((field.column.clone(), label.clone()));
            descriptors.insert(
                label,
                FieldDescriptor {
                    alias: alias.clone(),
                    table: meta.table.clone(),
                    column: field.column.clone(),
                    field: field.field.clone(),
                    path: path.to_string(),
                },
            );
        }

        if field.tenant_key {
            if let Some(value) = tenant {
                table.predicates.push(Predicate::Eq {
                    expr: format!("{}.{}", alias, field.column),
                    value: value.clone(),
                });
            }
            continue;
        }

        if let Some(value) = filter.and_then(|f| f.get(&field.field)) {
            if !value.is_empty() {
                if field.encrypted {
                    return Err(MosaicError::EncryptedFilter {
                        type_name: meta.type_name.clone(),
                        field: field.field.clone(),
                    });
                }
                table.predicates.push(Predicate::Eq {
                    expr: format!("{}.{}", alias, field.column),
                    value: value.clone(),
                });
            }
        }
    }

    for fk in &meta.foreign_keys {
        // lazy relation: the raw key column is already selected above
        if !associations.contains(&fk.related_field) && !fk.required {
            continue;
        }
        let related = registry.get(&fk.related_type)?;
        let related_pk =
            related
                .primary_key_field()
                .ok_or_else(|| MosaicError::MissingPrimaryKey {
                    type_name: related.type_name.clone(),
                    context: format!("joined via relation '{}'", fk.related_field),
                })?;
        let child_path = if path.is_empty() {
            fk.related_field.clone()
        } else {
            format!("{}.{}", path, fk.related_field)
        };
        let joined = build_table(
            registry,
            related,
            filter.and_then(|f| f.related(&fk.related_field)),
            &associations.child(&fk.related_field),
            select,
            tenant,
            &child_path,
            counter,
            descriptors,
        )?;
        table.joins.push(Join {
            left_alias: alias.clone(),
            left_column: fk.column.clone(),
            right_column: related_pk.column.clone(),
            table: joined,
        });
    }

    Ok(table)
}

//! Metadata-assembled SQL statements
//!
//! Renders SELECT/INSERT/UPDATE/DELETE specs into positional-placeholder
//! SQL plus a parameter vector, and executes them against a connection.

#![allow(clippy::result_large_err)]

use std::collections::BTreeMap;

use rusqlite::types::ValueRef;
use rusqlite::Connection;

use mosaic_core::Value;

use crate::errors::{from_rusqlite, Result};

/// A single WHERE-clause term
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `expr = ?`
    Eq { expr: String, value: Value },
    /// `expr IN (?, ...)` over pre-rendered text values (composite keys)
    InText { expr: String, values: Vec<String> },
    /// `column IN (?, ...)`
    In { column: String, values: Vec<Value> },
    /// `column NOT IN (?, ...)`
    NotIn { column: String, values: Vec<Value> },
}

fn render_predicates(predicates: &[Predicate], sql: &mut String, params: &mut Vec<Value>) {
    if predicates.is_empty() {
        return;
    }
    sql.push_str(" WHERE ");
    for (i, predicate) in predicates.iter().enumerate() {
        if i > 0 {
            sql.push_str(" AND ");
        }
        match predicate {
            Predicate::Eq { expr, value } => {
                params.push(value.clone());
                sql.push_str(&format!("{} = ?{}", expr, params.len()));
            }
            Predicate::InText { expr, values } => {
                if values.is_empty() {
                    // empty membership test matches nothing
                    sql.push('0');
                    continue;
                }
                let mut marks = Vec::with_capacity(values.len());
                for value in values {
                    params.push(Value::Text(value.clone()));
                    marks.push(format!("?{}", params.len()));
                }
                sql.push_str(&format!("{} IN ({})", expr, marks.join(",")));
            }
            Predicate::In { column, values } => {
                if values.is_empty() {
                    sql.push('0');
                    continue;
                }
                let mut marks = Vec::with_capacity(values.len());
                for value in values {
                    params.push(value.clone());
                    marks.push(format!("?{}", params.len()));
                }
                sql.push_str(&format!("{} IN ({})", column, marks.join(",")));
            }
            Predicate::NotIn { column, values } => {
                if values.is_empty() {
                    // excluding nothing excludes nothing
                    sql.push('1');
                    continue;
                }
                let mut marks = Vec::with_capacity(values.len());
                for value in values {
                    params.push(value.clone());
                    marks.push(format!("?{}", params.len()));
                }
                sql.push_str(&format!("{} NOT IN ({})", column, marks.join(",")));
            }
        }
    }
}

/// A SELECT over an aliased join tree
#[derive(Debug, Clone, Default)]
pub struct SelectSpec {
    /// Selected columns, already aliased: `t0.name AS t0_name`
    pub columns: Vec<String>,
    /// Base table clause: `products t0`
    pub from: String,
    /// Join clauses in discovery order
    pub joins: Vec<String>,
    /// Conjunctive WHERE terms
    pub predicates: Vec<Predicate>,
    /// ORDER BY items, already aliased
    pub order_by: Vec<String>,
}

impl SelectSpec {
    /// Render to SQL plus its parameter vector
    pub fn render(&self) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut sql = format!("SELECT {} FROM {}", self.columns.join(", "), self.from);
        for join in &self.joins {
            sql.push(' ');
            sql.push_str(join);
        }
        render_predicates(&self.predicates, &mut sql, &mut params);
        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by.join(", "));
        }
        (sql, params)
    }
}

/// A multi-row INSERT, optionally returning generated keys
#[derive(Debug, Clone, Default)]
pub struct InsertSpec {
    pub table: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub returning: Option<String>,
}

impl InsertSpec {
    /// Render to SQL plus its parameter vector
    pub fn render(&self) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut groups = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            let mut marks = Vec::with_capacity(row.len());
            for value in row {
                params.push(value.clone());
                marks.push(format!("?{}", params.len()));
            }
            groups.push(format!("({})", marks.join(",")));
        }
        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.table,
            self.columns.join(", "),
            groups.join(",")
        );
        if let Some(column) = &self.returning {
            sql.push_str(&format!(" RETURNING {}", column));
        }
        (sql, params)
    }
}

/// A single-row UPDATE
#[derive(Debug, Clone, Default)]
pub struct UpdateSpec {
    pub table: String,
    pub assignments: Vec<(String, Value)>,
    pub predicates: Vec<Predicate>,
}

impl UpdateSpec {
    /// Render to SQL plus its parameter vector
    pub fn render(&self) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut sets = Vec::with_capacity(self.assignments.len());
        for (column, value) in &self.assignments {
            params.push(value.clone());
            sets.push(format!("{} = ?{}", column, params.len()));
        }
        let mut sql = format!("UPDATE {} SET {}", self.table, sets.join(", "));
        render_predicates(&self.predicates, &mut sql, &mut params);
        (sql, params)
    }
}

/// A predicate-scoped DELETE
#[derive(Debug, Clone, Default)]
pub struct DeleteSpec {
    pub table: String,
    pub predicates: Vec<Predicate>,
}

impl DeleteSpec {
    /// Render to SQL plus its parameter vector
    pub fn render(&self) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut sql = format!("DELETE FROM {}", self.table);
        render_predicates(&self.predicates, &mut sql, &mut params);
        (sql, params)
    }
}

/// Convert an engine value to its bound driver representation
///
/// UUIDs bind as hyphenated text, timestamps as unix milliseconds,
/// booleans as 0/1, JSON documents as serialized text.
pub fn bind_value(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Bool(b) => rusqlite::types::Value::Integer(*b as i64),
        Value::Int(i) => rusqlite::types::Value::Integer(*i),
        Value::Float(f) => rusqlite::types::Value::Real(*f),
        Value::Text(s) => rusqlite::types::Value::Text(s.clone()),
        Value::Bytes(b) => rusqlite::types::Value::Blob(b.clone()),
        Value::Uuid(u) => rusqlite::types::Value::Text(u.hyphenated().to_string()),
        Value::Timestamp(t) => rusqlite::types::Value::Integer(t.timestamp_millis()),
        Value::Json(j) => rusqlite::types::Value::Text(j.to_string()),
    }
}

/// Convert a scanned driver value back into an engine value
pub fn column_value(raw: ValueRef<'_>) -> Value {
    match raw {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    }
}

/// One scanned result row, keyed by result-column label
pub type Row = BTreeMap<String, Value>;

/// Run a SELECT, returning labelled rows
pub fn run_select(conn: &Connection, spec: &SelectSpec) -> Result<Vec<Row>> {
    let (sql, params) = spec.render();
    let mut stmt = conn.prepare(&sql).map_err(from_rusqlite)?;
    let labels: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let bound: Vec<rusqlite::types::Value> = params.iter().map(bind_value).collect();
    let mut rows = stmt
        .query(rusqlite::params_from_iter(bound))
        .map_err(from_rusqlite)?;

    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(from_rusqlite)? {
        let mut scanned = BTreeMap::new();
        for (i, label) in labels.iter().enumerate() {
            let raw = row.get_ref(i).map_err(from_rusqlite)?;
            scanned.insert(label.clone(), column_value(raw));
        }
        out.push(scanned);
    }
    Ok(out)
}

/// Run an INSERT; with a RETURNING column, yields the generated values
/// in submission order
pub fn run_insert(conn: &Connection, spec: &InsertSpec) -> Result<Vec<Value>> {
    let (sql, params) = spec.render();
    let bound: Vec<rusqlite::types::Value> = params.iter().map(bind_value).collect();
    if spec.returning.is_none() {
        conn.execute(&sql, rusqlite::params_from_iter(bound))
            .map_err(from_rusqlite)?;
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare(&sql).map_err(from_rusqlite)?;
    let mut rows = stmt
        .query(rusqlite::params_from_iter(bound))
        .map_err(from_rusqlite)?;
    let mut returned = Vec::new();
    while let Some(row) = rows.next().map_err(from_rusqlite)? {
        let raw = row.get_ref(0).map_err(from_rusqlite)?;
        returned.push(column_value(raw));
    }
    Ok(returned)
}

/// Run an UPDATE, returning the affected row count
pub fn run_update(conn: &Connection, spec: &UpdateSpec) -> Result<usize> {
    let (sql, params) = spec.render();
    let bound: Vec<rusqlite::types::Value> = params.iter().map(bind_value).collect();
    conn.execute(&sql, rusqlite::params_from_iter(bound))
        .map_err(from_rusqlite)
}

/// Run a DELETE, returning the affected row count
pub fn run_delete(conn: &Connection, spec: &DeleteSpec) -> Result<usize> {
    let (sql, params) = spec.render();
    let bound: Vec<rusqlite::types::Value> = params.iter().map(bind_value).collect();
    conn.execute(&sql, rusqlite::params_from_iter(bound))
        .map_err(from_rusqlite)
}

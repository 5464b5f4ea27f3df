//! Dynamic entity records and the typed model seam
//!
//! A `Record` is one in-memory entity instance: a field/value map, nested
//! related records behind foreign keys, and named child collections. The
//! engine operates entirely on records; callers keep static types by
//! implementing `Model`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::schema::TableMetadata;
use crate::value::Value;

/// One element of a child collection
///
/// The key is present for keyed-map containers and absent for sequences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildEntry {
    pub key: Option<String>,
    pub record: Record,
}

impl ChildEntry {
    pub fn new(record: Record) -> Self {
        Self { key: None, record }
    }

    pub fn keyed(key: impl Into<String>, record: Record) -> Self {
        Self {
            key: Some(key.into()),
            record,
        }
    }
}

/// A dynamic entity instance
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Record {
    values: BTreeMap<String, Value>,
    related: BTreeMap<String, Record>,
    children: BTreeMap<String, Vec<ChildEntry>>,
}

impl Record {
    /// Create a new empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field value, chainable for construction
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    /// Attach a related record, chainable for construction
    pub fn with_related(mut self, field: impl Into<String>, record: Record) -> Self {
        self.set_related(field, record);
        self
    }

    /// Append a sequence child entry, chainable for construction
    pub fn with_child(mut self, field: impl Into<String>, record: Record) -> Self {
        self.children
            .entry(field.into())
            .or_default()
            .push(ChildEntry::new(record));
        self
    }

    /// Append a keyed-map child entry, chainable for construction
    pub fn with_keyed_child(
        mut self,
        field: impl Into<String>,
        key: impl Into<String>,
        record: Record,
    ) -> Self {
        self.children
            .entry(field.into())
            .or_default()
            .push(ChildEntry::keyed(key, record));
        self
    }

    /// Set a field value
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(field.into(), value.into());
    }

    /// Get a field value
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// Check whether a field is present with a non-empty value
    pub fn has_value(&self, field: &str) -> bool {
        self.values.get(field).is_some_and(|v| !v.is_empty())
    }

    /// Get a value by dotted path, walking nested related records
    ///
    /// `"owner.name"` reads the `name` field of the record related via
    /// `owner`. A single segment reads a field on this record.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        match path.split_once('.') {
            None => self.values.get(path),
            Some((head, rest)) => self.related.get(head)?.get_path(rest),
        }
    }

    /// Attach a related record
    pub fn set_related(&mut self, field: impl Into<String>, record: Record) {
        self.related.insert(field.into(), record);
    }

    /// Get a related record
    pub fn related(&self, field: &str) -> Option<&Record> {
        self.related.get(field)
    }

    /// Replace the entries of a child collection
    pub fn set_children(&mut self, field: impl Into<String>, entries: Vec<ChildEntry>) {
        self.children.insert(field.into(), entries);
    }

    /// Get the entries of a child collection (empty if never set)
    pub fn children(&self, field: &str) -> &[ChildEntry] {
        self.children.get(field).map_or(&[], |v| v.as_slice())
    }

    /// Iterate over field name/value pairs in sorted order
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Iterate over related record names
    pub fn related_fields(&self) -> impl Iterator<Item = &str> {
        self.related.keys().map(|k| k.as_str())
    }

    /// Check whether the record carries no values, relations, or children
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.related.is_empty() && self.children.is_empty()
    }
}

/// The seam between statically-typed entities and the dynamic engine
///
/// A type implementing `Model` describes its own table once and converts
/// itself to and from records at the API boundary.
pub trait Model: Sized {
    /// Build the table description for this type
    ///
    /// Called once at registration; the registry owns the result.
    fn table_metadata() -> TableMetadata;

    /// Convert this entity into a record
    fn into_record(self) -> Record;

    /// Rebuild a typed entity from a hydrated record
    fn from_record(record: &Record) -> Result<Self>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_path_walks_related() {
        let owner = Record::new().with("name", "acme");
        let rec = Record::new()
            .with("sku", "w-1")
            .with_related("owner", owner);

        assert_eq!(rec.get_path("sku"), Some(&Value::Text("w-1".to_string())));
        assert_eq!(
            rec.get_path("owner.name"),
            Some(&Value::Text("acme".to_string()))
        );
        assert_eq!(rec.get_path("owner.missing"), None);
        assert_eq!(rec.get_path("missing.name"), None);
    }

    #[test]
    fn test_has_value_ignores_empty() {
        let rec = Record::new().with("a", "").with("b", 0i64);
        assert!(!rec.has_value("a"));
        assert!(rec.has_value("b"));
        assert!(!rec.has_value("missing"));
    }

    #[test]
    fn test_children_default_empty() {
        let rec = Record::new();
        assert!(rec.children("variants").is_empty());

        let rec = rec.with_keyed_child("variants", "small", Record::new().with("label", "S"));
        assert_eq!(rec.children("variants").len(), 1);
        assert_eq!(rec.children("variants")[0].key.as_deref(), Some("small"));
    }
}

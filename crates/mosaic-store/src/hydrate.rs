//! Hydrator
//!
//! Rebuilds typed nested records from flat, aliased result rows using the
//! descriptor map produced by the query builder. Child collections are
//! merged in afterwards from their own queries.

#![allow(clippy::result_large_err)]

use std::collections::{BTreeMap, HashSet};

use mosaic_core::codec::{decode_transport, unmarshal, Cipher};
use mosaic_core::{
    Child, ChildEntry, ChildKind, FieldMetadata, MosaicError, Record, SchemaRegistry,
    TableMetadata, Value, ValueKind,
};

use crate::builder::DescriptorMap;
use crate::errors::Result;
use crate::sql::Row;

/// Hydrate one record per result row
pub fn hydrate_rows(
    registry: &SchemaRegistry,
    type_name: &str,
    rows: &[Row],
    descriptors: &DescriptorMap,
    cipher: &dyn Cipher,
) -> Result<Vec<Record>> {
    let meta = registry.get(type_name)?;
    // relation paths that were actually selected; lazy relations are absent
    let paths: HashSet<&str> = descriptors.values().map(|d| d.path.as_str()).collect();
    rows.iter()
        .map(|row| hydrate_record(registry, meta, row, descriptors, &paths, "", cipher))
        .collect()
}

fn hydrate_record(
    registry: &SchemaRegistry,
    meta: &TableMetadata,
    row: &Row,
    descriptors: &DescriptorMap,
    paths: &HashSet<&str>,
    path: &str,
    cipher: &dyn Cipher,
) -> Result<Record> {
    let mut record = Record::new();

    for (label, descriptor) in descriptors {
        if descriptor.path != path {
            continue;
        }
        let Some(field) = meta.field(&descriptor.field) else {
            continue;
        };
        let raw = row.get(label).cloned().unwrap_or(Value::Null);
        record.set(&field.field, hydrate_value(field, raw, cipher)?);
    }

    for fk in &meta.foreign_keys {
        let child_path = if path.is_empty() {
            fk.related_field.clone()
        } else {
            format!("{}.{}", path, fk.related_field)
        };
        // no descriptor under this path: the relation was not selected,
        // leave the field unset rather than erroring
        if !paths.contains(child_path.as_str()) {
            continue;
        }
        let related = registry.get(&fk.related_type)?;
        let nested = hydrate_record(
            registry,
            related,
            row,
            descriptors,
            paths,
            &child_path,
            cipher,
        )?;
        // an all-NULL joined row is a missed LEFT JOIN, not an entity
        if nested.fields().any(|(_, v)| !v.is_empty()) {
            record.set_related(&fk.related_field, nested);
        }
    }

    Ok(record)
}

fn hydrate_value(field: &FieldMetadata, raw: Value, cipher: &dyn Cipher) -> Result<Value> {
    if field.encrypted {
        return hydrate_encrypted(field, raw, cipher);
    }
    if field.json {
        return hydrate_json(field, raw);
    }
    Ok(raw.convert(field.kind))
}

/// Encrypted columns travel base64-encoded; an empty stored value decodes
/// to an empty value without invoking the cipher
fn hydrate_encrypted(field: &FieldMetadata, raw: Value, cipher: &dyn Cipher) -> Result<Value> {
    let encoded = match raw {
        Value::Null => return Ok(Value::Null),
        Value::Text(s) => {
            if s.is_empty() {
                return Ok(Value::Text(String::new()));
            }
            s
        }
        Value::Bytes(b) => {
            if b.is_empty() {
                return Ok(Value::Text(String::new()));
            }
            String::from_utf8(b).map_err(|e| MosaicError::InvalidBase64 {
                column: field.column.clone(),
                reason: e.to_string(),
            })?
        }
        other => {
            return Err(MosaicError::Conversion {
                field: field.field.clone(),
                expected: "encrypted text".to_string(),
                reason: format!("stored value {:?} is not text", other),
            })
        }
    };
    let ciphertext = decode_transport(&field.column, &encoded)?;
    let plaintext = cipher.decrypt(&ciphertext)?;
    match field.kind {
        ValueKind::Bytes => Ok(Value::Bytes(plaintext)),
        kind => {
            let text = String::from_utf8(plaintext).map_err(|e| MosaicError::Conversion {
                field: field.field.clone(),
                expected: kind.name().to_string(),
                reason: e.to_string(),
            })?;
            Ok(Value::Text(text).convert(kind))
        }
    }
}

fn hydrate_json(field: &FieldMetadata, raw: Value) -> Result<Value> {
    let text = match raw {
        Value::Null => return Ok(Value::Null),
        Value::Text(s) => {
            if s.is_empty() {
                return Ok(Value::Null);
            }
            s
        }
        Value::Bytes(b) => String::from_utf8(b).map_err(|e| MosaicError::JsonDecode {
            column: field.column.clone(),
            reason: e.to_string(),
        })?,
        other => {
            return Err(MosaicError::JsonDecode {
                column: field.column.clone(),
                reason: format!("stored value {:?} is not text", other),
            })
        }
    };
    Ok(Value::Json(unmarshal(&field.column, &text)?))
}

/// Attach hydrated child rows to their parents, grouped by the parent's
/// primary key
pub fn merge_children(
    parents: &mut [Record],
    parent_meta: &TableMetadata,
    child: &Child,
    child_rows: Vec<Record>,
) -> Result<()> {
    let parent_pk =
        parent_meta
            .primary_key_field()
            .ok_or_else(|| MosaicError::MissingPrimaryKey {
                type_name: parent_meta.type_name.clone(),
                context: format!("child collection '{}'", child.field),
            })?;

    // group by parent key with deterministic iteration
    let mut grouped: BTreeMap<String, Vec<ChildEntry>> = BTreeMap::new();
    for row in child_rows {
        let parent_key = row
            .get(&child.parent_key_field)
            .map(|v| v.key_form())
            .unwrap_or_default();
        let entry = match (child.kind, &child.key_mapping) {
            (ChildKind::KeyedMap, Some(key_field)) => match row.get(key_field) {
                Some(key) => ChildEntry::keyed(key.key_form(), row),
                None => ChildEntry::new(row),
            },
            _ => ChildEntry::new(row),
        };
        grouped.entry(parent_key).or_default().push(entry);
    }

    for parent in parents.iter_mut() {
        let key = parent
            .get(&parent_pk.field)
            .map(|v| v.key_form())
            .unwrap_or_default();
        if let Some(entries) = grouped.remove(&key) {
            parent.set_children(&child.field, entries);
        }
    }
    Ok(())
}

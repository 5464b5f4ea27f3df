//! Dynamic scalar values flowing between records and storage
//!
//! A `Value` is the unit the engine moves: filter arguments, bound statement
//! parameters, scanned result columns, and composite lookup-key parts all
//! pass through this enum.

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declared semantic type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    Bool,
    Int,
    Float,
    Text,
    Bytes,
    Uuid,
    Timestamp,
    Json,
}

impl ValueKind {
    /// Human-readable name, used in conversion errors
    pub fn name(&self) -> &'static str {
        match self {
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Text => "text",
            ValueKind::Bytes => "bytes",
            ValueKind::Uuid => "uuid",
            ValueKind::Timestamp => "timestamp",
            ValueKind::Json => "json",
        }
    }
}

/// A dynamic scalar value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    Json(serde_json::Value),
}

impl Value {
    /// Check whether this value is NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check whether this value is empty for filtering and key purposes
    ///
    /// NULL, the empty string, empty byte slices, and the nil UUID are empty.
    /// Integer zero is a real value, not an absent one.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(s) => s.is_empty(),
            Value::Bytes(b) => b.is_empty(),
            Value::Uuid(u) => u.is_nil(),
            _ => false,
        }
    }

    /// Canonical string form used in composite lookup keys
    ///
    /// Mirrors the text rendering of the stored representation so in-memory
    /// keys match `CAST(column AS TEXT)` concatenations: booleans as 1/0,
    /// timestamps as unix milliseconds, UUIDs hyphenated lowercase. A raw
    /// 16-byte blob renders as a UUID.
    pub fn key_form(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => {
                if *b {
                    "1".to_string()
                } else {
                    "0".to_string()
                }
            }
            Value::Int(i) => i.to_string(),
            // Integral reals render with a trailing .0, matching SQLite's
            // REAL-to-TEXT cast
            Value::Float(f) => {
                if f.is_finite() && f.fract() == 0.0 {
                    format!("{:.1}", f)
                } else {
                    f.to_string()
                }
            }
            Value::Text(s) => s.clone(),
            Value::Bytes(b) => match uuid_from_blob(b) {
                Some(u) => u.hyphenated().to_string(),
                None => base64::engine::general_purpose::STANDARD.encode(b),
            },
            Value::Uuid(u) => u.hyphenated().to_string(),
            Value::Timestamp(t) => t.timestamp_millis().to_string(),
            Value::Json(j) => j.to_string(),
        }
    }

    /// Best-effort coercion of a scanned value into a declared kind
    ///
    /// A 16-byte blob is rendered to its canonical UUID string before
    /// conversion. Values that do not fit the declared kind pass through
    /// unchanged rather than erroring, so nullable scalar columns keep
    /// whatever the driver scanned.
    pub fn convert(self, kind: ValueKind) -> Value {
        let value = match self {
            Value::Bytes(b) => match uuid_from_blob(&b) {
                Some(u) => Value::Text(u.hyphenated().to_string()),
                None => Value::Bytes(b),
            },
            other => other,
        };

        match (kind, value) {
            (_, Value::Null) => Value::Null,
            (ValueKind::Bool, Value::Int(i)) => Value::Bool(i != 0),
            (ValueKind::Bool, Value::Bool(b)) => Value::Bool(b),
            (ValueKind::Float, Value::Int(i)) => Value::Float(i as f64),
            (ValueKind::Uuid, Value::Text(s)) => match Uuid::parse_str(&s) {
                Ok(u) => Value::Uuid(u),
                Err(_) => Value::Text(s),
            },
            (ValueKind::Timestamp, Value::Int(ms)) => match DateTime::from_timestamp_millis(ms) {
                Some(t) => Value::Timestamp(t),
                None => Value::Int(ms),
            },
            (ValueKind::Json, Value::Text(s)) => match serde_json::from_str(&s) {
                Ok(j) => Value::Json(j),
                Err(_) => Value::Text(s),
            },
            (_, other) => other,
        }
    }
}

fn uuid_from_blob(bytes: &[u8]) -> Option<Uuid> {
    let arr: [u8; 16] = bytes.try_into().ok()?;
    Some(Uuid::from_bytes(arr))
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key_form())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emptiness() {
        assert!(Value::Null.is_empty());
        assert!(Value::Text(String::new()).is_empty());
        assert!(Value::Bytes(vec![]).is_empty());
        assert!(Value::Uuid(Uuid::nil()).is_empty());
        assert!(!Value::Int(0).is_empty());
        assert!(!Value::Bool(false).is_empty());
        assert!(!Value::Text("x".to_string()).is_empty());
    }

    #[test]
    fn test_key_form_matches_stored_text() {
        assert_eq!(Value::Bool(true).key_form(), "1");
        assert_eq!(Value::Bool(false).key_form(), "0");
        assert_eq!(Value::Int(42).key_form(), "42");
        assert_eq!(Value::Float(1.0).key_form(), "1.0");
        assert_eq!(Value::Float(1.5).key_form(), "1.5");
        assert_eq!(Value::Null.key_form(), "");
        assert_eq!(Value::Text("pops".to_string()).key_form(), "pops");
    }

    #[test]
    fn test_sixteen_byte_blob_renders_as_uuid() {
        let u = Uuid::parse_str("67e55044-10b1-426f-9247-bb680e5fe0c8").unwrap();
        let blob = Value::Bytes(u.as_bytes().to_vec());
        assert_eq!(blob.key_form(), "67e55044-10b1-426f-9247-bb680e5fe0c8");

        let converted = Value::Bytes(u.as_bytes().to_vec()).convert(ValueKind::Uuid);
        assert_eq!(converted, Value::Uuid(u));
    }

    #[test]
    fn test_convert_coercions() {
        assert_eq!(Value::Int(1).convert(ValueKind::Bool), Value::Bool(true));
        assert_eq!(Value::Int(3).convert(ValueKind::Float), Value::Float(3.0));
        assert_eq!(
            Value::Text("{\"a\":1}".to_string()).convert(ValueKind::Json),
            Value::Json(serde_json::json!({"a": 1}))
        );
        let t = Value::Int(1_700_000_000_000).convert(ValueKind::Timestamp);
        match t {
            Value::Timestamp(dt) => assert_eq!(dt.timestamp_millis(), 1_700_000_000_000),
            other => panic!("expected timestamp, got {:?}", other),
        }
    }

    #[test]
    fn test_convert_leaves_mismatches_untouched() {
        assert_eq!(
            Value::Text("abc".to_string()).convert(ValueKind::Int),
            Value::Text("abc".to_string())
        );
        assert_eq!(Value::Null.convert(ValueKind::Uuid), Value::Null);
    }
}

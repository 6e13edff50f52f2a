//! Dynamic column values.
//!
//! Rows travel through the migration engine as ordered maps of column name to
//! [`Value`]. The map is a `BTreeMap` so every record built from the same
//! column set yields the same column order in multi-row inserts.
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// A single row keyed by column name.
pub type Row = BTreeMap<String, Value>;

/// A dynamically typed column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Timestamp(NaiveDateTime),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns `true` for the integer zero, which legacy schemas use as a
    /// "no related row" marker in foreign key columns.
    pub fn is_zero(&self) -> bool {
        matches!(self, Value::Int(0) | Value::UInt(0))
    }

    /// Canonical key used to index rows and cache entries by value.
    ///
    /// Signed and unsigned integers with the same magnitude share a key so an
    /// `INT` identifier read from the old schema matches the same identifier
    /// stored in an `INT UNSIGNED` column of the new schema.
    pub fn to_key(&self) -> String {
        match self {
            Value::Null => "\u{0}null".to_string(),
            Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            Value::Int(i) => i.to_string(),
            Value::UInt(u) => u.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Text(s) => s.clone(),
            Value::Timestamp(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
            Value::Bytes(b) => hex::encode(b),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::UInt(u) => i64::try_from(*u).ok(),
            Value::Bool(b) => Some(*b as i64),
            Value::Text(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Orders two values of compatible kinds. Numbers compare across the
    /// integer and float variants; anything else only compares within its own
    /// variant.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::UInt(a), Value::UInt(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::UInt(b)) => Some(i128::from(*a).cmp(&i128::from(*b))),
            (Value::UInt(a), Value::Int(b)) => Some(i128::from(*a).cmp(&i128::from(*b))),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Float(a), b) => b.as_f64().and_then(|b| a.partial_cmp(&b)),
            (a, Value::Float(b)) => a.as_f64().and_then(|a| a.partial_cmp(b)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Loose equality used by filters: numeric variants compare by value,
    /// everything else by canonical key.
    pub fn loosely_equals(&self, other: &Value) -> bool {
        if self.is_null() || other.is_null() {
            return false;
        }
        match self.compare(other) {
            Some(ordering) => ordering == Ordering::Equal,
            None => self.to_key() == other.to_key(),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::UInt(u) => Some(*u as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            other => write!(f, "{}", other.to_key()),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::UInt(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Value::Timestamp(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_and_unsigned_share_key() {
        assert_eq!(Value::Int(42).to_key(), Value::UInt(42).to_key());
        assert_eq!(Value::Int(42).to_key(), Value::from("42").to_key());
        assert_ne!(Value::Null.to_key(), Value::from("null").to_key());
    }

    #[test]
    fn test_zero_detection() {
        assert!(Value::Int(0).is_zero());
        assert!(Value::UInt(0).is_zero());
        assert!(!Value::Int(1).is_zero());
        assert!(!Value::Null.is_zero());
    }

    #[test]
    fn test_compare_across_numeric_variants() {
        assert_eq!(Value::Int(3).compare(&Value::UInt(5)), Some(Ordering::Less));
        assert_eq!(Value::Float(2.5).compare(&Value::Int(2)), Some(Ordering::Greater));
        assert_eq!(Value::from("a").compare(&Value::Int(1)), None);
        assert!(Value::Int(7).loosely_equals(&Value::UInt(7)));
        assert!(!Value::Null.loosely_equals(&Value::Null));
    }

    #[test]
    fn test_json_serialization_is_plain() {
        let mut row = Row::new();
        row.insert("id".to_string(), Value::Int(1));
        row.insert("name".to_string(), Value::from("Ada"));
        row.insert("deleted_at".to_string(), Value::Null);
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, r#"{"deleted_at":null,"id":1,"name":"Ada"}"#);
    }
}

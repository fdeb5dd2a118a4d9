//! Conversions between scalar values and SQLite values.

use lookload_core::Value;
use rusqlite::types::{Value as SqlValue, ValueRef};

use crate::error::{SqliteError, SqliteResult};

/// Convert a scalar value to a bound SQLite parameter.
pub fn to_sqlite(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int(i) => SqlValue::Integer(*i),
        Value::Float(f) => SqlValue::Real(*f),
        Value::String(s) => SqlValue::Text(s.clone()),
    }
}

/// Convert a column value read from SQLite.
///
/// Blobs are accepted when they hold UTF-8 text.
pub fn from_sqlite(value: ValueRef<'_>) -> SqliteResult<Value> {
    match value {
        ValueRef::Null => Ok(Value::Null),
        ValueRef::Integer(i) => Ok(Value::Int(i)),
        ValueRef::Real(f) => Ok(Value::Float(f)),
        ValueRef::Text(bytes) => Ok(Value::String(String::from_utf8_lossy(bytes).into_owned())),
        ValueRef::Blob(bytes) => std::str::from_utf8(bytes)
            .map(|s| Value::String(s.to_string()))
            .map_err(|_| SqliteError::type_conversion("binary blob column")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_sqlite() {
        assert!(matches!(to_sqlite(&Value::Null), SqlValue::Null));
        assert!(matches!(to_sqlite(&Value::Bool(true)), SqlValue::Integer(1)));
        assert!(matches!(to_sqlite(&Value::Int(42)), SqlValue::Integer(42)));
        assert!(matches!(to_sqlite(&Value::from("hi")), SqlValue::Text(s) if s == "hi"));
    }

    #[test]
    fn test_from_sqlite() {
        assert_eq!(from_sqlite(ValueRef::Null).unwrap(), Value::Null);
        assert_eq!(from_sqlite(ValueRef::Integer(7)).unwrap(), Value::Int(7));
        assert_eq!(from_sqlite(ValueRef::Text(b"ada")).unwrap(), Value::from("ada"));
        assert_eq!(from_sqlite(ValueRef::Blob(b"ada")).unwrap(), Value::from("ada"));
        assert!(from_sqlite(ValueRef::Blob(&[0xff, 0xfe])).is_err());
    }
}

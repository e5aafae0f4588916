//! Row values and column type inference.
//!
//! Rows arrive as JSON-ish maps.  A column's storage type is picked from the first non-null value ever written to it
//! and never changes afterwards; every table is a sqlite STRICT table, so a later value that can't be stored in that
//! type is refused by sqlite rather than silently coerced.
use base64::Engine;
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::Value;

/// A row: column name to value, in arrival order.
pub type Row = serde_json::Map<String, Value>;

/// Columns with this suffix get no type affinity at all.
pub const BLOB_SUFFIX: &str = "_blob";

/// Storage types of a column.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    /// No affinity: whatever was written comes back out.
    Any,
}

impl ColumnType {
    /// The type as written in a STRICT table's DDL.
    pub fn sql_name(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
            ColumnType::Any => "ANY",
        }
    }

    /// Parse the declared type reported by `PRAGMA table_info`.
    ///
    /// Tables we didn't create may carry anything at all, so this uses sqlite's own affinity rules as a fallback.
    pub fn from_declared(declared: &str) -> ColumnType {
        let upper = declared.to_ascii_uppercase();
        if upper.contains("INT") {
            ColumnType::Integer
        } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            ColumnType::Text
        } else if upper.is_empty() || upper.contains("BLOB") || upper == "ANY" {
            ColumnType::Any
        } else {
            ColumnType::Real
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.sql_name().to_ascii_lowercase())
    }
}

/// Infer the type a new column should get from a sample value.
///
/// Returns `None` for null: nulls never decide a column's type.
pub fn infer_type(column: &str, sample: &Value) -> Option<ColumnType> {
    if sample.is_null() {
        return None;
    }

    if column.ends_with(BLOB_SUFFIX) {
        return Some(ColumnType::Any);
    }

    let t = match sample {
        Value::Number(n) if n.is_i64() => ColumnType::Integer,
        Value::Number(_) => ColumnType::Real,
        _ => ColumnType::Text,
    };
    Some(t)
}

/// Convert a row value to something we can bind.
pub fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Text(b.to_string()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Integer(i)
            } else {
                // u64 beyond i64::MAX lands here too.
                SqlValue::Real(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}

/// Convert a value read from sqlite back to JSON.
///
/// Blobs can only get in through raw SQL; they come back out base64-encoded.
pub fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(base64::engine::general_purpose::STANDARD.encode(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn inference() {
        assert_eq!(infer_type("x", &json!(5)), Some(ColumnType::Integer));
        assert_eq!(infer_type("x", &json!(-5)), Some(ColumnType::Integer));
        assert_eq!(infer_type("x", &json!(5.5)), Some(ColumnType::Real));
        assert_eq!(infer_type("x", &json!(u64::MAX)), Some(ColumnType::Real));
        assert_eq!(infer_type("x", &json!("5")), Some(ColumnType::Text));
        assert_eq!(infer_type("x", &json!(true)), Some(ColumnType::Text));
        assert_eq!(infer_type("x", &json!([1, 2])), Some(ColumnType::Text));
        assert_eq!(infer_type("x", &json!({"a": 1})), Some(ColumnType::Text));
        assert_eq!(infer_type("x", &Value::Null), None);
    }

    #[test]
    fn blob_suffix_wins() {
        assert_eq!(infer_type("picture_blob", &json!(5)), Some(ColumnType::Any));
        assert_eq!(infer_type("picture_blob", &json!("abc")), Some(ColumnType::Any));
        assert_eq!(infer_type("picture_blob", &Value::Null), None);
    }

    #[test]
    fn declared_types() {
        assert_eq!(ColumnType::from_declared("INTEGER"), ColumnType::Integer);
        assert_eq!(ColumnType::from_declared("int"), ColumnType::Integer);
        assert_eq!(ColumnType::from_declared("TEXT"), ColumnType::Text);
        assert_eq!(ColumnType::from_declared("varchar(20)"), ColumnType::Text);
        assert_eq!(ColumnType::from_declared("REAL"), ColumnType::Real);
        assert_eq!(ColumnType::from_declared("ANY"), ColumnType::Any);
        assert_eq!(ColumnType::from_declared(""), ColumnType::Any);
        assert_eq!(ColumnType::Integer.to_string(), "integer");
    }

    #[test]
    fn sql_conversions() {
        assert_eq!(to_sql(&json!(true)), SqlValue::Text("true".into()));
        assert_eq!(to_sql(&json!(3)), SqlValue::Integer(3));
        assert_eq!(to_sql(&json!(1.5)), SqlValue::Real(1.5));
        assert_eq!(to_sql(&json!({"a": 1})), SqlValue::Text(r#"{"a":1}"#.into()));
        assert_eq!(from_sql(ValueRef::Integer(3)), json!(3));
        assert_eq!(from_sql(ValueRef::Text(b"hi")), json!("hi"));
        assert_eq!(from_sql(ValueRef::Blob(b"hi")), json!("aGk="));
        assert_eq!(from_sql(ValueRef::Null), Value::Null);
    }
}

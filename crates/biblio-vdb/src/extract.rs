//! Building blocks for column extractors.
//!
//! Each helper returns a closure suitable for [`ColumnMeta::new`]. Paths are
//! resolved with [`biblio_containers::record::value_at`], so the same helper
//! reads a JSON field or a converted XML element.
//!
//! [`ColumnMeta::new`]: crate::schema::ColumnMeta::new

use biblio_containers::record;
use rusqlite::types::Value as SqlValue;
use serde_json::Value;

/// SQL value of a JSON value. Booleans become 0/1, structured values are
/// stored as their JSON text.
pub fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map_or(SqlValue::Null, SqlValue::Real),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}

/// Value at a dotted `path`, NULL when absent.
pub fn path(path: &str) -> impl Fn(&Value) -> SqlValue + Send + Sync + 'static {
    let keys = split(path);
    move |rec| record::value_at(rec, &keys).map_or(SqlValue::Null, to_sql)
}

/// First element of the array at `path` (or the value itself).
pub fn first(path: &str) -> impl Fn(&Value) -> SqlValue + Send + Sync + 'static {
    let keys = split(path);
    move |rec| {
        record::value_at(rec, &keys)
            .and_then(record::first)
            .map_or(SqlValue::Null, to_sql)
    }
}

/// Character data at `path`; for XML elements with attributes, their `#text`.
pub fn text(path: &str) -> impl Fn(&Value) -> SqlValue + Send + Sync + 'static {
    let keys = split(path);
    move |rec| {
        record::value_at(rec, &keys)
            .and_then(record::text)
            .map_or(SqlValue::Null, |s| SqlValue::Text(s.to_string()))
    }
}

/// String elements of the array at `path` joined by `separator`.
pub fn joined(path: &str, separator: &'static str) -> impl Fn(&Value) -> SqlValue + Send + Sync + 'static {
    let keys = split(path);
    move |rec| {
        let parts: Vec<&str> = record::elements_at(rec, &keys)
            .iter()
            .filter_map(record::text)
            .collect();
        if parts.is_empty() {
            SqlValue::Null
        } else {
            SqlValue::Text(parts.join(separator))
        }
    }
}

/// Lower-cased text at `path`, e.g. for DOIs.
pub fn lowercase(path: &str) -> impl Fn(&Value) -> SqlValue + Send + Sync + 'static {
    let inner = text(path);
    move |rec| match inner(rec) {
        SqlValue::Text(s) => SqlValue::Text(s.to_lowercase()),
        other => other,
    }
}

fn split(path: &str) -> Vec<String> {
    path.split('.').map(str::to_string).collect()
}

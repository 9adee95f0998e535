//! Navigation helpers over decoded records.
//!
//! Records from JSON and XML share one shape, so the same helpers locate
//! nested lists for detail cursors and scalar fields for column extractors.

use std::slice;

use serde_json::Value;

use crate::xml::TEXT_KEY;

/// Follows `path` through nested objects. Arrays met on an intermediate step
/// contribute their first element, which is how single-occurrence XML
/// children (always arrays after conversion) are reached.
pub fn value_at<'v, S: AsRef<str>>(record: &'v Value, path: &[S]) -> Option<&'v Value> {
    let mut current = record;
    for (i, key) in path.iter().enumerate() {
        if i > 0 {
            current = first(current)?;
        }
        current = current.get(key.as_ref())?;
    }
    Some(current)
}

/// The list of elements under `path`: an array yields its items, a single
/// non-null value yields itself, anything missing or null yields nothing.
pub fn elements_at<'v, S: AsRef<str>>(record: &'v Value, path: &[S]) -> &'v [Value] {
    match value_at(record, path) {
        Some(Value::Array(items)) => items,
        Some(Value::Null) | None => &[],
        Some(single) => slice::from_ref(single),
    }
}

/// The first element of an array, or the value itself when it is not one.
pub fn first(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(items) => items.first(),
        other => Some(other),
    }
}

/// Character data of a scalar or an XML element, if any.
pub fn text(value: &Value) -> Option<&str> {
    match first(value)? {
        Value::String(s) => Some(s),
        Value::Object(map) => map.get(TEXT_KEY).and_then(Value::as_str),
        _ => None,
    }
}

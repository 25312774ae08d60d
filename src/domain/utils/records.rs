//! Helpers over the collection shape shared by the iteration primitives and the
//! resource actions: `{ "<resource_type>": { "<id>": record, ... } }`.
//!
//! A collection may also hold a JSON array of records. Ids are then taken from the
//! record's `id` field, falling back to the position in the array.

use serde_json::{Map, Value};

use crate::domain::utils::id::NsKey;
use crate::error::{Error, Result};

/// Returns the `(id, record)` pairs stored under `resource`, in insertion order.
///
/// A missing or `null` resource entry is an empty collection.
pub fn entries(key: &NsKey, collection: &Value, resource: &str) -> Result<Vec<(String, Value)>> {
    let outer = collection.as_object().ok_or_else(|| Error::UnexpectedValue { key: key.clone(), expected: "a resource collection object" })?;

    match outer.get(resource) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Object(records)) => Ok(records.iter().map(|(id, record)| (id.clone(), record.clone())).collect()),
        Some(Value::Array(records)) => Ok(records.iter().enumerate().map(|(index, record)| (record_id(record, index), record.clone())).collect()),
        Some(_) => Err(Error::UnexpectedValue { key: key.clone(), expected: "an object or array of records" }),
    }
}

/// Number of records stored under `resource`.
pub fn len(key: &NsKey, collection: &Value, resource: &str) -> Result<usize> {
    Ok(entries(key, collection, resource)?.len())
}

/// Splits the first `count` records off the collection.
///
/// Returns the removed records and the collection with them removed. The rest of
/// the outer object (other resource types) is preserved.
pub fn split_first(key: &NsKey, collection: &Value, resource: &str, count: usize) -> Result<(Vec<(String, Value)>, Value)> {
    let mut all = entries(key, collection, resource)?;
    let rest = all.split_off(count.min(all.len()));
    Ok((all, replace(collection, resource, rest)))
}

/// Returns a copy of `collection` with the records under `resource` replaced,
/// keeping the array or object form the collection used.
pub fn replace(collection: &Value, resource: &str, records: Vec<(String, Value)>) -> Value {
    let mut outer = collection.as_object().cloned().unwrap_or_default();
    let value = match collection.get(resource) {
        Some(Value::Array(_)) => Value::Array(records.into_iter().map(|(_, record)| record).collect()),
        _ => Value::Object(records.into_iter().collect()),
    };
    outer.insert(resource.to_string(), value);
    Value::Object(outer)
}

/// Builds `{ resource: { id: record, ... } }`.
pub fn wrap(resource: &str, records: impl IntoIterator<Item = (String, Value)>) -> Value {
    let inner: Map<String, Value> = records.into_iter().collect();
    let mut outer = Map::new();
    outer.insert(resource.to_string(), Value::Object(inner));
    Value::Object(outer)
}

/// An empty collection for `resource`.
pub fn empty(resource: &str) -> Value {
    wrap(resource, std::iter::empty())
}

fn record_id(record: &Value, index: usize) -> String {
    match record.get("id") {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Number(id)) => id.to_string(),
        _ => index.to_string(),
    }
}

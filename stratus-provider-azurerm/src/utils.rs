//! Utility functions for value normalization and conversion

use std::collections::HashMap;

use serde_json::{Map, Value as Json, json};
use stratus_core::resource::Value;

/// Normalize location value (e.g., "West Europe" -> "westeurope")
pub fn normalize_location(s: &str) -> String {
    s.replace(' ', "").to_lowercase()
}

/// Resource IDs returned by the API may differ in casing from configured ones
pub fn ids_equal(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Build the tags object of a request payload
pub fn expand_tags(user_tags: Option<&HashMap<String, Value>>) -> Json {
    let mut tags = Map::new();
    if let Some(user_tags) = user_tags {
        for (key, value) in user_tags {
            if let Value::String(v) = value {
                tags.insert(key.clone(), json!(v));
            }
        }
    }
    Json::Object(tags)
}

/// Parse the tags object of a response
pub fn flatten_tags(tags: Option<&Json>) -> HashMap<String, Value> {
    let mut tags_map = HashMap::new();
    if let Some(Json::Object(tags)) = tags {
        for (key, value) in tags {
            if let Some(v) = value.as_str() {
                tags_map.insert(key.clone(), Value::String(v.to_string()));
            }
        }
    }
    tags_map
}

/// Convert JSON value to attribute Value
pub fn json_to_value(value: &Json) -> Option<Value> {
    match value {
        Json::String(s) => Some(Value::String(s.clone())),
        Json::Bool(b) => Some(Value::Bool(*b)),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Value::Int(i))
            } else {
                n.as_f64().map(Value::Float)
            }
        }
        Json::Array(arr) => {
            let items: Vec<Value> = arr.iter().filter_map(json_to_value).collect();
            Some(Value::List(items))
        }
        Json::Object(obj) => {
            let map: HashMap<String, Value> = obj
                .iter()
                .filter_map(|(k, v)| json_to_value(v).map(|v| (k.clone(), v)))
                .collect();
            Some(Value::Map(map))
        }
        Json::Null => None,
    }
}

/// Convert attribute Value to JSON value
pub fn value_to_json(value: &Value) -> Json {
    match value {
        Value::String(s) => json!(s),
        Value::Bool(b) => json!(b),
        Value::Int(i) => json!(i),
        Value::Float(f) => json!(f),
        Value::List(items) => Json::Array(items.iter().map(value_to_json).collect()),
        Value::Map(map) => Json::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), value_to_json(v)))
                .collect(),
        ),
    }
}

/// Look up a nested field by path (e.g. `["properties", "sku", "name"]`)
pub fn pointer<'a>(value: &'a Json, path: &[&str]) -> Option<&'a Json> {
    path.iter().try_fold(value, |current, key| current.get(*key))
}

pub fn str_at<'a>(value: &'a Json, path: &[&str]) -> Option<&'a str> {
    pointer(value, path).and_then(Json::as_str)
}

/// Insert `value` into `attributes` when the response carried the field
pub fn set_from(attributes: &mut HashMap<String, Value>, name: &str, value: Option<&Json>) {
    if let Some(v) = value.and_then(json_to_value) {
        attributes.insert(name.to_string(), v);
    }
}

/// Remove a nested field by path, returning it if it was present
pub fn remove_at(value: &mut Json, path: &[&str]) -> Option<Json> {
    let (last, parents) = path.split_last()?;
    let parent = parents
        .iter()
        .try_fold(value, |current, key| current.get_mut(*key))?;
    parent.as_object_mut()?.remove(*last)
}

/// Top-level fields of a GET response that the API computes
const READ_ONLY_FIELDS: [&str; 5] = ["id", "name", "type", "etag", "systemData"];

/// Drop computed fields from a fetched body before sending it back
pub fn strip_read_only(body: &mut Json) {
    if let Some(obj) = body.as_object_mut() {
        for key in READ_ONLY_FIELDS {
            obj.remove(key);
        }
    }
    remove_at(body, &["properties", "provisioningState"]);
}

/// Merge `patch` into `base`, replacing scalars and arrays, recursing into objects
pub fn merge_json(base: &mut Json, patch: Json) {
    match (base, patch) {
        (Json::Object(base), Json::Object(patch)) => {
            for (key, value) in patch {
                let recurse = value.is_object() && base.get(&key).is_some_and(Json::is_object);
                if recurse && let Some(existing) = base.get_mut(&key) {
                    merge_json(existing, value);
                } else {
                    base.insert(key, value);
                }
            }
        }
        (base, patch) => *base = patch,
    }
}

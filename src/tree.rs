//! Key search and replace over arbitrarily shaped response documents.
//!
//! Service responses nest their fields differently per service, so lookups walk the
//! whole tree instead of following a fixed path. Every occurrence is visited: a key
//! present at several depths yields several matches, in depth-first order, and a
//! replacement rewrites all of them.

use serde_json::Value;

/// JavaScript truthiness: `null`, `false`, `0` and `""` are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Every truthy value stored under `key`, at any depth.
pub fn find_values(tree: &Value, key: &str) -> Vec<Value> {
    let mut found = Vec::new();
    collect(tree, key, &mut found);
    found
}

fn collect(node: &Value, key: &str, found: &mut Vec<Value>) {
    match node {
        Value::Array(items) => {
            for item in items {
                collect(item, key, found);
            }
        }
        Value::Object(map) => {
            if let Some(value) = map.get(key).filter(|v| is_truthy(v)) {
                found.push(value.clone());
            }
            for child in map.values() {
                collect(child, key, found);
            }
        }
        _ => {}
    }
}

/// First match rendered as a string, `""` when there is none.
pub fn find_first_string(tree: &Value, key: &str) -> String {
    find_values(tree, key)
        .into_iter()
        .next()
        .map(|value| match value {
            Value::String(s) => s,
            other => other.to_string(),
        })
        .unwrap_or_default()
}

/// Overwrites every truthy occurrence of `key` with `value`.
pub fn set_values(tree: &mut Value, key: &str, value: &Value) {
    match tree {
        Value::Array(items) => {
            for item in items {
                set_values(item, key, value);
            }
        }
        Value::Object(map) => {
            if let Some(slot) = map.get_mut(key) {
                if is_truthy(slot) {
                    *slot = value.clone();
                }
            }
            for child in map.values_mut() {
                set_values(child, key, value);
            }
        }
        _ => {}
    }
}

//! Path operations on a JSON tree.
//!
//! Paths are `/`-separated. Writing `null` (or an empty object) removes a node,
//! and parents left empty by a removal are pruned so that an empty node never
//! exists, matching how the replicated store reports values.

use serde_json::{Map, Value};

use super::query::Query;

/// Key of the placeholder a store replaces with its own clock at write time
pub const SERVER_VALUE_KEY: &str = ".sv";

pub fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

pub fn join(base: &str, child: &str) -> String {
    match (base.trim_matches('/'), child.trim_matches('/')) {
        ("", child) => child.to_string(),
        (base, "") => base.to_string(),
        (base, child) => format!("{}/{}", base, child),
    }
}

pub fn get<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    get_segments(root, &segments(path))
}

pub fn get_segments<'a>(root: &'a Value, segs: &[&str]) -> Option<&'a Value> {
    let mut node = root;
    for seg in segs {
        node = node.as_object()?.get(*seg)?;
    }
    (!is_empty(node)).then_some(node)
}

pub fn set(root: &mut Value, path: &str, value: Value) {
    set_segments(root, &segments(path), value);
}

pub fn set_segments(node: &mut Value, segs: &[&str], value: Value) {
    let Some((head, rest)) = segs.split_first() else {
        *node = if is_empty(&value) { Value::Null } else { value };
        return;
    };
    if !node.is_object() {
        if is_empty(&value) {
            return;
        }
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        let child = map.entry(head.to_string()).or_insert(Value::Null);
        set_segments(child, rest, value);
        if is_empty(child) {
            map.remove(*head);
        }
    }
}

/// Merge-writes each field, where a field name may itself be a relative path
pub fn merge(root: &mut Value, path: &str, fields: Map<String, Value>) {
    for (field, value) in fields {
        set(root, &join(path, &field), value);
    }
}

pub fn increment(root: &mut Value, path: &str, delta: i64) -> i64 {
    let current = get(root, path).and_then(Value::as_i64).unwrap_or(0);
    let next = current + delta;
    set(root, path, Value::from(next));
    next
}

pub fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

pub fn is_server_timestamp(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|m| m.len() == 1 && m.get(SERVER_VALUE_KEY) == Some(&Value::from("timestamp")))
}

/// Replaces every server timestamp placeholder with `now_ms`
pub fn resolve_server_values(value: &mut Value, now_ms: i64) {
    if is_server_timestamp(value) {
        *value = Value::from(now_ms);
        return;
    }
    if let Value::Object(map) = value {
        for child in map.values_mut() {
            resolve_server_values(child, now_ms);
        }
    }
}

/// The value a watcher of `segs` sees, after applying its query
pub fn project(root: Option<&Value>, segs: &[&str], query: Option<&Query>) -> Option<Value> {
    let node = root.and_then(|r| get_segments(r, segs));
    match query {
        Some(query) => query.filter_node(node),
        None => node.cloned(),
    }
}

//! Metadata document helpers.
//!
//! Metadata is a schemaless `serde_json::Value` tree. This module provides
//! dot-path access, the token flattening used by the inverted index, and the
//! merge-patch semantics used by `update`.

use serde_json::{Map, Value};

/// Resolve a dot-notation path inside a metadata document.
///
/// Missing segments yield `None`, never an error.
pub fn get_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Set a dot-notation path, creating intermediate objects as needed.
///
/// Overwrites non-object intermediates.
pub fn set_path(doc: &mut Value, path: &str, value: Value) {
    if !doc.is_object() {
        *doc = Value::Object(Map::new());
    }
    let mut current = doc;
    let segments: Vec<&str> = path.split('.').collect();
    for (i, segment) in segments.iter().enumerate() {
        let map = current.as_object_mut().expect("object ensured above");
        if i == segments.len() - 1 {
            map.insert((*segment).to_string(), value);
            return;
        }
        let entry = map
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = entry;
    }
}

/// Merge `patch` into `doc` (RFC 7396 semantics).
///
/// Object values merge recursively; `null` in the patch removes the key;
/// everything else replaces. Last writer wins under concurrent merges.
pub fn merge_patch(doc: &mut Value, patch: &Value) {
    if let Value::Object(patch_map) = patch {
        if !doc.is_object() {
            *doc = Value::Object(Map::new());
        }
        let doc_map = doc.as_object_mut().expect("object ensured above");
        for (key, patch_value) in patch_map {
            if patch_value.is_null() {
                doc_map.remove(key);
            } else if patch_value.is_object() {
                let entry = doc_map
                    .entry(key.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                merge_patch(entry, patch_value);
            } else {
                doc_map.insert(key.clone(), patch_value.clone());
            }
        }
    } else {
        *doc = patch.clone();
    }
}

/// Flatten a metadata document into `(field-path, leaf)` pairs.
///
/// Scalars yield themselves; arrays yield one pair per element; nested
/// objects recurse with dot-joined paths. Object and empty-array nodes
/// produce no leaf pairs (presence is tracked separately by the index).
pub fn flatten(doc: &Value) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    flatten_into(doc, String::new(), &mut out);
    out
}

fn flatten_into(value: &Value, path: String, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                flatten_into(child, child_path, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                match item {
                    // Nested structures inside arrays flatten in place
                    Value::Object(_) | Value::Array(_) => {
                        flatten_into(item, path.clone(), out)
                    }
                    _ => out.push((path.clone(), item.clone())),
                }
            }
        }
        _ => {
            if !path.is_empty() {
                out.push((path, value.clone()));
            }
        }
    }
}

/// All field paths present in a document, including object-valued ones.
pub fn field_paths(doc: &Value) -> Vec<String> {
    let mut out = Vec::new();
    collect_paths(doc, String::new(), &mut out);
    out
}

fn collect_paths(value: &Value, path: String, out: &mut Vec<String>) {
    if let Value::Object(map) = value {
        for (key, child) in map {
            let child_path = if path.is_empty() {
                key.clone()
            } else {
                format!("{path}.{key}")
            };
            out.push(child_path.clone());
            collect_paths(child, child_path, out);
        }
    }
}

/// JSON type name used by the `type` predicate operator.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_path_nested() {
        let doc = json!({"a": {"b": {"c": 42}}});
        assert_eq!(get_path(&doc, "a.b.c"), Some(&json!(42)));
        assert_eq!(get_path(&doc, "a.b.missing"), None);
        assert_eq!(get_path(&doc, "a.b.c.d"), None);
    }

    #[test]
    fn test_set_path_creates_intermediates() {
        let mut doc = json!({});
        set_path(&mut doc, "a.b.c", json!(1));
        assert_eq!(doc, json!({"a": {"b": {"c": 1}}}));
    }

    #[test]
    fn test_merge_patch_semantics() {
        let mut doc = json!({"name": "old", "nested": {"keep": 1, "drop": 2}});
        merge_patch(
            &mut doc,
            &json!({"name": "new", "nested": {"drop": null}, "added": true}),
        );
        assert_eq!(
            doc,
            json!({"name": "new", "nested": {"keep": 1}, "added": true})
        );
    }

    #[test]
    fn test_flatten_arrays_and_nesting() {
        let doc = json!({
            "category": "electronics",
            "price": 299,
            "features": ["bluetooth", "noise_canceling"],
            "specs": {"weight": 1.5}
        });
        let mut flat = flatten(&doc);
        flat.sort_by(|a, b| a.0.cmp(&b.0));

        assert!(flat.contains(&("category".to_string(), json!("electronics"))));
        assert!(flat.contains(&("features".to_string(), json!("bluetooth"))));
        assert!(flat.contains(&("features".to_string(), json!("noise_canceling"))));
        assert!(flat.contains(&("specs.weight".to_string(), json!(1.5))));
    }

    #[test]
    fn test_type_names() {
        assert_eq!(json_type_name(&json!(null)), "null");
        assert_eq!(json_type_name(&json!([1])), "array");
        assert_eq!(json_type_name(&json!(1.5)), "number");
    }
}

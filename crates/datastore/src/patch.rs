//! Merge-patch diffing over JSON values.
//!
//! The diff is backward-looking: applying `diff(new, old)` to `new`
//! yields `old` again, which is what record history stores. Structural
//! recursion on objects only; arrays are atomic scalars and are
//! replaced whole. A `null` in a patch deletes the key it names.

use serde_json::{Map, Value};

/// Computes the merge-patch that turns `new` back into `old`.
///
/// Keys the new version changed or dropped map to their old values;
/// keys the new version added map to `null`. Keys are emitted in the
/// iteration order of `new` first, then old-only keys.
#[must_use]
pub fn diff(new: &Value, old: &Value) -> Value {
    match (new, old) {
        (Value::Object(new_map), Value::Object(old_map)) => {
            let mut patch = Map::new();
            for (key, new_val) in new_map {
                match old_map.get(key) {
                    None => {
                        patch.insert(key.clone(), Value::Null);
                    }
                    Some(old_val) if old_val == new_val => {}
                    Some(old_val) => {
                        if new_val.is_object() && old_val.is_object() {
                            patch.insert(key.clone(), diff(new_val, old_val));
                        } else {
                            patch.insert(key.clone(), old_val.clone());
                        }
                    }
                }
            }
            for (key, old_val) in old_map {
                if !new_map.contains_key(key) {
                    patch.insert(key.clone(), old_val.clone());
                }
            }
            Value::Object(patch)
        }
        _ => old.clone(),
    }
}

/// Applies a merge-patch to `target`.
#[must_use]
pub fn apply(target: &Value, patch: &Value) -> Value {
    match patch {
        Value::Object(patch_map) => {
            let mut out = match target {
                Value::Object(map) => map.clone(),
                _ => Map::new(),
            };
            for (key, patch_val) in patch_map {
                match patch_val {
                    Value::Null => {
                        out.remove(key);
                    }
                    Value::Object(_) => {
                        let merged = apply(out.get(key).unwrap_or(&Value::Null), patch_val);
                        out.insert(key.clone(), merged);
                    }
                    other => {
                        out.insert(key.clone(), other.clone());
                    }
                }
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

/// True when the patch would change nothing.
#[must_use]
pub fn is_empty(patch: &Value) -> bool {
    patch.as_object().is_some_and(Map::is_empty)
}

/// Flattens a diff into the dotted leaf paths reported to telemetry.
///
/// Paths follow the patch's own key order (which [`diff`] builds by
/// walking the new value first), descending depth-first into changed
/// sub-objects. A field whose new value is an array is reported by
/// name only.
#[must_use]
pub fn field_paths(patch: &Value, new: &Value) -> Vec<String> {
    let mut paths = Vec::new();
    collect_paths(patch, new, "", &mut paths);
    paths
}

fn collect_paths(patch: &Value, new: &Value, prefix: &str, paths: &mut Vec<String>) {
    let Value::Object(patch_map) = patch else {
        return;
    };
    for (key, patch_val) in patch_map {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        let new_val = new.get(key);
        let new_is_array = new_val.is_some_and(Value::is_array);
        if !new_is_array && patch_val.is_object() && new_val.is_some_and(Value::is_object) {
            collect_paths(patch_val, new_val.unwrap_or(&Value::Null), &path, paths);
        } else {
            paths.push(path);
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use serde_json::json;

    #[test]
    fn test_diff_of_equal_values_is_empty() {
        let value = json!({"kind": "login", "username": "foo"});
        let patch = diff(&value, &value);
        assert!(is_empty(&patch));
    }

    #[test]
    fn test_diff_records_old_values() {
        let old = json!({"kind": "login", "username": "foo", "password": "bar"});
        let new = json!({"kind": "login", "username": "foo", "password": "baz"});
        assert_eq!(diff(&new, &old), json!({"password": "bar"}));
    }

    #[test]
    fn test_diff_marks_added_keys_with_null() {
        let old = json!({"kind": "note"});
        let new = json!({"kind": "note", "body": "hello"});
        assert_eq!(diff(&new, &old), json!({"body": null}));
    }

    #[test]
    fn test_diff_restores_removed_keys() {
        let old = json!({"kind": "note", "body": "hello"});
        let new = json!({"kind": "note"});
        assert_eq!(diff(&new, &old), json!({"body": "hello"}));
    }

    #[test]
    fn test_diff_recurses_into_objects_and_treats_arrays_whole() {
        let old = json!({"nested": {"a": 1, "b": 2}, "list": [1, 2, 3]});
        let new = json!({"nested": {"a": 1, "b": 9}, "list": [1, 2, 3, 4]});
        assert_eq!(
            diff(&new, &old),
            json!({"nested": {"b": 2}, "list": [1, 2, 3]})
        );
    }

    #[test]
    fn test_apply_reverses_diff() {
        let old = json!({
            "kind": "login",
            "username": "alice",
            "password": "old-secret",
            "extra": {"note": "keep", "pin": "1234"}
        });
        let new = json!({
            "kind": "login",
            "username": "alice@example.com",
            "password": "new-secret",
            "extra": {"note": "keep"},
            "totp": "seed"
        });
        let patch = diff(&new, &old);
        assert_eq!(apply(&new, &patch), old);
    }

    #[test]
    fn test_apply_null_deletes_and_scalar_replaces() {
        let target = json!({"a": 1, "b": 2});
        let patch = json!({"a": null, "b": 3, "c": 4});
        assert_eq!(apply(&target, &patch), json!({"b": 3, "c": 4}));
    }

    #[test]
    fn test_apply_non_object_patch_replaces_whole() {
        let target = json!({"a": 1});
        assert_eq!(apply(&target, &json!("scalar")), json!("scalar"));
    }

    #[test]
    fn test_field_paths_order_and_arrays_by_name() {
        let old = json!({
            "title": "Old",
            "entry": {"kind": "login", "username": "a", "password": "b"},
            "origins": ["https://old.example.com"],
            "tags": []
        });
        let new = json!({
            "title": "New",
            "entry": {"kind": "login", "username": "a2", "password": "b2"},
            "origins": ["https://new.example.com"],
            "tags": []
        });
        let patch = diff(&new, &old);
        assert_eq!(
            field_paths(&patch, &new),
            vec!["title", "entry.username", "entry.password", "origins"]
        );
    }

    #[test]
    fn test_field_paths_empty_for_empty_diff() {
        let value = json!({"title": "Same"});
        let patch = diff(&value, &value);
        assert!(field_paths(&patch, &value).is_empty());
    }
}

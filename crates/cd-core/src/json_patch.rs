//! JSON equivalence and the RFC-6902 patch engine, plus Central Dogma's
//! `safeReplace`/`removeIfExists` extensions (C4).

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::error::CoreError;
use crate::model::JsonPatchOp;

// ---------------------------------------------------------------------------
// Equivalence
// ---------------------------------------------------------------------------

/// Two JSON values are equivalent iff structurally equal, with numeric
/// nodes compared by numeric value (`1` ≡ `1.0`) and object key order
/// irrelevant.
#[must_use]
pub fn equivalent(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => numbers_equal(x, y),
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|other| equivalent(v, other)))
        }
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(v, o)| equivalent(v, o))
        }
        _ => a == b,
    }
}

fn numbers_equal(a: &serde_json::Number, b: &serde_json::Number) -> bool {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return x == y;
    }
    // Fall through to float comparison so `1` ≡ `1.0` regardless of which
    // side parsed as an integer.
    let (x, y) = (a.as_f64(), b.as_f64());
    matches!((x, y), (Some(x), Some(y)) if (x - y).abs() == 0.0)
}

/// Canonical string form used as a hash-map key for equivalence lookups
/// (e.g. the `unchanged_values` table in [`crate::differ`]'s patch
/// generation). Two equivalent values always produce the same key.
#[must_use]
pub fn canonical_key(value: &Value) -> String {
    fn canonicalize(value: &Value) -> Value {
        match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Number(i.into())
                } else {
                    value.clone()
                }
            }
            Value::Object(map) => {
                // serde_json's default `Map` (no `preserve_order` feature)
                // already iterates in sorted key order.
                let canon: Map<String, Value> =
                    map.iter().map(|(k, v)| (k.clone(), canonicalize(v))).collect();
                Value::Object(canon)
            }
            Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
            _ => value.clone(),
        }
    }
    canonicalize(value).to_string()
}

// ---------------------------------------------------------------------------
// JSON Pointer (RFC 6901) navigation
// ---------------------------------------------------------------------------

fn parse_pointer(path: &str) -> Vec<String> {
    if path.is_empty() {
        return Vec::new();
    }
    path.trim_start_matches('/')
        .split('/')
        .map(|tok| tok.replace("~1", "/").replace("~0", "~"))
        .collect()
}

fn get<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let tokens = parse_pointer(path);
    let mut current = doc;
    for token in tokens {
        current = match current {
            Value::Object(map) => map.get(&token)?,
            Value::Array(items) => {
                let idx: usize = token.parse().ok()?;
                items.get(idx)?
            }
            _ => return None,
        };
    }
    Some(current)
}

/// Navigate to the parent container of the final pointer segment, returning
/// `(parent, last_token)`. `None` parent means `path` is the document root.
fn get_parent_mut<'a>(doc: &'a mut Value, path: &str) -> Option<(&'a mut Value, String)> {
    let mut tokens = parse_pointer(path);
    let last = tokens.pop()?;
    let mut current = doc;
    for token in tokens {
        current = match current {
            Value::Object(map) => map.get_mut(&token)?,
            Value::Array(items) => {
                let idx: usize = token.parse().ok()?;
                items.get_mut(idx)?
            }
            _ => return None,
        };
    }
    Some((current, last))
}

fn insert_at(doc: &mut Value, path: &str, value: Value) -> Result<(), String> {
    if path.is_empty() {
        *doc = value;
        return Ok(());
    }
    let (parent, token) =
        get_parent_mut(doc, path).ok_or_else(|| format!("parent of '{path}' does not exist"))?;
    match parent {
        Value::Object(map) => {
            map.insert(token, value);
            Ok(())
        }
        Value::Array(items) => {
            if token == "-" {
                items.push(value);
                return Ok(());
            }
            let idx: usize = token
                .parse()
                .map_err(|_| format!("'{token}' is not a valid array index"))?;
            if idx > items.len() {
                return Err(format!(
                    "index {idx} is out of bounds for array of length {}",
                    items.len()
                ));
            }
            items.insert(idx, value);
            Ok(())
        }
        _ => Err(format!("'{path}' does not name a container")),
    }
}

fn remove_at(doc: &mut Value, path: &str, require_present: bool) -> Result<Option<Value>, String> {
    if path.is_empty() {
        let old = std::mem::replace(doc, Value::Null);
        return Ok(Some(old));
    }
    let Some((parent, token)) = get_parent_mut(doc, path) else {
        return if require_present {
            Err(format!("'{path}' does not exist"))
        } else {
            Ok(None)
        };
    };
    match parent {
        Value::Object(map) => match map.remove(&token) {
            Some(v) => Ok(Some(v)),
            None if require_present => Err(format!("'{path}' does not exist")),
            None => Ok(None),
        },
        Value::Array(items) => {
            let Ok(idx) = token.parse::<usize>() else {
                return if require_present {
                    Err(format!("'{token}' is not a valid array index"))
                } else {
                    Ok(None)
                };
            };
            if idx >= items.len() {
                return if require_present {
                    Err(format!("index {idx} is out of bounds"))
                } else {
                    Ok(None)
                };
            }
            Ok(Some(items.remove(idx)))
        }
        _ => {
            if require_present {
                Err(format!("'{path}' does not exist"))
            } else {
                Ok(None)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Apply
// ---------------------------------------------------------------------------

/// Apply a patch to `doc`, returning the resulting document.
///
/// Operations execute in order; the first failure aborts and reports the
/// offending operation's index.
///
/// # Errors
/// Returns [`CoreError::JsonPatchError`] on the first operation that fails.
pub fn apply(patch: &[JsonPatchOp], doc: Value) -> Result<Value, CoreError> {
    let mut current = doc;
    for (op_index, op) in patch.iter().enumerate() {
        apply_one(op, &mut current).map_err(|reason| CoreError::JsonPatchError {
            op_index,
            reason,
        })?;
    }
    Ok(current)
}

fn apply_one(op: &JsonPatchOp, doc: &mut Value) -> Result<(), String> {
    match op {
        JsonPatchOp::Add { path, value } => insert_at(doc, path, value.clone()),
        JsonPatchOp::Remove { path } => remove_at(doc, path, true).map(|_| ()),
        JsonPatchOp::RemoveIfExists { path } => remove_at(doc, path, false).map(|_| ()),
        JsonPatchOp::Replace { path, value } => {
            if get(doc, path).is_none() {
                return Err(format!("'{path}' does not exist"));
            }
            insert_at(doc, path, value.clone())
        }
        JsonPatchOp::Move { from, path } => {
            let value = remove_at(doc, from, true)?.expect("require_present guarantees Some");
            insert_at(doc, path, value)
        }
        JsonPatchOp::Copy { from, path } => {
            let value = get(doc, from)
                .ok_or_else(|| format!("'{from}' does not exist"))?
                .clone();
            insert_at(doc, path, value)
        }
        JsonPatchOp::Test { path, value } => {
            let current = get(doc, path).ok_or_else(|| format!("'{path}' does not exist"))?;
            if equivalent(current, value) {
                Ok(())
            } else {
                Err(format!("value at '{path}' is not equivalent to the tested value"))
            }
        }
        JsonPatchOp::SafeReplace { path, old, new } => {
            let current = get(doc, path).cloned().unwrap_or(Value::Null);
            if !equivalent(&current, old) {
                return Err(format!(
                    "safeReplace test failed: value at '{path}' does not match the expected old value"
                ));
            }
            insert_at(doc, path, new.clone())
        }
    }
}

/// Weight/cost hint used by the result cache (C9): number of operations.
#[must_use]
pub fn patch_weight(patch: &[JsonPatchOp]) -> usize {
    patch.len()
}

// Re-exported for `differ`'s patch-generation algorithm, which needs a
// cheap way to tell whether a value's canonical form already appears
// somewhere in the source tree.
pub(crate) type UnchangedValues = HashMap<String, String>;

// ---------------------------------------------------------------------------
// Generate
// ---------------------------------------------------------------------------

/// How `generate` emits a leaf-level change between two non-equivalent
/// scalars (or container/scalar mismatches).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatchMode {
    /// Plain `replace`.
    Rfc6902,
    /// `safeReplace`, so a concurrent producer racing the same base is
    /// detected rather than silently overwritten.
    Safe,
}

fn escape_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

/// Produce a patch that, applied to `source`, yields `target`.
///
/// Field/element removals and recursion always emit `remove`; replacements
/// of a leaf value are governed by `mode`. While emitting an `add` whose
/// value is a container, a value equivalent to one still unchanged
/// elsewhere in the tree is substituted with a `copy` from that location.
#[must_use]
pub fn generate(source: &Value, target: &Value, mode: PatchMode) -> Vec<JsonPatchOp> {
    let mut unchanged = UnchangedValues::new();
    collect_unchanged(source, target, "", &mut unchanged);

    let mut ops = Vec::new();
    generate_at(source, target, "", mode, &unchanged, &mut ops);
    ops
}

/// Record, for every position where `source` and `target` agree, the
/// canonical key of the shared value mapped to its (stable) source
/// pointer — consulted later so a fresh `add` can reuse it via `copy`.
fn collect_unchanged(source: &Value, target: &Value, pointer: &str, map: &mut UnchangedValues) {
    if equivalent(source, target) {
        map.entry(canonical_key(source)).or_insert_with(|| pointer.to_owned());
        return;
    }
    match (source, target) {
        (Value::Object(s), Value::Object(t)) => {
            for (key, value) in s {
                if let Some(other) = t.get(key) {
                    collect_unchanged(value, other, &format!("{pointer}/{}", escape_token(key)), map);
                }
            }
        }
        (Value::Array(s), Value::Array(t)) => {
            for (i, (value, other)) in s.iter().zip(t).enumerate() {
                collect_unchanged(value, other, &format!("{pointer}/{i}"), map);
            }
        }
        _ => {}
    }
}

fn emit_add(path: String, value: &Value, unchanged: &UnchangedValues, ops: &mut Vec<JsonPatchOp>) {
    if value.is_object() || value.is_array() {
        if let Some(from) = unchanged.get(&canonical_key(value)) {
            ops.push(JsonPatchOp::Copy {
                from: from.clone(),
                path,
            });
            return;
        }
    }
    ops.push(JsonPatchOp::Add {
        path,
        value: value.clone(),
    });
}

fn generate_at(
    source: &Value,
    target: &Value,
    pointer: &str,
    mode: PatchMode,
    unchanged: &UnchangedValues,
    ops: &mut Vec<JsonPatchOp>,
) {
    if equivalent(source, target) {
        return;
    }

    match (source, target) {
        (Value::Object(s), Value::Object(t)) => {
            let mut removed: Vec<&String> = s.keys().filter(|k| !t.contains_key(*k)).collect();
            removed.sort();
            for key in removed {
                ops.push(JsonPatchOp::Remove {
                    path: format!("{pointer}/{}", escape_token(key)),
                });
            }

            let mut added: Vec<&String> = t.keys().filter(|k| !s.contains_key(*k)).collect();
            added.sort();
            for key in added {
                let path = format!("{pointer}/{}", escape_token(key));
                emit_add(path, &t[key], unchanged, ops);
            }

            let mut common: Vec<&String> = s.keys().filter(|k| t.contains_key(*k)).collect();
            common.sort();
            for key in common {
                generate_at(
                    &s[key],
                    &t[key],
                    &format!("{pointer}/{}", escape_token(key)),
                    mode,
                    unchanged,
                    ops,
                );
            }
        }
        (Value::Array(s), Value::Array(t)) => {
            let k = s.len().min(t.len());
            for _ in k..s.len() {
                ops.push(JsonPatchOp::Remove {
                    path: format!("{pointer}/{k}"),
                });
            }
            for i in 0..k {
                generate_at(&s[i], &t[i], &format!("{pointer}/{i}"), mode, unchanged, ops);
            }
            for item in &t[k..] {
                emit_add(format!("{pointer}/-"), item, unchanged, ops);
            }
        }
        _ => match mode {
            PatchMode::Rfc6902 => ops.push(JsonPatchOp::Replace {
                path: pointer.to_owned(),
                value: target.clone(),
            }),
            PatchMode::Safe => ops.push(JsonPatchOp::SafeReplace {
                path: pointer.to_owned(),
                old: source.clone(),
                new: target.clone(),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn equivalent_tolerates_numeric_form() {
        assert!(equivalent(&json!(1), &json!(1.0)));
    }

    #[test]
    fn equivalent_ignores_object_key_order() {
        assert!(equivalent(&json!({"a": 1, "b": 2}), &json!({"b": 2, "a": 1})));
    }

    #[test]
    fn equivalent_rejects_different_arrays() {
        assert!(!equivalent(&json!([1, 2]), &json!([2, 1])));
    }

    #[test]
    fn add_at_end_of_array_appends() {
        let mut doc = json!([1, 2]);
        insert_at(&mut doc, "/2", json!(3)).unwrap();
        assert_eq!(doc, json!([1, 2, 3]));
    }

    #[test]
    fn add_past_end_of_array_errors() {
        let mut doc = json!([1, 2]);
        assert!(insert_at(&mut doc, "/5", json!(3)).is_err());
    }

    #[test]
    fn add_dash_appends() {
        let mut doc = json!([1, 2]);
        insert_at(&mut doc, "/-", json!(3)).unwrap();
        assert_eq!(doc, json!([1, 2, 3]));
    }

    #[test]
    fn add_to_existing_key_replaces() {
        let patch = vec![JsonPatchOp::Add {
            path: "/a".to_owned(),
            value: json!(2),
        }];
        let result = apply(&patch, json!({"a": 1})).unwrap();
        assert_eq!(result, json!({"a": 2}));
    }

    #[test]
    fn remove_errors_if_absent() {
        let patch = vec![JsonPatchOp::Remove {
            path: "/missing".to_owned(),
        }];
        assert!(apply(&patch, json!({})).is_err());
    }

    #[test]
    fn remove_if_exists_is_noop_when_absent() {
        let patch = vec![JsonPatchOp::RemoveIfExists {
            path: "/missing".to_owned(),
        }];
        let result = apply(&patch, json!({"a": 1})).unwrap();
        assert_eq!(result, json!({"a": 1}));
    }

    #[test]
    fn test_op_checks_numeric_equivalence() {
        let patch = vec![JsonPatchOp::Test {
            path: "/a".to_owned(),
            value: json!(1.0),
        }];
        assert!(apply(&patch, json!({"a": 1})).is_ok());
    }

    #[test]
    fn safe_replace_errors_when_stale() {
        let patch = vec![JsonPatchOp::SafeReplace {
            path: "/a".to_owned(),
            old: json!(1),
            new: json!(2),
        }];
        assert!(apply(&patch, json!({"a": 2})).is_err());
    }

    #[test]
    fn safe_replace_succeeds_when_matching() {
        let patch = vec![JsonPatchOp::SafeReplace {
            path: "/a".to_owned(),
            old: json!(1),
            new: json!(2),
        }];
        let result = apply(&patch, json!({"a": 1})).unwrap();
        assert_eq!(result, json!({"a": 2}));
    }

    #[test]
    fn copy_and_move_error_on_missing_source() {
        let copy = vec![JsonPatchOp::Copy {
            from: "/missing".to_owned(),
            path: "/a".to_owned(),
        }];
        assert!(apply(&copy, json!({})).is_err());

        let mv = vec![JsonPatchOp::Move {
            from: "/missing".to_owned(),
            path: "/a".to_owned(),
        }];
        assert!(apply(&mv, json!({})).is_err());
    }

    #[test]
    fn error_reports_offending_operation_index() {
        let patch = vec![
            JsonPatchOp::Add {
                path: "/a".to_owned(),
                value: json!(1),
            },
            JsonPatchOp::Remove {
                path: "/missing".to_owned(),
            },
        ];
        let err = apply(&patch, json!({})).unwrap_err();
        match err {
            CoreError::JsonPatchError { op_index, .. } => assert_eq!(op_index, 1),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn generate_emits_nothing_for_equivalent_documents() {
        let patch = generate(&json!({"a": 1}), &json!({"a": 1.0}), PatchMode::Rfc6902);
        assert!(patch.is_empty());
    }

    #[test]
    fn generate_substitutes_copy_for_an_unchanged_sibling() {
        let source = json!({"a": {"x": 1}, "b": {"x": 1}});
        let target = json!({"b": {"x": 1}, "c": {"x": 1}});
        let patch = generate(&source, &target, PatchMode::Rfc6902);

        assert_eq!(
            patch,
            vec![
                JsonPatchOp::Remove {
                    path: "/a".to_owned()
                },
                JsonPatchOp::Copy {
                    from: "/b".to_owned(),
                    path: "/c".to_owned()
                },
            ]
        );
        assert_eq!(apply(&patch, source).unwrap(), target);
    }

    #[test]
    fn generate_round_trips_nested_object_mutation() {
        let source = json!({"a": {"x": 1, "y": 2}, "b": [1, 2, 3]});
        let target = json!({"a": {"x": 1, "y": 3}, "b": [1, 2], "c": true});
        let patch = generate(&source, &target, PatchMode::Rfc6902);
        assert_eq!(apply(&patch, source).unwrap(), target);
    }

    #[test]
    fn generate_safe_mode_emits_safe_replace_for_scalar_change() {
        let patch = generate(&json!({"a": 1}), &json!({"a": 2}), PatchMode::Safe);
        assert_eq!(
            patch,
            vec![JsonPatchOp::SafeReplace {
                path: "/a".to_owned(),
                old: json!(1),
                new: json!(2),
            }]
        );
    }

    #[test]
    fn generate_array_shrink_removes_from_the_truncation_point() {
        let source = json!([1, 2, 3, 4]);
        let target = json!([1, 2]);
        let patch = generate(&source, &target, PatchMode::Rfc6902);
        assert_eq!(apply(&patch, source).unwrap(), target);
    }

    #[test]
    fn generate_type_mismatch_is_a_replace() {
        let patch = generate(&json!({"a": 1}), &json!([1, 2]), PatchMode::Rfc6902);
        assert_eq!(
            patch,
            vec![JsonPatchOp::Replace {
                path: String::new(),
                value: json!([1, 2]),
            }]
        );
    }
}

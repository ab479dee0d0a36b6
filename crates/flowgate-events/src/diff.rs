//! Top-level field diffs between two JSON snapshots of an entity.

use serde_json::Value;

/// Names of the top-level fields that differ between `before` and `after`,
/// in field-name order. Fields present in only one side count as changed.
pub fn changed_fields(before: &Value, after: &Value) -> Vec<String> {
    let empty = serde_json::Map::new();
    let before = before.as_object().unwrap_or(&empty);
    let after = after.as_object().unwrap_or(&empty);

    let mut changed: Vec<String> = after
        .iter()
        .filter(|(key, value)| before.get(*key) != Some(*value))
        .map(|(key, _)| key.clone())
        .collect();
    changed.extend(
        before
            .keys()
            .filter(|key| !after.contains_key(*key))
            .cloned(),
    );
    changed.sort();
    changed
}

/// Fields of `after` that differ from their empty value (`null`, `false`,
/// `0`, `""`, `[]`, `{}`).
pub fn changed_fields_from_empty(after: &Value) -> Vec<String> {
    let mut changed: Vec<String> = after
        .as_object()
        .into_iter()
        .flatten()
        .filter(|(_, value)| !is_empty_value(value))
        .map(|(key, _)| key.clone())
        .collect();
    changed.sort();
    changed
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

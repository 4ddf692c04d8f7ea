use serde_json::{Map, Value};

/// Recursively fills `target` with values from `defaults`.
///
/// Nested objects are merged key by key. A key already present in `target`
/// keeps its value unless `force_override` says otherwise; a key absent from
/// `target` is copied from `defaults` unless `ignore` rejects it. Arrays are
/// never merged element-wise, only filled in when wholly absent.
pub fn apply_defaults(
    target: &mut Map<String, Value>,
    defaults: &Map<String, Value>,
    ignore: &dyn Fn(&str, &Value) -> bool,
    force_override: &dyn Fn(&str, &Value) -> bool,
) {
    for (key, default_value) in defaults {
        if let Some(existing) = target.get_mut(key) {
            match (existing, default_value) {
                (Value::Object(existing_map), Value::Object(default_map)) => {
                    apply_defaults(existing_map, default_map, ignore, force_override);
                }
                (existing, default_value) => {
                    if force_override(key, existing) {
                        *existing = default_value.clone();
                    }
                }
            }
        } else if !ignore(key, default_value) {
            target.insert(key.clone(), default_value.clone());
        }
    }
}

/// Predicate that matches nothing, for call sites without skip/override rules.
pub fn never(_key: &str, _value: &Value) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn merged(target: Value, defaults: Value) -> Value {
        let mut target = obj(target);
        apply_defaults(&mut target, &obj(defaults), &never, &never);
        Value::Object(target)
    }

    #[test]
    fn test_missing_keys_are_filled() {
        assert_eq!(merged(json!({}), json!({"a": "b"})), json!({"a": "b"}));
    }

    #[test]
    fn test_present_keys_win() {
        assert_eq!(merged(json!({"a": "b"}), json!({"a": "c"})), json!({"a": "b"}));
        assert_eq!(merged(json!({"a": ""}), json!({"a": "b"})), json!({"a": ""}));
        assert_eq!(
            merged(json!({"a": {"b": false}}), json!({"a": {"b": true}})),
            json!({"a": {"b": false}})
        );
    }

    #[test]
    fn test_nested_objects_merge_key_by_key() {
        assert_eq!(
            merged(json!({"a": {"x": 1}}), json!({"a": {"x": 0, "y": 2}})),
            json!({"a": {"x": 1, "y": 2}})
        );
    }

    #[test]
    fn test_ignore_predicate_skips_keys() {
        let mut target = obj(json!({}));
        apply_defaults(&mut target, &obj(json!({"a": "b"})), &|k, _| k == "a", &never);
        assert_eq!(Value::Object(target), json!({}));
    }

    #[test]
    fn test_override_predicate_forces_defaults() {
        let blank = |_: &str, v: &Value| v.as_str() == Some("");
        let mut target = obj(json!({"a": ""}));
        apply_defaults(&mut target, &obj(json!({"a": "b"})), &never, &blank);
        assert_eq!(Value::Object(target), json!({"a": "b"}));

        // null does not match the blank-string predicate
        let mut target = obj(json!({"a": null}));
        apply_defaults(&mut target, &obj(json!({"a": "b"})), &never, &blank);
        assert_eq!(Value::Object(target), json!({"a": null}));
    }

    #[test]
    fn test_arrays_are_filled_but_never_merged() {
        assert_eq!(
            merged(json!({"a": [1]}), json!({"a": [1, 2, 3]})),
            json!({"a": [1]})
        );
        assert_eq!(merged(json!({}), json!({"a": [1, 2]})), json!({"a": [1, 2]}));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let defaults = json!({"a": "b", "nested": {"x": 1, "y": [2, 3]}});
        let once = merged(json!({"a": "", "nested": {"x": 9}}), defaults.clone());
        let twice = merged(once.clone(), defaults);
        assert_eq!(once, twice);
    }
}

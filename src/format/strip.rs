use serde_json::Value;

/// Recursively removes `null`, empty strings, empty arrays, and objects that
/// become empty after stripping. Preserves `false`, `0`, and non-empty
/// primitives. Idempotent: `strip(strip(x)) == strip(x)`.
pub fn strip_empty(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::String(s) if s.is_empty() => Value::Null,
        Value::Array(items) => {
            let stripped: Vec<Value> = items
                .iter()
                .map(strip_empty)
                .filter(|v| !v.is_null())
                .collect();
            if stripped.is_empty() {
                Value::Null
            } else {
                Value::Array(stripped)
            }
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (key, val) in map {
                let stripped = strip_empty(val);
                if !stripped.is_null() {
                    out.insert(key.clone(), stripped);
                }
            }
            if out.is_empty() {
                Value::Null
            } else {
                Value::Object(out)
            }
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn drops_null_empty_string_empty_array_and_empty_object() {
        let input = json!({
            "a": null,
            "b": "",
            "c": [],
            "d": {},
            "e": "kept",
            "f": false,
            "g": 0,
        });
        let stripped = strip_empty(&input);
        assert_eq!(
            stripped,
            json!({
                "e": "kept",
                "f": false,
                "g": 0,
            })
        );
    }

    #[test]
    fn nested_structures_strip_recursively() {
        let input = json!({
            "outer": {
                "inner_empty": "",
                "inner_kept": "x"
            },
            "list": ["", null, "y"]
        });
        let stripped = strip_empty(&input);
        assert_eq!(
            stripped,
            json!({
                "outer": { "inner_kept": "x" },
                "list": ["y"]
            })
        );
    }

    #[test]
    fn stripping_is_idempotent() {
        let input = json!({
            "a": "",
            "b": { "c": [] },
            "d": [null, "x", {}],
            "e": false,
        });
        let once = strip_empty(&input);
        let twice = strip_empty(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn object_that_becomes_empty_after_stripping_is_dropped() {
        let input = json!({ "parent": { "child": "" } });
        let stripped = strip_empty(&input);
        assert_eq!(stripped, Value::Null);
    }
}

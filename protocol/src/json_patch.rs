use serde_json::{Map, Value};

/// Produces the minimal JSON Merge Patch (RFC 7396) document such that
/// applying it to `before` yields `after`. Used to compute the `changes`
/// field on move commands (spec.md §4.8/§9).
pub fn diff(before: &Value, after: &Value) -> Value {
    match (before, after) {
        (Value::Object(before_map), Value::Object(after_map)) => {
            Value::Object(diff_objects(before_map, after_map))
        }
        _ if before == after => Value::Object(Map::new()),
        _ => after.clone(),
    }
}

fn diff_objects(before: &Map<String, Value>, after: &Map<String, Value>) -> Map<String, Value> {
    let mut patch = Map::new();

    for key in before.keys() {
        if !after.contains_key(key) {
            patch.insert(key.clone(), Value::Null);
        }
    }

    for (key, after_value) in after {
        match before.get(key) {
            None => {
                patch.insert(key.clone(), after_value.clone());
            }
            Some(before_value) if before_value != after_value => {
                let nested = diff(before_value, after_value);
                patch.insert(key.clone(), nested);
            }
            _ => {}
        }
    }

    patch
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unchanged_documents_produce_an_empty_patch() {
        let doc = serde_json::json!({"a": 1, "b": {"c": 2}});
        assert_eq!(diff(&doc, &doc), serde_json::json!({}));
    }

    #[test]
    fn changed_scalar_field_is_included() {
        let before = serde_json::json!({"position": {"x": 1.0, "y": 2.0}});
        let after = serde_json::json!({"position": {"x": 3.0, "y": 2.0}});
        let patch = diff(&before, &after);
        assert_eq!(patch, serde_json::json!({"position": {"x": 3.0}}));
    }

    #[test]
    fn removed_field_becomes_null() {
        let before = serde_json::json!({"a": 1, "b": 2});
        let after = serde_json::json!({"a": 1});
        assert_eq!(diff(&before, &after), serde_json::json!({"b": null}));
    }

    #[test]
    fn added_field_is_included_whole() {
        let before = serde_json::json!({"a": 1});
        let after = serde_json::json!({"a": 1, "b": 2});
        assert_eq!(diff(&before, &after), serde_json::json!({"b": 2}));
    }
}

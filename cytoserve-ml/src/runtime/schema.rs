//! Fields the runtime's description parser refuses.

use serde_json::Value;

/// Keys the runtime does not understand anywhere in a description.
pub const UNSUPPORTED_FIELDS: &[&str] = &[
    "batch_shape",
    "batch_input_shape",
    "dtype_policy",
    "module",
    "registered_name",
    "synchronized",
];

/// Find the first unsupported field in `description`, depth-first.
///
/// Returns `(field, json_path)`. A `dtype` holding a policy object rather
/// than a dtype name also counts as unsupported.
pub fn find_unsupported(description: &Value) -> Option<(String, String)> {
    find_at(description, "$")
}

fn find_at(value: &Value, path: &str) -> Option<(String, String)> {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if UNSUPPORTED_FIELDS.contains(&key.as_str())
                    || (key == "dtype" && child.is_object())
                {
                    return Some((key.clone(), path.to_string()));
                }
            }
            map.iter()
                .find_map(|(key, child)| find_at(child, &format!("{path}.{key}")))
        }
        Value::Array(items) => items
            .iter()
            .enumerate()
            .find_map(|(i, item)| find_at(item, &format!("{path}[{i}]"))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_clean_description() {
        let desc = json!({"config": {"layers": [{"config": {"input_shape": [8, 8, 3], "dtype": "float32"}}]}});
        assert_eq!(find_unsupported(&desc), None);
    }

    #[test]
    fn test_nested_batch_shape_reported_with_path() {
        let desc = json!({"config": {"layers": [{"config": {"batch_shape": [null, 8, 8, 3]}}]}});
        assert_eq!(
            find_unsupported(&desc),
            Some((
                "batch_shape".to_string(),
                "$.config.layers[0].config".to_string()
            ))
        );
    }

    #[test]
    fn test_dtype_policy_object_reported() {
        let desc = json!({"dtype": {"class_name": "DTypePolicy"}});
        assert_eq!(find_unsupported(&desc).unwrap().0, "dtype");
    }
}

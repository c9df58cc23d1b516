use serde_json::Value;

/// Resolves a dotted path (`id`, `data.items.0.id`, optionally prefixed with `$.`) in `root`.
/// Numeric segments index into arrays.
pub fn select<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.strip_prefix("$.").unwrap_or(path);
    if path.is_empty() || path == "$" {
        return Some(root);
    }
    path.split('.').try_fold(root, |cur, seg| match cur {
        Value::Object(map) => map.get(seg),
        Value::Array(items) => seg.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Scratch representation of a captured value: strings unquoted, everything else as JSON.
pub fn to_scratch(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn selects_nested_fields_and_array_items() {
        let v = json!({"id": "p-1", "version": 3, "data": {"items": [{"id": 7}, {"id": 8}]}});
        assert_eq!(select(&v, "id"), Some(&json!("p-1")));
        assert_eq!(select(&v, "$.version"), Some(&json!(3)));
        assert_eq!(select(&v, "data.items.1.id"), Some(&json!(8)));
        assert_eq!(select(&v, "data.items.5.id"), None);
        assert_eq!(select(&v, "id.x"), None);
        assert_eq!(select(&v, "$"), Some(&v));
    }

    #[test]
    fn scratch_values_unquote_strings_only() {
        assert_eq!(to_scratch(&json!("abc")), "abc");
        assert_eq!(to_scratch(&json!(12)), "12");
        assert_eq!(to_scratch(&json!(true)), "true");
        assert_eq!(to_scratch(&json!({"a": 1})), r#"{"a":1}"#);
    }
}

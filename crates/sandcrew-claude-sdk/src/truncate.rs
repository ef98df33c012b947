//! Shortening of long JSON string leaves for operator display.

use serde_json::Value;

/// Longest string leaf shown in full, in Unicode scalar values.
pub const DEFAULT_TRUNCATE_CHARS: usize = 400;

/// Appended to every shortened string.
pub const TRUNCATION_MARKER: &str = "… (truncated)";

/// Return a copy of `value` where every string leaf longer than `max_chars`
/// characters is cut to its first `max_chars` characters plus
/// [`TRUNCATION_MARKER`]. Arrays, objects (including key order) and
/// non-string leaves are unchanged.
pub fn truncate_long_strings(value: &Value, max_chars: usize) -> Value {
    match value {
        Value::String(s) => Value::String(truncate_str(s, max_chars)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| truncate_long_strings(item, max_chars))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), truncate_long_strings(v, max_chars)))
                .collect(),
        ),
        Value::Null | Value::Bool(_) | Value::Number(_) => value.clone(),
    }
}

/// Pretty-printed rendering of the truncated value.
pub fn render_truncated(value: &Value, max_chars: usize) -> String {
    let truncated = truncate_long_strings(value, max_chars);
    serde_json::to_string_pretty(&truncated).unwrap_or_else(|_| truncated.to_string())
}

fn truncate_str(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{}", &s[..cut], TRUNCATION_MARKER),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_long_string_is_cut_at_char_boundary() {
        let long = "é".repeat(500);
        let out = truncate_long_strings(&Value::String(long), 400);

        let expected = format!("{}{}", "é".repeat(400), TRUNCATION_MARKER);
        assert_eq!(out, Value::String(expected));
    }

    #[test]
    fn test_short_strings_unchanged() {
        let exact = "x".repeat(400);
        assert_eq!(
            truncate_long_strings(&Value::String(exact.clone()), 400),
            Value::String(exact)
        );
        assert_eq!(truncate_long_strings(&json!(""), 400), json!(""));
    }

    #[test]
    fn test_nested_shape_preserved() {
        let long = "a".repeat(401);
        let input = json!({
            "type": "assistant",
            "count": 3,
            "ok": true,
            "none": null,
            "items": [long.clone(), 1.5, {"inner": long.clone(), "short": "hi"}],
        });

        let out = truncate_long_strings(&input, 400);
        let cut = format!("{}{}", "a".repeat(400), TRUNCATION_MARKER);

        assert_eq!(
            out,
            json!({
                "type": "assistant",
                "count": 3,
                "ok": true,
                "none": null,
                "items": [cut.clone(), 1.5, {"inner": cut, "short": "hi"}],
            })
        );
        let keys: Vec<_> = out.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["type", "count", "ok", "none", "items"]);
    }

    #[test]
    fn test_render_is_pretty() {
        let rendered = render_truncated(&json!({"a": 1}), DEFAULT_TRUNCATE_CHARS);
        assert_eq!(rendered, "{\n  \"a\": 1\n}");
    }
}

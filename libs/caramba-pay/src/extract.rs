//! Field extraction for loosely specified provider responses.
//!
//! Each adapter declares, per logical field, an ordered list of JSON paths.
//! The first path that resolves to a usable value wins; nothing else is probed.

use serde_json::Value;

/// A path into a JSON document. Numeric segments index arrays.
pub type FieldPath = &'static [&'static str];

pub fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(*segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_integer(s: &str) -> Option<i64> {
    if let Ok(v) = s.parse::<i64>() {
        return Some(v);
    }
    // "10000.00" is an integer amount; "10000.5" is not.
    let (whole, fraction) = s.split_once('.')?;
    if !fraction.is_empty() && fraction.bytes().all(|b| b == b'0') {
        whole.parse().ok()
    } else {
        None
    }
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => parse_integer(s.trim()),
        _ => None,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn first_text(value: &Value, rules: &[FieldPath]) -> Option<String> {
    rules.iter().find_map(|path| lookup(value, path).and_then(as_text))
}

pub fn first_integer(value: &Value, rules: &[FieldPath]) -> Option<i64> {
    rules.iter().find_map(|path| lookup(value, path).and_then(as_integer))
}

pub fn first_number(value: &Value, rules: &[FieldPath]) -> Option<f64> {
    rules.iter().find_map(|path| lookup(value, path).and_then(as_number))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lookup_walks_objects_and_arrays() {
        let doc = json!({"data": {"items": [{"id": 7}]}, "errors": ["bad key"]});
        assert_eq!(lookup(&doc, &["data", "items", "0", "id"]), Some(&json!(7)));
        assert_eq!(lookup(&doc, &["errors", "0"]), Some(&json!("bad key")));
        assert_eq!(lookup(&doc, &["errors", "x"]), None);
        assert_eq!(lookup(&doc, &["data", "missing"]), None);
    }

    #[test]
    fn first_rule_that_resolves_wins() {
        const RULES: &[FieldPath] = &[&["payment", "track_id"], &["track_id"]];
        let nested = json!({"track_id": "outer", "payment": {"track_id": "inner"}});
        let flat = json!({"track_id": 12345});
        let empty = json!({"payment": {"track_id": "  "}, "track_id": "fallback"});

        assert_eq!(first_text(&nested, RULES).as_deref(), Some("inner"));
        assert_eq!(first_text(&flat, RULES).as_deref(), Some("12345"));
        assert_eq!(first_text(&empty, RULES).as_deref(), Some("fallback"));
        assert_eq!(first_text(&json!({}), RULES), None);
    }

    #[test]
    fn integers_accept_numeric_strings_without_fraction() {
        const AMOUNT: &[FieldPath] = &[&["amount"]];
        assert_eq!(first_integer(&json!({"amount": 1000000}), AMOUNT), Some(1_000_000));
        assert_eq!(first_integer(&json!({"amount": "1000000"}), AMOUNT), Some(1_000_000));
        assert_eq!(first_integer(&json!({"amount": "10000.00"}), AMOUNT), Some(10_000));
        assert_eq!(first_integer(&json!({"amount": "10000.50"}), AMOUNT), None);
        assert_eq!(first_integer(&json!({"amount": true}), AMOUNT), None);
    }

    #[test]
    fn numbers_accept_fractions() {
        const RETRY: &[FieldPath] = &[&["retry_after"], &["parameters", "retry_after"]];
        assert_eq!(first_number(&json!({"retry_after": 1.5}), RETRY), Some(1.5));
        assert_eq!(first_number(&json!({"parameters": {"retry_after": "3"}}), RETRY), Some(3.0));
    }
}

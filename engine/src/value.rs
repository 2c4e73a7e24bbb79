//! Value encoding and numeric coercion.
//!
//! Mirrored values are stored as JSON text. Integer counters written by the
//! store's increment primitive are plain decimal text, which is also valid
//! JSON, so both kinds decode the same way.

use crate::error::{Error, Result};
use serde_json::Value;

/// Encode a value for the store.
pub fn encode(value: &Value) -> String {
    value.to_string()
}

/// Decode a stored value. `key` is only used for error reporting.
pub fn decode(key: &str, raw: &str) -> Result<Value> {
    serde_json::from_str(raw).map_err(|e| Error::Decode {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// Numeric view of a value.
///
/// Numbers map to themselves, booleans to 0/1, null to 0 and strings are
/// parsed after trimming (empty string is 0). Anything else is NaN.
pub fn to_number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Null => 0.0,
        Value::String(s) => parse_number(s),
        Value::Array(_) | Value::Object(_) => f64::NAN,
    }
}

/// Numeric view of a raw stored value. A missing value counts as 0, text that
/// is not JSON is parsed directly.
pub fn raw_to_number(raw: Option<&str>) -> f64 {
    match raw {
        None => 0.0,
        Some(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(value) => to_number(&value),
            Err(_) => parse_number(raw),
        },
    }
}

/// Sum of numeric views. An empty input sums to 0.
pub fn sum<I>(values: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    values.into_iter().fold(0.0, |acc, v| acc + v)
}

fn parse_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    trimmed.parse::<f64>().unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encode_then_decode() {
        let v = json!({"name": "a", "tags": [1, 2]});
        assert_eq!(decode("k", &encode(&v)).unwrap(), v);
    }

    #[test]
    fn decode_counter_text() {
        assert_eq!(decode("k", "42").unwrap(), json!(42));
        assert_eq!(decode("k", "-7").unwrap(), json!(-7));
    }

    #[test]
    fn decode_failure_names_key() {
        let err = decode("broken", "{nope").unwrap_err();
        assert!(matches!(err, Error::Decode { ref key, .. } if key == "broken"));
    }

    #[test]
    fn numeric_coercion() {
        assert_eq!(to_number(&json!(3)), 3.0);
        assert_eq!(to_number(&json!(1.5)), 1.5);
        assert_eq!(to_number(&json!(true)), 1.0);
        assert_eq!(to_number(&json!(null)), 0.0);
        assert_eq!(to_number(&json!(" 12 ")), 12.0);
        assert_eq!(to_number(&json!("")), 0.0);
        assert!(to_number(&json!("abc")).is_nan());
        assert!(to_number(&json!([1])).is_nan());
        assert!(to_number(&json!({"a": 1})).is_nan());
    }

    #[test]
    fn raw_coercion() {
        assert_eq!(raw_to_number(None), 0.0);
        assert_eq!(raw_to_number(Some("5")), 5.0);
        assert_eq!(raw_to_number(Some("\"6\"")), 6.0);
        assert!(raw_to_number(Some("not json")).is_nan());
    }

    #[test]
    fn empty_sum_is_zero() {
        assert_eq!(sum(Vec::new()), 0.0);
        assert_eq!(sum(vec![1.0, 2.0, -0.5]), 2.5);
        assert!(sum(vec![1.0, f64::NAN]).is_nan());
    }
}

//! JSON-logic value coercions.

use serde_json::{Number, Value};

/// JSON-logic truthiness: `false`, `null`, `0`, `""` and `[]` are falsy.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    }
}

/// Numeric coercion used by arithmetic and ordering.
pub(crate) fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Null => Some(0.0),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Some(0.0)
            } else {
                trimmed.parse().ok()
            }
        }
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// Converts an arithmetic result back into JSON, keeping integral values
/// integral. Non-finite results have no JSON form.
pub(crate) fn from_number(n: f64) -> Option<Value> {
    if !n.is_finite() {
        return None;
    }
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        return Some(Value::from(n as i64));
    }
    Number::from_f64(n).map(Value::Number)
}

/// String form used by `cat`, `in` and `lookup` keys.
pub(crate) fn to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => match from_number(n.as_f64().unwrap_or(0.0)) {
            Some(Value::Number(normalized)) => normalized.to_string(),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

pub(crate) fn strict_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Loose equality with number/string/boolean coercion.
pub(crate) fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Bool(_), _) | (_, Value::Bool(_)) => match (to_number(a), to_number(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
        (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => {
            match (to_number(a), to_number(b)) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            }
        }
        _ => strict_eq(a, b),
    }
}

/// Ordering comparison: two strings compare lexically, anything else
/// numerically. Incomparable operands yield `None`.
pub(crate) fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    if let (Value::String(x), Value::String(y)) = (a, b) {
        return Some(x.cmp(y));
    }
    to_number(a)?.partial_cmp(&to_number(b)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn falsy_values() {
        for value in [json!(null), json!(false), json!(0), json!(""), json!([])] {
            assert!(!truthy(&value), "{value} should be falsy");
        }
        for value in [json!(true), json!(1), json!("0"), json!([0]), json!({})] {
            assert!(truthy(&value), "{value} should be truthy");
        }
    }

    #[test]
    fn loose_equality_coerces() {
        assert!(loose_eq(&json!(1), &json!("1")));
        assert!(loose_eq(&json!(true), &json!(1)));
        assert!(loose_eq(&json!(2.0), &json!(2)));
        assert!(!loose_eq(&json!(null), &json!(0)));
        assert!(!strict_eq(&json!(1), &json!("1")));
    }

    #[test]
    fn integral_results_stay_integers() {
        assert_eq!(from_number(3.0), Some(json!(3)));
        assert_eq!(from_number(2.5), Some(json!(2.5)));
        assert_eq!(from_number(f64::INFINITY), None);
        assert_eq!(to_text(&json!(4.0)), "4");
    }
}

//! Canonical argument keys for Collate and Cache.

use std::fmt::{self, Write};

use serde::Serialize;
use serde_json::{Number, Value};

/// Largest magnitude at which every integer is exactly representable as `f64`.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Order-stable textual key of a call's arguments.
///
/// Arguments are encoded as JSON with object keys sorted at every depth, so
/// `{"a": 1, "b": 2}` and `{"b": 2, "a": 1}` produce the same key. Integral floats are
/// written as integers, so `1.0` keys like `1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallKey(String);

impl CallKey {
    pub fn of<A: Serialize + ?Sized>(args: &A) -> Result<Self, serde_json::Error> {
        let value = serde_json::to_value(args)?;
        let mut out = String::new();
        write_canonical(&value, &mut out);
        Ok(CallKey(out))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (k, v)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // string escaping is serde_json's
                let _ = write!(out, "{}:", Value::String(k.clone()));
                write_canonical(v, out);
            }
            out.push('}');
        }
        Value::Number(n) => write_number(n, out),
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}

fn write_number(n: &Number, out: &mut String) {
    match n.as_f64() {
        Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() <= MAX_SAFE_INTEGER => {
            let _ = write!(out, "{}", f as i64);
        }
        _ => {
            let _ = write!(out, "{n}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn object_key_order_does_not_matter() {
        let a = CallKey::of(&json!({"b": {"y": 1, "x": 2}, "a": [3, {"d": 4, "c": 5}]})).unwrap();
        let b = CallKey::of(&json!({"a": [3, {"c": 5, "d": 4}], "b": {"x": 2, "y": 1}})).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), r#"{"a":[3,{"c":5,"d":4}],"b":{"x":2,"y":1}}"#);
    }

    #[test]
    fn hash_maps_key_stably() {
        let mut first = HashMap::new();
        let mut second = HashMap::new();
        for i in 0..32 {
            first.insert(format!("k{i}"), i);
            second.insert(format!("k{}", 31 - i), 31 - i);
        }
        assert_eq!(CallKey::of(&first).unwrap(), CallKey::of(&second).unwrap());
    }

    #[rstest]
    #[case(json!([1, 2]), json!([2, 1]))]
    #[case(json!("1"), json!(1))]
    #[case(json!({"a": null}), json!({}))]
    #[case(json!({"a\"b": 1}), json!({"a": "b\": 1"}))]
    fn distinct_arguments_get_distinct_keys(#[case] left: Value, #[case] right: Value) {
        assert_ne!(CallKey::of(&left).unwrap(), CallKey::of(&right).unwrap());
    }

    #[rstest]
    #[case(json!(1), json!(1.0))]
    #[case(json!({"id": 0}), json!({"id": -0.0}))]
    #[case(json!([2, {"n": 40}]), json!([2.0, {"n": 40.0}]))]
    fn integral_floats_key_like_integers(#[case] left: Value, #[case] right: Value) {
        assert_eq!(CallKey::of(&left).unwrap(), CallKey::of(&right).unwrap());
    }

    #[test]
    fn fractional_numbers_keep_their_value() {
        assert_ne!(CallKey::of(&1.5).unwrap(), CallKey::of(&1).unwrap());
        assert_eq!(CallKey::of(&1.5).unwrap().as_str(), "1.5");
    }

    #[test]
    fn tuples_encode_as_arrays() {
        let key = CallKey::of(&("repo", 7)).unwrap();
        assert_eq!(key.to_string(), r#"["repo",7]"#);
    }
}

//! Canonical JSON and content digests.
//!
//! Every hash the pipeline records (decision inputs and outputs, package
//! content hashes, audit event hashes) is SHA-256 over canonical JSON:
//! object keys sorted by UTF-16 code units, integer-valued floats written as
//! integers, compact output.

use contentgate_state::ContentDigest;
use serde::Serialize;
use serde_json::{Map, Number, Value};

use crate::domain::error::{GateError, Result};

fn sort_keys_utf16(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_by(|a, b| a.encode_utf16().cmp(b.encode_utf16()));

            let mut sorted = Map::new();
            for key in keys {
                if let Some(v) = map.get(key) {
                    sorted.insert(key.clone(), sort_keys_utf16(v));
                }
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys_utf16).collect()),
        other => other.clone(),
    }
}

fn normalize_numbers(value: &Value) -> Result<Value> {
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(k.clone(), normalize_numbers(v)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => Ok(Value::Array(
            items.iter().map(normalize_numbers).collect::<Result<_>>()?,
        )),
        Value::Number(n) if n.is_f64() => {
            let f = n.as_f64().unwrap_or(f64::NAN);
            if !f.is_finite() {
                return Err(GateError::NonCanonical(
                    "NaN/Infinity not permitted".to_string(),
                ));
            }
            if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                Ok(Value::Number(Number::from(f as i64)))
            } else {
                Ok(Value::Number(n.clone()))
            }
        }
        other => Ok(other.clone()),
    }
}

/// Canonical compact JSON for `value`.
pub fn canonical_json(value: &Value) -> Result<String> {
    let normalized = normalize_numbers(value)?;
    Ok(serde_json::to_string(&sort_keys_utf16(&normalized))?)
}

/// SHA-256 of the canonical JSON of `value`.
pub fn compute_digest(value: &Value) -> Result<ContentDigest> {
    Ok(ContentDigest::from_bytes(canonical_json(value)?.as_bytes()))
}

/// Serialize `item` and digest it canonically.
pub fn digest_of<T: Serialize + ?Sized>(item: &T) -> Result<ContentDigest> {
    compute_digest(&serde_json::to_value(item)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_json_field_order_invariant() {
        let a = serde_json::json!({"b": 1, "a": {"z": 1, "y": 2}});
        let b = serde_json::json!({"a": {"y": 2, "z": 1}, "b": 1});
        assert_eq!(canonical_json(&a).unwrap(), canonical_json(&b).unwrap());
        assert_eq!(canonical_json(&a).unwrap(), r#"{"a":{"y":2,"z":1},"b":1}"#);
    }

    #[test]
    fn test_integer_valued_float_normalized() {
        let v = serde_json::json!({"score": 40.0, "ratio": 0.5});
        assert_eq!(canonical_json(&v).unwrap(), r#"{"ratio":0.5,"score":40}"#);
    }

    #[test]
    fn test_array_order_preserved() {
        let a = serde_json::json!(["tiktok", "x"]);
        let b = serde_json::json!(["x", "tiktok"]);
        assert_ne!(compute_digest(&a).unwrap(), compute_digest(&b).unwrap());
    }

    #[test]
    fn test_digest_of_struct_matches_value_digest() {
        #[derive(Serialize)]
        struct Caption {
            text: String,
            platform: String,
        }
        let c = Caption {
            text: "hello #ad".to_string(),
            platform: "tiktok".to_string(),
        };
        let via_value = compute_digest(&serde_json::to_value(&c).unwrap()).unwrap();
        assert_eq!(digest_of(&c).unwrap(), via_value);
        assert_eq!(via_value.as_str().len(), 64);
    }

    #[test]
    fn test_single_field_delta_changes_digest() {
        let a = serde_json::json!({"reason": "clean"});
        let b = serde_json::json!({"reason": "clean."});
        assert_ne!(compute_digest(&a).unwrap(), compute_digest(&b).unwrap());
    }
}

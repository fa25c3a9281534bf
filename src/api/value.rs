use std::collections::HashMap;

use serde_json::Value as Json;

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::Value;

/// Converts an arbitrary JSON value off the wire into a document `Value`.
/// Integral numbers become `Value::Int`; anything with a fractional part
/// becomes a `Value::Decimal` scaled to six fractional digits, the fixed
/// point convention the codec's marker table uses for non-integer numbers.
pub fn from_json(json: Json) -> Result<Value> {
    match json {
        Json::Null => Ok(Value::Null),
        Json::Bool(b) => Ok(Value::Bool(b)),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Int(i))
            } else if let Some(f) = n.as_f64() {
                Ok(decimal_from_f64(f))
            } else {
                Err(Error::new(ErrorKind::InvalidEncoding, format!("number out of range: {n}")))
            }
        }
        Json::String(s) => Ok(Value::String(s)),
        Json::Array(items) => items.into_iter().map(from_json).collect::<Result<Vec<_>>>().map(Value::Array),
        Json::Object(map) => map.into_iter().map(|(k, v)| from_json(v).map(|v| (k, v))).collect::<Result<HashMap<_, _>>>().map(Value::Object),
    }
}

fn decimal_from_f64(f: f64) -> Value {
    const SCALE: i64 = 1_000_000;
    Value::Decimal((f * SCALE as f64).round() as i64, SCALE)
}

pub fn to_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::Number((*i).into()),
        Value::Decimal(num, denom) => {
            let f = if *denom == 0 { 0.0 } else { *num as f64 / *denom as f64 };
            serde_json::Number::from_f64(f).map(Json::Number).unwrap_or(Json::Null)
        }
        Value::String(s) => Json::String(s.clone()),
        Value::Array(items) => Json::Array(items.iter().map(to_json).collect()),
        Value::Object(map) => Json::Object(map.iter().map(|(k, v)| (k.clone(), to_json(v))).collect()),
    }
}

pub fn props_from_json(json: HashMap<String, Json>) -> Result<HashMap<String, Value>> {
    json.into_iter().map(|(k, v)| from_json(v).map(|v| (k, v))).collect()
}

pub fn props_to_json(props: &HashMap<String, Value>) -> HashMap<String, Json> {
    props.iter().map(|(k, v)| (k.clone(), to_json(v))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_round_trip_exactly() {
        let json: Json = serde_json::json!(42);
        let value = from_json(json).unwrap();
        assert_eq!(value, Value::Int(42));
        assert_eq!(to_json(&value), serde_json::json!(42));
    }

    #[test]
    fn fractional_numbers_become_decimal() {
        let value = from_json(serde_json::json!(1.5)).unwrap();
        assert_eq!(value, Value::Decimal(1_500_000, 1_000_000));
    }

    #[test]
    fn nested_objects_and_arrays_round_trip() {
        let json = serde_json::json!({"a": [1, "x", null], "b": {"c": true}});
        let value = from_json(json.clone()).unwrap();
        assert_eq!(to_json(&value), json);
    }
}

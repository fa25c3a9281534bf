use std::collections::HashMap;

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{Document, Value};
use crate::query::ast::{AggregateOp, AggregateSpec};

/// Fixed-point scale `Value::Decimal`'s numerator/denominator pair uses at
/// the wire boundary (`api::value::from_json`, `db::dump::json_to_value`).
const DECIMAL_SCALE: i64 = 1_000_000;

fn as_f64(value: &Value) -> Result<f64> {
    match value {
        Value::Int(i) => Ok(*i as f64),
        Value::Decimal(num, denom) => Ok(if *denom == 0 { *num as f64 } else { *num as f64 / *denom as f64 }),
        _ => Err(Error::new(ErrorKind::InvalidAggregateType, "sum/avg require a numeric operand")),
    }
}

/// Turns an accumulated sum/avg back into a `Value::Decimal` at the same
/// numerator/denominator scale the rest of the crate writes decimals at,
/// so a fractional result survives the round trip instead of being
/// floored to the nearest whole number.
fn f64_to_decimal(x: f64) -> Value {
    Value::Decimal((x * DECIMAL_SCALE as f64).round() as i64, DECIMAL_SCALE)
}

fn compare_values(a: &Value, b: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Decimal(xm, xf), Value::Decimal(ym, yf)) => (xm, xf).cmp(&(ym, yf)),
        _ => Ordering::Equal,
    }
}

struct GroupAccumulator {
    count: u64,
    min: HashMap<String, Value>,
    max: HashMap<String, Value>,
    sum: HashMap<String, f64>,
    first: HashMap<String, Value>,
    last: HashMap<String, Value>,
}

impl GroupAccumulator {
    fn new() -> Self {
        GroupAccumulator {
            count: 0,
            min: HashMap::new(),
            max: HashMap::new(),
            sum: HashMap::new(),
            first: HashMap::new(),
            last: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AggregateRow {
    pub group: Option<Value>,
    pub values: HashMap<String, Value>,
}

/// Streams `docs` (already filtered; order is the cursor's insertion/sort
/// order so `first`/`last` are well-defined) through a group-by fold. No
/// index pushdown: every matching document is visited.
pub fn aggregate(spec: &AggregateSpec, docs: &[Document]) -> Result<Vec<AggregateRow>> {
    let mut order: Vec<Option<String>> = Vec::new();
    let mut groups: HashMap<Option<String>, GroupAccumulator> = HashMap::new();

    for doc in docs {
        let group_key = match &spec.group_by {
            Some(prop) => doc.get(prop).and_then(|v| v.as_str()).map(|s| s.to_string()),
            None => None,
        };
        if !groups.contains_key(&group_key) {
            order.push(group_key.clone());
        }
        let acc = groups.entry(group_key).or_insert_with(GroupAccumulator::new);
        acc.count += 1;

        for request in &spec.requests {
            let name = request.output_name().to_string();
            let value = doc.get(&request.prop);
            match request.op {
                AggregateOp::Count => {}
                AggregateOp::Min => {
                    if let Some(v) = value {
                        let replace = match acc.min.get(&name) {
                            Some(existing) => compare_values(v, existing) == std::cmp::Ordering::Less,
                            None => true,
                        };
                        if replace {
                            acc.min.insert(name, v.clone());
                        }
                    }
                }
                AggregateOp::Max => {
                    if let Some(v) = value {
                        let replace = match acc.max.get(&name) {
                            Some(existing) => compare_values(v, existing) == std::cmp::Ordering::Greater,
                            None => true,
                        };
                        if replace {
                            acc.max.insert(name, v.clone());
                        }
                    }
                }
                AggregateOp::Sum | AggregateOp::Avg => {
                    let n = value.map(as_f64).transpose()?.unwrap_or(0.0);
                    *acc.sum.entry(name).or_insert(0.0) += n;
                }
                AggregateOp::First => {
                    if let Some(v) = value {
                        acc.first.entry(name).or_insert_with(|| v.clone());
                    }
                }
                AggregateOp::Last => {
                    if let Some(v) = value {
                        acc.last.insert(name, v.clone());
                    }
                }
            }
        }
    }

    let mut rows = Vec::with_capacity(order.len());
    for group_key in order {
        let acc = groups.remove(&group_key).expect("collected above");
        let mut values = HashMap::new();
        for request in &spec.requests {
            let name = request.output_name().to_string();
            let value = match request.op {
                AggregateOp::Count => Value::Int(acc.count as i64),
                AggregateOp::Min => acc.min.get(&name).cloned().unwrap_or(Value::Null),
                AggregateOp::Max => acc.max.get(&name).cloned().unwrap_or(Value::Null),
                AggregateOp::Sum => f64_to_decimal(acc.sum.get(&name).copied().unwrap_or(0.0)),
                AggregateOp::Avg => {
                    let sum = acc.sum.get(&name).copied().unwrap_or(0.0);
                    let avg = if acc.count > 0 { sum / acc.count as f64 } else { 0.0 };
                    f64_to_decimal(avg)
                }
                AggregateOp::First => acc.first.get(&name).cloned().unwrap_or(Value::Null),
                AggregateOp::Last => acc.last.get(&name).cloned().unwrap_or(Value::Null),
            };
            values.insert(name, value);
        }
        rows.push(AggregateRow { group: group_key.map(Value::String), values });
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Id;
    use crate::query::ast::AggregateRequest;

    fn doc(id: u128, category: &str, price: i64) -> Document {
        let mut d = Document::new(Id::new(0, id), "Item:1");
        d.props.insert("category".to_string(), Value::String(category.to_string()));
        d.props.insert("price".to_string(), Value::Int(price));
        d
    }

    #[test]
    fn count_and_sum_per_group() {
        let docs = vec![doc(1, "a", 10), doc(2, "a", 20), doc(3, "b", 5)];
        let mut count_req = AggregateRequest::new(AggregateOp::Count, "price");
        count_req.alias = Some("n".to_string());
        let spec = AggregateSpec {
            group_by: Some("category".to_string()),
            requests: vec![count_req, AggregateRequest::new(AggregateOp::Sum, "price")],
        };
        let rows = aggregate(&spec, &docs).unwrap();
        assert_eq!(rows.len(), 2);
        let a = rows.iter().find(|r| r.group == Some(Value::String("a".to_string()))).unwrap();
        assert_eq!(a.values["n"], Value::Int(2));
        assert_eq!(a.values["price"], Value::Decimal(30_000_000, DECIMAL_SCALE));
    }

    #[test]
    fn avg_keeps_the_fractional_remainder() {
        let docs = vec![doc(1, "a", 10), doc(2, "a", 21)];
        let spec = AggregateSpec { group_by: None, requests: vec![AggregateRequest::new(AggregateOp::Avg, "price")] };
        let rows = aggregate(&spec, &docs).unwrap();
        let avg = &rows[0].values["price"];
        match avg {
            Value::Decimal(num, denom) => {
                assert_eq!(*denom, DECIMAL_SCALE);
                assert_eq!(*num as f64 / *denom as f64, 15.5, "(10+21)/2 should keep its .5, not floor to 15");
            }
            other => panic!("expected a decimal, got {other:?}"),
        }
    }

    #[test]
    fn sum_on_non_numeric_property_fails() {
        let mut d = Document::new(Id::new(0, 1), "Item:1");
        d.props.insert("price".to_string(), Value::String("free".to_string()));
        let spec = AggregateSpec {
            group_by: None,
            requests: vec![AggregateRequest::new(AggregateOp::Sum, "price")],
        };
        assert!(aggregate(&spec, &[d]).is_err());
    }
}

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value as Json;

use crate::core::error::{Error, ErrorKind, Result};
use crate::kind::collation::Collation;
use crate::query::{AggregateOp, AggregateRequest, AggregateSpec, Clause, Op, Query, MAX_LIMIT};

use super::value::from_json;

/// Wire shape of a where/filter clause: `{ prop, op, val, collate? }`.
#[derive(Debug, Clone, Deserialize)]
pub struct WireClause {
    pub prop: String,
    pub op: String,
    pub val: Json,
    pub collate: Option<String>,
}

/// Wire shape of the `aggregate` query field: one property list per
/// accumulator, plus an optional group-by property.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireAggregate {
    pub group_by: Option<String>,
    #[serde(default)]
    pub cnt: Vec<String>,
    #[serde(default)]
    pub min: Vec<String>,
    #[serde(default)]
    pub max: Vec<String>,
    #[serde(default)]
    pub sum: Vec<String>,
    #[serde(default)]
    pub avg: Vec<String>,
    #[serde(default)]
    pub first: Vec<String>,
    #[serde(default)]
    pub last: Vec<String>,
}

/// Wire shape of a `find`/`search`/`watch` request's query payload,
/// mirroring the external field names exactly (`orderBy`, `incDel`, ...).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireQuery {
    pub from: String,
    pub select: Option<Vec<String>>,
    #[serde(rename = "where", default)]
    pub where_clauses: Vec<WireClause>,
    #[serde(default)]
    pub filter: Vec<WireClause>,
    pub order_by: Option<String>,
    pub distinct: Option<String>,
    #[serde(default)]
    pub desc: bool,
    pub limit: Option<usize>,
    pub page: Option<String>,
    #[serde(default)]
    pub inc_del: bool,
    #[serde(default = "default_true")]
    pub ignore_inactive_shards: bool,
    #[serde(default)]
    pub immediate_return: bool,
    pub aggregate: Option<WireAggregate>,
}

fn default_true() -> bool {
    true
}

fn parse_op(op: &str) -> Result<Op> {
    match op {
        "=" => Ok(Op::Eq),
        "!=" | "≠" => Ok(Op::Ne),
        "<" => Ok(Op::Lt),
        "<=" | "≤" => Ok(Op::Le),
        ">" => Ok(Op::Gt),
        ">=" | "≥" => Ok(Op::Ge),
        "%" => Ok(Op::Prefix),
        "%%" => Ok(Op::Substring),
        "?" => Ok(Op::Search),
        other => Err(Error::new(ErrorKind::InvalidQueryOp, format!("unknown operator: {other}"))),
    }
}

fn parse_collation(name: &str) -> Result<Collation> {
    match name {
        "primary" => Ok(Collation::Primary),
        "secondary" => Ok(Collation::Secondary),
        "tertiary" => Ok(Collation::Tertiary),
        "quaternary" => Ok(Collation::Quaternary),
        "identical" => Ok(Collation::Identical),
        other => Err(Error::new(ErrorKind::InvalidQuery, format!("unknown collation: {other}"))),
    }
}

fn convert_clause(wire: WireClause) -> Result<Clause> {
    let mut clause = Clause::new(wire.prop, parse_op(&wire.op)?, from_json(wire.val)?);
    if let Some(collate) = wire.collate {
        clause = clause.with_collation(parse_collation(&collate)?);
    }
    Ok(clause)
}

fn convert_aggregate(wire: WireAggregate) -> AggregateSpec {
    let mut requests = Vec::new();
    let mut push = |op: AggregateOp, props: Vec<String>| {
        for prop in props {
            requests.push(AggregateRequest::new(op, prop));
        }
    };
    push(AggregateOp::Count, wire.cnt);
    push(AggregateOp::Min, wire.min);
    push(AggregateOp::Max, wire.max);
    push(AggregateOp::Sum, wire.sum);
    push(AggregateOp::Avg, wire.avg);
    push(AggregateOp::First, wire.first);
    push(AggregateOp::Last, wire.last);
    AggregateSpec { group_by: wire.group_by, requests }
}

impl TryFrom<WireQuery> for Query {
    type Error = Error;

    /// The wire boundary's 500 ceiling on `limit` is enforced here, not
    /// left to the planner: a request asking for more than `MAX_LIMIT`
    /// silently gets fewer, exactly as the wire schema documents.
    fn try_from(wire: WireQuery) -> Result<Query> {
        let mut query = Query::new(wire.from);
        query.select = wire.select;
        for clause in wire.where_clauses {
            query.where_clauses.push(convert_clause(clause)?);
        }
        for clause in wire.filter {
            query.filter_clauses.push(convert_clause(clause)?);
        }
        query.order_by = wire.order_by;
        query.distinct = wire.distinct;
        query.desc = wire.desc;
        query.limit = wire.limit.map(|l| l.min(MAX_LIMIT));
        query.page = wire.page;
        query.include_deleted = wire.inc_del;
        query.ignore_inactive_shards = wire.ignore_inactive_shards;
        query.immediate_return = wire.immediate_return;
        query.aggregate = wire.aggregate.map(convert_aggregate);
        Ok(query)
    }
}

/// Parses raw clause maps into `HashMap<String, Value>` for `put`/`merge`
/// request bodies, whose property bag is arbitrary JSON.
pub fn props_from_json(json: HashMap<String, Json>) -> Result<HashMap<String, crate::core::types::Value>> {
    super::value::props_from_json(json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_query_converts_where_and_limit() {
        let wire = WireQuery {
            from: "Item:1".to_string(),
            where_clauses: vec![WireClause { prop: "x".to_string(), op: ">=".to_string(), val: serde_json::json!(5), collate: None }],
            limit: Some(10_000),
            ..Default::default()
        };
        let query: Query = wire.try_into().unwrap();
        assert_eq!(query.from, "Item:1");
        assert_eq!(query.where_clauses.len(), 1);
        assert!(matches!(query.where_clauses[0].op, Op::Ge));
        assert_eq!(query.limit, Some(MAX_LIMIT));
    }

    #[test]
    fn unknown_operator_is_rejected() {
        let wire = WireQuery { from: "Item:1".to_string(), where_clauses: vec![WireClause { prop: "x".to_string(), op: "~=".to_string(), val: Json::Null, collate: None }], ..Default::default() };
        let err = Query::try_from(wire).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidQueryOp);
    }

    #[test]
    fn aggregate_fans_out_per_accumulator() {
        let wire = WireAggregate { group_by: Some("category".to_string()), sum: vec!["amount".to_string()], cnt: vec!["*".to_string()], ..Default::default() };
        let spec = convert_aggregate(wire);
        assert_eq!(spec.group_by.as_deref(), Some("category"));
        assert_eq!(spec.requests.len(), 2);
    }
}

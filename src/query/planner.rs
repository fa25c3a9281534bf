use std::ops::Bound;

use crate::core::types::Value;
use crate::idx::sortkey::encode_segment;
use crate::kind::kind::{IndexDef, Kind};
use crate::query::ast::{Op, Query};

/// The index chosen for a query, and how many of its leading properties
/// were satisfied by equality where-clauses.
pub struct IndexChoice<'a> {
    pub index: &'a IndexDef,
    pub equality_prefix: usize,
}

/// Picks, among `kind`'s indexes, the one whose leading properties match
/// the longest prefix of the query's equality where-clauses; ties break
/// by declaration order (the first index reaching the max wins, since
/// `kind.indexes` is walked in order and a later index must strictly
/// beat the running best to replace it).
pub fn select_index<'a>(kind: &'a Kind, query: &Query) -> Option<IndexChoice<'a>> {
    let mut best: Option<IndexChoice> = None;
    for index in &kind.indexes {
        let mut matched = 0;
        for prop in &index.props {
            let has_eq =
                query.where_clauses.iter().any(|c| c.prop == prop.path && c.op == Op::Eq);
            if has_eq {
                matched += 1;
            } else {
                break;
            }
        }
        let beats_best = match &best {
            Some(b) => matched > b.equality_prefix,
            None => true,
        };
        if beats_best {
            best = Some(IndexChoice { index, equality_prefix: matched });
        }
    }
    best
}

/// A byte that can never begin a sort-key segment (tags run 0..=4),
/// usable as an open-ended upper bound sentinel.
const UNBOUNDED_UPPER: u8 = 0xFF;

/// Builds the `[lower, upper)` byte range the chosen index should be
/// scanned over: the equality prefix's encoded segments, followed by
/// whatever the query's inequality/order-by clause (if it lands on the
/// index's next property) narrows the range to.
pub fn build_range(choice: &IndexChoice, query: &Query) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
    let mut prefix = Vec::new();
    for prop in choice.index.props.iter().take(choice.equality_prefix) {
        let clause = query.where_clauses.iter().find(|c| c.prop == prop.path && c.op == Op::Eq);
        if let Some(clause) = clause {
            prefix.extend(encode_segment(&clause.value, prop.collation));
        }
    }

    let next_prop = choice.index.props.get(choice.equality_prefix);
    let inequality = next_prop.and_then(|prop| {
        query.where_clauses.iter().find(|c| c.prop == prop.path && c.op.is_inequality()).map(|c| (prop, c))
    });

    match inequality {
        None => {
            let mut upper = prefix.clone();
            upper.push(UNBOUNDED_UPPER);
            (Bound::Included(prefix), Bound::Excluded(upper))
        }
        Some((prop, clause)) => {
            let mut bound_bytes = prefix.clone();
            bound_bytes.extend(encode_segment(&clause.value, prop.collation));
            match clause.op {
                Op::Lt => (Bound::Included(prefix), Bound::Excluded(bound_bytes)),
                Op::Le => {
                    let mut upper = bound_bytes.clone();
                    upper.push(UNBOUNDED_UPPER);
                    (Bound::Included(prefix), Bound::Excluded(upper))
                }
                Op::Gt => {
                    let mut lower = bound_bytes;
                    lower.push(UNBOUNDED_UPPER);
                    let mut upper = prefix;
                    upper.push(UNBOUNDED_UPPER);
                    (Bound::Excluded(lower), Bound::Excluded(upper))
                }
                Op::Ge => {
                    let mut upper = prefix.clone();
                    upper.push(UNBOUNDED_UPPER);
                    (Bound::Included(bound_bytes), Bound::Excluded(upper))
                }
                _ => unreachable!("inequality() only matches Lt/Le/Gt/Ge"),
            }
        }
    }
}

/// Whether `value`'s clause operator is an equality test the query
/// planner can fold into the index prefix (used by callers deciding
/// whether a clause is "covered" by the chosen index vs. needing a
/// post-scan filter).
pub fn is_covered_by_prefix(index: &IndexDef, prop: &str, prefix_len: usize) -> bool {
    index.props.iter().take(prefix_len).any(|p| p.path == prop)
}

pub fn value_is_array(value: &Value) -> bool {
    matches!(value, Value::Array(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::kind::IndexProp;
    use crate::query::ast::Clause;

    fn sample_kind() -> Kind {
        Kind::new("Test:1", "owner")
            .with_index(IndexDef::new("byX", vec![IndexProp::new("x")]))
            .with_index(IndexDef::new(
                "byXY",
                vec![IndexProp::new("x"), IndexProp::new("y")],
            ))
    }

    #[test]
    fn picks_the_index_with_the_longest_equality_prefix() {
        let kind = sample_kind();
        let query = Query::new("Test:1")
            .with_where(Clause::new("x", Op::Eq, Value::Int(1)))
            .with_where(Clause::new("y", Op::Eq, Value::Int(2)));
        let choice = select_index(&kind, &query).unwrap();
        assert_eq!(choice.index.name, "byXY");
        assert_eq!(choice.equality_prefix, 2);
    }

    #[test]
    fn range_narrows_on_a_trailing_inequality() {
        let kind = Kind::new("Test:1", "owner")
            .with_index(IndexDef::new("byXY", vec![IndexProp::new("x"), IndexProp::new("y")]));
        let query = Query::new("Test:1")
            .with_where(Clause::new("x", Op::Eq, Value::Int(1)))
            .with_where(Clause::new("y", Op::Lt, Value::Int(10)));
        let choice = select_index(&kind, &query).unwrap();
        let (lower, upper) = build_range(&choice, &query);
        match (lower, upper) {
            (Bound::Included(l), Bound::Excluded(u)) => assert!(l < u),
            other => panic!("unexpected bounds: {other:?}"),
        }
    }
}

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::Value;
use crate::query::ast::{Op, Query};

/// Checks the grammar-level validation rules a query must satisfy before
/// planning: at most one inequality-bearing property, at most one
/// array-valued property (and only with an op that allows it), `orderBy`
/// agreeing with any inequality where-clause, `?` confined to `where`,
/// and `immediateReturn` not combined with ordering/distinct/aggregate.
pub fn validate(query: &Query) -> Result<()> {
    let inequality_props: Vec<&str> =
        query.where_clauses.iter().filter(|c| c.op.is_inequality()).map(|c| c.prop.as_str()).collect();
    if inequality_props.len() > 1 {
        return Err(Error::new(
            ErrorKind::InvalidQueryOpCombo,
            "at most one property may carry an inequality operator",
        ));
    }

    let mut array_valued = 0;
    for clause in query.where_clauses.iter().chain(query.filter_clauses.iter()) {
        if matches!(clause.value, Value::Array(_)) {
            if !clause.op.allows_array_value() {
                return Err(Error::new(
                    ErrorKind::InvalidQueryOp,
                    format!("operator on '{}' does not accept an array value", clause.prop),
                ));
            }
            array_valued += 1;
        }
    }
    if array_valued > 1 {
        return Err(Error::new(
            ErrorKind::InvalidQueryOpCombo,
            "at most one property may carry an array value",
        ));
    }

    if let (Some(order_by), Some(prop)) = (&query.order_by, inequality_props.first()) {
        if order_by != prop {
            return Err(Error::new(
                ErrorKind::InvalidQueryOpCombo,
                "orderBy must match the inequality where-clause's property",
            ));
        }
    }

    for clause in &query.filter_clauses {
        if clause.op == Op::Search {
            return Err(Error::new(ErrorKind::InvalidQueryOp, "'?' is not permitted in filter clauses"));
        }
    }

    if query.immediate_return
        && (query.order_by.is_some() || query.distinct.is_some() || query.aggregate.is_some())
    {
        return Err(Error::new(
            ErrorKind::InvalidQueryOpCombo,
            "immediateReturn is mutually exclusive with orderBy/distinct/aggregate",
        ));
    }

    Ok(())
}

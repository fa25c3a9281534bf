use crate::core::types::Value;
use crate::kind::collation::Collation;

/// Upper bound on the wire-schema `limit` field; a request may ask for
/// fewer but never more.
pub const MAX_LIMIT: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// `%`
    Prefix,
    /// `?` — tokenized search match, where-only.
    Search,
    /// `%%`
    Substring,
}

impl Op {
    pub fn is_inequality(self) -> bool {
        matches!(self, Op::Lt | Op::Le | Op::Gt | Op::Ge)
    }

    pub fn allows_array_value(self) -> bool {
        matches!(self, Op::Eq | Op::Prefix | Op::Substring)
    }
}

#[derive(Debug, Clone)]
pub struct Clause {
    pub prop: String,
    pub op: Op,
    pub value: Value,
    pub collation: Option<Collation>,
}

impl Clause {
    pub fn new(prop: impl Into<String>, op: Op, value: Value) -> Self {
        Clause { prop: prop.into(), op, value, collation: None }
    }

    pub fn with_collation(mut self, collation: Collation) -> Self {
        self.collation = Some(collation);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOp {
    Count,
    Min,
    Max,
    Sum,
    Avg,
    First,
    Last,
}

#[derive(Debug, Clone)]
pub struct AggregateRequest {
    pub op: AggregateOp,
    pub prop: String,
    pub alias: Option<String>,
}

impl AggregateRequest {
    pub fn new(op: AggregateOp, prop: impl Into<String>) -> Self {
        AggregateRequest { op, prop: prop.into(), alias: None }
    }

    pub fn output_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.prop)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AggregateSpec {
    pub group_by: Option<String>,
    pub requests: Vec<AggregateRequest>,
}

/// A find/search request: `from` kind plus where/filter clauses, ordering,
/// pagination and aggregate options.
#[derive(Debug, Clone)]
pub struct Query {
    pub from: String,
    pub select: Option<Vec<String>>,
    pub where_clauses: Vec<Clause>,
    pub filter_clauses: Vec<Clause>,
    pub order_by: Option<String>,
    pub distinct: Option<String>,
    pub desc: bool,
    pub limit: Option<usize>,
    pub page: Option<String>,
    pub include_deleted: bool,
    pub ignore_inactive_shards: bool,
    /// Mutually exclusive with `order_by`/`distinct`/`aggregate`: stop as
    /// soon as `limit + 1` matches have been seen instead of materializing
    /// and sorting the whole candidate set.
    pub immediate_return: bool,
    pub aggregate: Option<AggregateSpec>,
}

impl Query {
    pub fn new(from: impl Into<String>) -> Self {
        Query {
            from: from.into(),
            select: None,
            where_clauses: Vec::new(),
            filter_clauses: Vec::new(),
            order_by: None,
            distinct: None,
            desc: false,
            limit: None,
            page: None,
            include_deleted: false,
            ignore_inactive_shards: true,
            immediate_return: false,
            aggregate: None,
        }
    }

    pub fn with_where(mut self, clause: Clause) -> Self {
        self.where_clauses.push(clause);
        self
    }

    pub fn with_filter(mut self, clause: Clause) -> Self {
        self.filter_clauses.push(clause);
        self
    }

    pub fn with_order_by(mut self, prop: impl Into<String>) -> Self {
        self.order_by = Some(prop.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit.min(MAX_LIMIT));
        self
    }
}

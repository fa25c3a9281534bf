pub mod aggregate;
pub mod ast;
pub mod cursor;
pub mod planner;
pub mod validate;

pub use aggregate::{aggregate, AggregateRow};
pub use ast::{AggregateOp, AggregateRequest, AggregateSpec, Clause, Op, Query, MAX_LIMIT};
pub use cursor::{Cursor, CursorState};
pub use planner::{build_range, select_index, IndexChoice};
pub use validate::validate;

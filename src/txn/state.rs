/// Lifecycle of a `Transaction`. Mirrors the originating system's 2-phase
/// commit shape (active -> preparing -> committed/aborted) without the
/// optimistic read-set validation a single-node engine doesn't need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Active,
    Preparing,
    Committed,
    Aborted,
}

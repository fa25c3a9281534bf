pub mod state;
pub mod transaction;

pub use state::TxnState;
pub use transaction::{ShardSource, Transaction};

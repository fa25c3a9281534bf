pub mod info;
pub mod pool;

pub use info::ShardInfo;
pub use pool::{Pool, MAIN_SHARD};

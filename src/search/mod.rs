pub mod cache;
pub mod materialize;
pub mod worker;

pub use cache::{CacheKey, CacheStats, SearchCache};
pub use materialize::materialize;
pub use worker::load_documents_parallel;

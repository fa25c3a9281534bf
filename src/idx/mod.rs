pub mod diff;
pub mod extractor;
pub mod sortkey;

pub use diff::{apply_diff, apply_diffs, index_namespace};
pub use extractor::extract_keys;

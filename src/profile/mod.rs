pub mod auditor;

pub use auditor::{Auditor, StatEntry};

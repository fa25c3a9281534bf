pub mod registry;
pub mod watcher;

pub use registry::WatchRegistry;
pub use watcher::{Watch, WatchState};

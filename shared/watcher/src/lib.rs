mod cache;
mod scheduler;
mod watcher;

pub use cache::PositionCache;
pub use scheduler::{RefreshHandle, RefreshScheduler, DEFAULT_REFRESH_PERIOD};
pub use watcher::PositionWatcher;

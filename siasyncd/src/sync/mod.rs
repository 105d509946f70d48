pub mod engine;
pub mod paths;
pub mod reconciler;
pub mod record;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod watcher;

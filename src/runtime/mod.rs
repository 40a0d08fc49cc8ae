//! Process runtime: orchestration, shutdown, and hot reload.

pub mod orchestrator;
pub mod signals;
pub mod watcher;

pub use orchestrator::{run_services, run_services_with, Orchestrator, RunningServices};
pub use signals::{ShutdownReason, ShutdownTrigger};
pub use watcher::{FileWatcher, WatcherHandle};

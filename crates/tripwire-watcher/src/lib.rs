//! Filesystem watching that feeds file events into a tripwire `FileCache`

pub mod config;
pub mod watcher;

pub use config::{CONFIG_FILE, WatcherConfig};
pub use watcher::{FileWatcher, WatchEvent, WatcherService};

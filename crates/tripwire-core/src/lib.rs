//! Tripwire Core — file property cache, dependency traps, and snapshot diffing

pub mod backend;
pub mod cache;
pub mod cell;
pub mod diff;
pub mod error;
pub mod record;
pub mod trap;
pub mod validator;


#[cfg(test)]
pub mod test_utils;

pub use backend::{InMemoryBackend, StatInfo, StorageBackend, TokioBackend};
pub use cache::{ChangeCause, FileCache, TrapEvent};
pub use cell::PropertyCell;
pub use diff::{Diff, DiffEngine, GraphDiff, Snapshot, diff, merge_diffs};
pub use error::{CacheError, CacheResult};
pub use trap::{Binding, Dependencies, Trap, TrapId};
pub use validator::{DependencyValidator, LiveStateValidator};

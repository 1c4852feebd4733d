//! Memoized single-value slot backed by an async producer

use crate::error::CacheResult;
use std::fmt;
use std::future::Future;
use tokio::sync::OnceCell;

/// A lazily computed property such as "the stat of path P".
///
/// The first [`get`](PropertyCell::get) runs the producer; its outcome,
/// success or failure, is stored and handed to every later reader.
/// Concurrent readers wait on the same producer run instead of starting
/// their own. A failed cell stays failed for the life of its record.
pub struct PropertyCell<T> {
    slot: OnceCell<CacheResult<T>>,
}

impl<T: Clone> PropertyCell<T> {
    pub fn new() -> Self {
        PropertyCell {
            slot: OnceCell::new(),
        }
    }

    /// A cell that is already resolved and never calls a producer.
    pub fn resolved(value: T) -> Self {
        PropertyCell {
            slot: OnceCell::new_with(Some(Ok(value))),
        }
    }

    /// Seeded when `value` is present, unresolved otherwise.
    pub fn seeded(value: Option<T>) -> Self {
        match value {
            Some(value) => Self::resolved(value),
            None => Self::new(),
        }
    }

    pub async fn get<F, Fut>(&self, produce: F) -> CacheResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<T>>,
    {
        self.slot.get_or_init(produce).await.clone()
    }

    /// The settled outcome, if any, without running the producer.
    pub fn peek(&self) -> Option<&CacheResult<T>> {
        self.slot.get()
    }

    pub fn is_settled(&self) -> bool {
        self.slot.initialized()
    }
}

impl<T: Clone> Default for PropertyCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for PropertyCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.slot.get() {
            Some(Ok(value)) => f.debug_tuple("Resolved").field(value).finish(),
            Some(Err(err)) => f.debug_tuple("Failed").field(err).finish(),
            None => f.write_str("Unresolved"),
        }
    }
}

//! Test utilities for tripwire-core

use crate::backend::{InMemoryBackend, StatInfo, StorageBackend};
use crate::cache::FileCache;
use async_trait::async_trait;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// In-memory backend whose reads block until the test releases them.
pub struct GatedBackend {
    pub inner: InMemoryBackend,
    gate: Semaphore,
}

impl GatedBackend {
    pub fn new() -> Self {
        GatedBackend {
            inner: InMemoryBackend::new(),
            gate: Semaphore::new(0),
        }
    }

    /// Let `count` pending or future reads through.
    pub fn release(&self, count: usize) {
        self.gate.add_permits(count);
    }
}

#[async_trait]
impl StorageBackend for GatedBackend {
    async fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        permit.forget();
        self.inner.read_file(path).await
    }

    async fn stat(&self, path: &Path) -> io::Result<StatInfo> {
        self.inner.stat(path).await
    }
}

/// A cache over a fresh in-memory backend holding `files` (path, contents,
/// mtime).
pub fn cache_with(files: &[(&str, &str, i64)]) -> (FileCache, Arc<InMemoryBackend>) {
    let backend = Arc::new(InMemoryBackend::new());
    for (path, contents, modified) in files {
        backend.write(*path, *contents, *modified);
    }
    let cache = FileCache::new(backend.clone());
    (cache, backend)
}

/// Drain every event currently queued on a subscription.
pub fn drain<T>(rx: &mut tokio::sync::mpsc::UnboundedReceiver<T>) -> Vec<T> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

//! Storage backends the cache reads through

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::UNIX_EPOCH;

/// The subset of file metadata the cache observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatInfo {
    pub is_file: bool,
    pub modified_millis: i64,
}

impl StatInfo {
    pub fn file(modified_millis: i64) -> Self {
        StatInfo {
            is_file: true,
            modified_millis,
        }
    }

    pub fn directory(modified_millis: i64) -> Self {
        StatInfo {
            is_file: false,
            modified_millis,
        }
    }

    pub fn is_file(&self) -> bool {
        self.is_file
    }

    /// Convert `std` metadata. Platforms without modification times report 0.
    pub fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        let modified_millis = metadata
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map(|elapsed| elapsed.as_millis() as i64)
            .unwrap_or(0);

        StatInfo {
            is_file: metadata.is_file(),
            modified_millis,
        }
    }
}

/// Injectable I/O used to produce file properties.
///
/// These calls are the only points where a cache query suspends.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    async fn read_file(&self, path: &Path) -> io::Result<Vec<u8>>;
    async fn stat(&self, path: &Path) -> io::Result<StatInfo>;
}

/// Backend over the real filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioBackend;

impl TokioBackend {
    pub fn new() -> Self {
        TokioBackend
    }
}

#[async_trait]
impl StorageBackend for TokioBackend {
    async fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        tracing::trace!("read_file {}", path.display());
        tokio::fs::read(path).await
    }

    async fn stat(&self, path: &Path) -> io::Result<StatInfo> {
        tracing::trace!("stat {}", path.display());
        let metadata = tokio::fs::metadata(path).await?;
        Ok(StatInfo::from_metadata(&metadata))
    }
}

#[derive(Debug, Clone)]
enum MemoryEntry {
    File { contents: Vec<u8>, modified_millis: i64 },
    Directory { modified_millis: i64 },
}

/// In-memory filesystem that counts how often it is hit.
///
/// Mutating it does not notify any cache; callers pair writes with the
/// matching `FileCache::on_file_*` call, exactly like a real watcher would.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    entries: Mutex<HashMap<PathBuf, MemoryEntry>>,
    read_calls: AtomicUsize,
    stat_calls: AtomicUsize,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>, modified_millis: i64) {
        self.entries().insert(
            path.into(),
            MemoryEntry::File {
                contents: contents.into(),
                modified_millis,
            },
        );
    }

    pub fn create_dir(&self, path: impl Into<PathBuf>, modified_millis: i64) {
        self.entries()
            .insert(path.into(), MemoryEntry::Directory { modified_millis });
    }

    pub fn remove(&self, path: &Path) -> bool {
        self.entries().remove(path).is_some()
    }

    /// Stat without going through the counters, for building ingestion events.
    pub fn peek_stat(&self, path: &Path) -> Option<StatInfo> {
        self.entries().get(path).map(Self::stat_of)
    }

    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::SeqCst)
    }

    pub fn stat_calls(&self) -> usize {
        self.stat_calls.load(Ordering::SeqCst)
    }

    /// Total number of backend calls served so far.
    pub fn calls(&self) -> usize {
        self.read_calls() + self.stat_calls()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, MemoryEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stat_of(entry: &MemoryEntry) -> StatInfo {
        match entry {
            MemoryEntry::File { modified_millis, .. } => StatInfo::file(*modified_millis),
            MemoryEntry::Directory { modified_millis } => StatInfo::directory(*modified_millis),
        }
    }

    fn not_found(path: &Path) -> io::Error {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("no such file: {}", path.display()),
        )
    }
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    async fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        match self.entries().get(path) {
            Some(MemoryEntry::File { contents, .. }) => Ok(contents.clone()),
            Some(MemoryEntry::Directory { .. }) => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("is a directory: {}", path.display()),
            )),
            None => Err(Self::not_found(path)),
        }
    }

    async fn stat(&self, path: &Path) -> io::Result<StatInfo> {
        self.stat_calls.fetch_add(1, Ordering::SeqCst);
        self.entries()
            .get(path)
            .map(Self::stat_of)
            .ok_or_else(|| Self::not_found(path))
    }
}

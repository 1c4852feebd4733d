//! Per-path bundle of memoized file properties

use crate::backend::{StatInfo, StorageBackend};
use crate::cell::PropertyCell;
use crate::error::{CacheError, CacheResult};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Every observable property of one path, each computed at most once.
///
/// A record is immutable once published in the cache's file table: file
/// events never update a record, they replace it with a fresh one carrying a
/// new generation.
#[derive(Debug)]
pub struct FileRecord {
    path: PathBuf,
    generation: u64,
    is_file: PropertyCell<bool>,
    stat: PropertyCell<StatInfo>,
    modified_time: PropertyCell<i64>,
    buffer: PropertyCell<Arc<Vec<u8>>>,
    text: PropertyCell<Arc<String>>,
    text_hash: PropertyCell<String>,
}

impl FileRecord {
    /// A record with nothing known yet.
    pub fn new(path: PathBuf, generation: u64) -> Self {
        FileRecord {
            path,
            generation,
            is_file: PropertyCell::new(),
            stat: PropertyCell::new(),
            modified_time: PropertyCell::new(),
            buffer: PropertyCell::new(),
            text: PropertyCell::new(),
            text_hash: PropertyCell::new(),
        }
    }

    /// A record pre-seeded from a stat a file event already carried.
    pub fn with_stat(path: PathBuf, generation: u64, stat: Option<StatInfo>) -> Self {
        FileRecord {
            is_file: PropertyCell::seeded(stat.map(|s| s.is_file)),
            stat: PropertyCell::seeded(stat),
            modified_time: PropertyCell::seeded(stat.map(|s| s.modified_millis)),
            ..Self::new(path, generation)
        }
    }

    /// A record for a path known to be gone.
    pub fn absent(path: PathBuf, generation: u64) -> Self {
        FileRecord {
            is_file: PropertyCell::resolved(false),
            ..Self::new(path, generation)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub async fn stat(&self, backend: &dyn StorageBackend) -> CacheResult<StatInfo> {
        self.stat
            .get(|| async {
                backend
                    .stat(&self.path)
                    .await
                    .map_err(|e| CacheError::io(&self.path, e))
            })
            .await
    }

    /// Whether the path is a regular file. A missing path is simply `false`.
    pub async fn is_file(&self, backend: &dyn StorageBackend) -> CacheResult<bool> {
        self.is_file
            .get(|| async {
                match self.stat(backend).await {
                    Ok(stat) => Ok(stat.is_file),
                    Err(err) if err.is_not_found() => Ok(false),
                    Err(err) => Err(err),
                }
            })
            .await
    }

    pub async fn modified_time(&self, backend: &dyn StorageBackend) -> CacheResult<i64> {
        self.modified_time
            .get(|| async { Ok(self.stat(backend).await?.modified_millis) })
            .await
    }

    pub async fn buffer(&self, backend: &dyn StorageBackend) -> CacheResult<Arc<Vec<u8>>> {
        self.buffer
            .get(|| async {
                let bytes = backend
                    .read_file(&self.path)
                    .await
                    .map_err(|e| CacheError::io(&self.path, e))?;
                Ok(Arc::new(bytes))
            })
            .await
    }

    pub async fn text(&self, backend: &dyn StorageBackend) -> CacheResult<Arc<String>> {
        self.text
            .get(|| async {
                let bytes = self.buffer(backend).await?;
                let text = std::str::from_utf8(&bytes).map_err(|_| CacheError::InvalidUtf8 {
                    path: self.path.clone(),
                })?;
                Ok(Arc::new(text.to_owned()))
            })
            .await
    }

    /// Lowercase hex SHA-256 of the decoded text.
    pub async fn text_hash(&self, backend: &dyn StorageBackend) -> CacheResult<String> {
        self.text_hash
            .get(|| async {
                let text = self.text(backend).await?;
                Ok(hash_text(&text))
            })
            .await
    }
}

pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

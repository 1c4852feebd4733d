//! Errors surfaced by cache queries

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub type CacheResult<T> = Result<T, CacheError>;

/// Failure of a single file property query.
///
/// Errors are cloneable because a failed [`PropertyCell`](crate::PropertyCell)
/// hands the same memoized outcome to every reader.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("{} is not valid UTF-8", .path.display())]
    InvalidUtf8 { path: PathBuf },

    /// The record this query was reading was replaced by a file event before
    /// the read finished. The outcome of the read is discarded; interested
    /// traps learn about the change through the notification channel.
    #[error("{} changed while it was being read", .path.display())]
    Superseded { path: PathBuf },
}

impl CacheError {
    pub fn io(path: &Path, source: io::Error) -> Self {
        CacheError::Io {
            path: path.to_path_buf(),
            source: Arc::new(source),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }

    pub fn is_superseded(&self) -> bool {
        matches!(self, CacheError::Superseded { .. })
    }

    pub fn path(&self) -> &Path {
        match self {
            CacheError::Io { path, .. }
            | CacheError::InvalidUtf8 { path }
            | CacheError::Superseded { path } => path,
        }
    }
}

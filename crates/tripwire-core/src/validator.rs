//! Checking saved dependency descriptions against live state

use crate::cache::FileCache;
use crate::trap::{Binding, Dependencies};
use async_trait::async_trait;
use std::path::Path;
use tracing::debug;

/// Decides whether a saved [`Dependencies`] snapshot still describes disk.
#[async_trait]
pub trait DependencyValidator: Send + Sync + 'static {
    async fn validate(&self, cache: &FileCache, dependencies: &Dependencies) -> bool;
}

/// Re-queries the cache for every recorded field and compares. Any query
/// error counts as a mismatch.
#[derive(Debug, Default, Clone, Copy)]
pub struct LiveStateValidator;

impl LiveStateValidator {
    async fn binding_holds(cache: &FileCache, path: &Path, binding: &Binding) -> bool {
        if let Some(expected) = binding.is_file {
            match cache.is_file(path).await {
                Ok(actual) if actual == expected => {}
                _ => return false,
            }
        }

        if let Some(expected) = binding.modified_time {
            match cache.read_modified_time(path).await {
                Ok(actual) if actual == expected => {}
                _ => return false,
            }
        }

        if let Some(expected) = &binding.text_hash {
            match cache.read_text_hash(path).await {
                Ok(actual) if &actual == expected => {}
                _ => return false,
            }
        }

        true
    }
}

#[async_trait]
impl DependencyValidator for LiveStateValidator {
    async fn validate(&self, cache: &FileCache, dependencies: &Dependencies) -> bool {
        for (path, binding) in dependencies {
            if !Self::binding_holds(cache, path, binding).await {
                debug!("Dependency on {} is stale", path.display());
                return false;
            }
        }
        true
    }
}

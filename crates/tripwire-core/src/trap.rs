//! One-shot recorders of what a computation read from the file cache

use crate::backend::StatInfo;
use crate::cache::{ChangeCause, FileCache};
use crate::error::CacheResult;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Identity of a trap, unique within its cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrapId(pub u64);

impl fmt::Display for TrapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a trap observed about one path. `None` means the property was
/// never queried; the first observed value of each field sticks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Binding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_file: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_hash: Option<String>,
}

impl Binding {
    pub fn is_empty(&self) -> bool {
        self.is_file.is_none() && self.modified_time.is_none() && self.text_hash.is_none()
    }

    /// Whether the recorded observations depend on file contents.
    pub fn is_content_sensitive(&self) -> bool {
        self.modified_time.is_some() || self.text_hash.is_some()
    }

    fn observe_is_file(&mut self, is_file: bool) {
        self.is_file.get_or_insert(is_file);
    }

    fn observe_modified_time(&mut self, modified_time: i64) {
        self.modified_time.get_or_insert(modified_time);
    }

    fn observe_text_hash(&mut self, text_hash: &str) {
        self.text_hash.get_or_insert_with(|| text_hash.to_owned());
    }
}

/// Serializable recipe of everything a trap observed, keyed by path.
pub type Dependencies = BTreeMap<PathBuf, Binding>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrapStatus {
    Active,
    Fired(ChangeCause),
}

/// Mutable half of a trap, shared between the handle and the cache index.
#[derive(Debug)]
pub(crate) struct TrapState {
    status: TrapStatus,
    bindings: Dependencies,
    trigger_on_change: HashSet<PathBuf>,
    bound_paths: HashSet<PathBuf>,
}

impl TrapState {
    pub(crate) fn new(bindings: Dependencies) -> Self {
        TrapState {
            status: TrapStatus::Active,
            bindings,
            trigger_on_change: HashSet::new(),
            bound_paths: HashSet::new(),
        }
    }

    pub(crate) fn is_fired(&self) -> bool {
        matches!(self.status, TrapStatus::Fired(_))
    }

    pub(crate) fn trigger_on_change(&mut self, path: &Path) {
        self.trigger_on_change.insert(path.to_path_buf());
    }

    /// Returns `true` if the path was not bound before.
    pub(crate) fn add_bound_path(&mut self, path: &Path) -> bool {
        self.bound_paths.insert(path.to_path_buf())
    }

    pub(crate) fn take_bound_paths(&mut self) -> Vec<PathBuf> {
        self.bound_paths.drain().collect()
    }

    pub(crate) fn should_fire(&self, path: &Path, cause: ChangeCause) -> bool {
        if self.is_fired() {
            return false;
        }
        let binding = self.bindings.get(path);
        match cause {
            ChangeCause::Added => binding.is_some_and(|b| b.is_file == Some(false)),
            ChangeCause::Changed => {
                self.trigger_on_change.contains(path)
                    || binding.is_some_and(Binding::is_content_sensitive)
            }
            ChangeCause::Removed => binding.is_some_and(|b| b.is_file == Some(true)),
        }
    }

    /// Mark fired and hand back the paths to detach from.
    pub(crate) fn fire(&mut self, cause: ChangeCause) -> Vec<PathBuf> {
        self.status = TrapStatus::Fired(cause);
        self.take_bound_paths()
    }

    fn record(&mut self, path: &Path, observe: impl FnOnce(&mut Binding)) {
        // A read that was in flight when the trap fired has nothing to add.
        if self.is_fired() {
            return;
        }
        observe(self.bindings.entry(path.to_path_buf()).or_default());
    }
}

/// Records which file properties a computation read and what it saw.
///
/// Query the cache through the trap; every answer is remembered as a
/// binding. The trap fires at most once, when a file event invalidates one
/// of its bindings, and is then detached from every path. Querying a fired
/// trap is a bug and panics.
pub struct Trap {
    id: TrapId,
    cache: FileCache,
    state: Arc<Mutex<TrapState>>,
}

impl Trap {
    pub(crate) fn new(id: TrapId, cache: FileCache, state: Arc<Mutex<TrapState>>) -> Self {
        Trap { id, cache, state }
    }

    pub fn id(&self) -> TrapId {
        self.id
    }

    pub fn is_fired(&self) -> bool {
        self.lock().is_fired()
    }

    /// The cause of the event that fired this trap, if it has fired.
    pub fn fired_by(&self) -> Option<ChangeCause> {
        match self.lock().status {
            TrapStatus::Fired(cause) => Some(cause),
            TrapStatus::Active => None,
        }
    }

    /// Snapshot of every binding recorded so far. This is what
    /// [`FileCache::rehydrate_trap`] accepts.
    pub fn describe_dependencies(&self) -> Dependencies {
        self.lock().bindings.clone()
    }

    pub async fn is_file(&self, path: impl AsRef<Path>) -> CacheResult<bool> {
        let path = path.as_ref();
        self.bind(path, false);
        let is_file = self.cache.is_file(path).await?;
        self.record(path, |binding| binding.observe_is_file(is_file));
        Ok(is_file)
    }

    pub async fn stat(&self, path: impl AsRef<Path>) -> CacheResult<StatInfo> {
        let path = path.as_ref();
        self.bind(path, true);
        let stat = self.cache.stat(path).await?;
        self.record(path, |binding| {
            binding.observe_is_file(true);
            binding.observe_modified_time(stat.modified_millis);
        });
        Ok(stat)
    }

    pub async fn read_modified_time(&self, path: impl AsRef<Path>) -> CacheResult<i64> {
        let path = path.as_ref();
        self.bind(path, true);
        let modified_time = self.cache.read_modified_time(path).await?;
        self.record(path, |binding| {
            binding.observe_is_file(true);
            binding.observe_modified_time(modified_time);
        });
        Ok(modified_time)
    }

    pub async fn read_buffer(&self, path: impl AsRef<Path>) -> CacheResult<Arc<Vec<u8>>> {
        let path = path.as_ref();
        self.bind(path, true);
        self.read_modified_time(path).await?;
        self.cache.read_buffer(path).await
    }

    pub async fn read_text(&self, path: impl AsRef<Path>) -> CacheResult<Arc<String>> {
        let path = path.as_ref();
        self.bind(path, true);
        self.read_modified_time(path).await?;
        self.cache.read_text(path).await
    }

    pub async fn read_text_hash(&self, path: impl AsRef<Path>) -> CacheResult<String> {
        let path = path.as_ref();
        self.bind(path, true);
        self.read_modified_time(path).await?;
        let text_hash = self.cache.read_text_hash(path).await?;
        self.record(path, |binding| binding.observe_text_hash(&text_hash));
        Ok(text_hash)
    }

    fn bind(&self, path: &Path, trigger_on_change: bool) {
        self.cache.bind_trap(self.id, &self.state, path, trigger_on_change);
    }

    fn record(&self, path: &Path, observe: impl FnOnce(&mut Binding)) {
        self.lock().record(path, observe);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrapState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Trap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Trap")
            .field("id", &self.id)
            .field("status", &state.status)
            .field("paths", &state.bindings.len())
            .finish()
    }
}

impl Drop for Trap {
    fn drop(&mut self) {
        self.cache.release_trap(self.id, &self.state);
    }
}

//! File property cache, event ingestion, and trap invalidation

use crate::backend::{StatInfo, StorageBackend};
use crate::error::{CacheError, CacheResult};
use crate::record::FileRecord;
use crate::trap::{Dependencies, Trap, TrapId, TrapState};
use crate::validator::{DependencyValidator, LiveStateValidator};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc;
use tracing::debug;

/// Which kind of file event invalidated a trap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeCause {
    Added,
    Changed,
    Removed,
}

impl fmt::Display for ChangeCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChangeCause::Added => "added",
            ChangeCause::Changed => "changed",
            ChangeCause::Removed => "removed",
        })
    }
}

/// Sent once for every trap a file event fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrapEvent {
    pub trap: TrapId,
    pub path: PathBuf,
    pub cause: ChangeCause,
}

/// Shared handle to the file cache. Cloning is cheap; all clones see the
/// same records, traps, and subscribers.
#[derive(Clone)]
pub struct FileCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    backend: Arc<dyn StorageBackend>,
    validator: Arc<dyn DependencyValidator>,
    state: Mutex<CacheState>,
}

/// Everything the cache mutates. Only ever touched while holding the lock,
/// and the lock is never held across an await.
#[derive(Default)]
struct CacheState {
    /// `None` marks a path known to be removed.
    files: HashMap<PathBuf, Option<Arc<FileRecord>>>,
    /// Traps observing each path, in registration order.
    traps_by_path: HashMap<PathBuf, Vec<TrapId>>,
    traps: HashMap<TrapId, Weak<Mutex<TrapState>>>,
    subscribers: Vec<mpsc::UnboundedSender<TrapEvent>>,
    last_generation: u64,
    last_trap_id: u64,
}

impl fmt::Debug for FileCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("FileCache")
            .field("files", &state.files.len())
            .field("traps", &state.traps.len())
            .field("subscribers", &state.subscribers.len())
            .finish()
    }
}

impl FileCache {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self::with_validator(backend, Arc::new(LiveStateValidator))
    }

    pub fn with_validator(
        backend: Arc<dyn StorageBackend>,
        validator: Arc<dyn DependencyValidator>,
    ) -> Self {
        FileCache {
            inner: Arc::new(CacheInner {
                backend,
                validator,
                state: Mutex::new(CacheState::default()),
            }),
        }
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.inner.backend
    }

    fn io(&self) -> &dyn StorageBackend {
        &*self.inner.backend
    }

    /// Receive a [`TrapEvent`] for every trap fired from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<TrapEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().subscribers.push(tx);
        rx
    }

    // ── Queries ──────────────────────────────────────────────

    pub async fn is_file(&self, path: impl AsRef<Path>) -> CacheResult<bool> {
        let record = self.record_for(path.as_ref());
        let outcome = record.is_file(self.io()).await;
        self.deliver(&record, outcome)
    }

    pub async fn stat(&self, path: impl AsRef<Path>) -> CacheResult<StatInfo> {
        let record = self.record_for(path.as_ref());
        let outcome = record.stat(self.io()).await;
        self.deliver(&record, outcome)
    }

    pub async fn read_modified_time(&self, path: impl AsRef<Path>) -> CacheResult<i64> {
        let record = self.record_for(path.as_ref());
        let outcome = record.modified_time(self.io()).await;
        self.deliver(&record, outcome)
    }

    pub async fn read_buffer(&self, path: impl AsRef<Path>) -> CacheResult<Arc<Vec<u8>>> {
        let record = self.record_for(path.as_ref());
        let outcome = record.buffer(self.io()).await;
        self.deliver(&record, outcome)
    }

    pub async fn read_text(&self, path: impl AsRef<Path>) -> CacheResult<Arc<String>> {
        let record = self.record_for(path.as_ref());
        let outcome = record.text(self.io()).await;
        self.deliver(&record, outcome)
    }

    pub async fn read_text_hash(&self, path: impl AsRef<Path>) -> CacheResult<String> {
        let record = self.record_for(path.as_ref());
        let outcome = record.text_hash(self.io()).await;
        self.deliver(&record, outcome)
    }

    /// The current record for `path`, created on first observation.
    fn record_for(&self, path: &Path) -> Arc<FileRecord> {
        let mut state = self.lock();
        if let Some(Some(record)) = state.files.get(path) {
            return Arc::clone(record);
        }

        let generation = state.next_generation();
        let record = match state.files.get(path) {
            Some(None) => FileRecord::absent(path.to_path_buf(), generation),
            _ => FileRecord::new(path.to_path_buf(), generation),
        };
        let record = Arc::new(record);
        state
            .files
            .insert(path.to_path_buf(), Some(Arc::clone(&record)));
        record
    }

    /// Hand `outcome` to the caller only if `record` is still current.
    fn deliver<T>(&self, record: &FileRecord, outcome: CacheResult<T>) -> CacheResult<T> {
        let current = matches!(
            self.lock().files.get(record.path()),
            Some(Some(latest)) if latest.generation() == record.generation()
        );
        if current {
            outcome
        } else {
            debug!(
                "Discarding superseded read of {} (generation {})",
                record.path().display(),
                record.generation()
            );
            Err(CacheError::Superseded {
                path: record.path().to_path_buf(),
            })
        }
    }

    // ── Ingestion ────────────────────────────────────────────

    pub fn on_file_added(&self, path: impl Into<PathBuf>, stat: Option<StatInfo>) {
        self.ingest(path.into(), ChangeCause::Added, stat);
    }

    pub fn on_file_changed(&self, path: impl Into<PathBuf>, stat: Option<StatInfo>) {
        self.ingest(path.into(), ChangeCause::Changed, stat);
    }

    pub fn on_file_removed(&self, path: impl Into<PathBuf>) {
        self.ingest(path.into(), ChangeCause::Removed, None);
    }

    fn ingest(&self, path: PathBuf, cause: ChangeCause, stat: Option<StatInfo>) {
        let mut state = self.lock();

        let record = match cause {
            ChangeCause::Removed => None,
            ChangeCause::Added | ChangeCause::Changed => {
                let generation = state.next_generation();
                Some(Arc::new(FileRecord::with_stat(path.clone(), generation, stat)))
            }
        };
        debug!("File {}: {}", cause, path.display());
        state.files.insert(path.clone(), record);

        let events = state.spring_traps(&path, cause);
        state.publish(events);
    }

    // ── Traps ────────────────────────────────────────────────

    /// A new trap with no bindings.
    pub fn create_trap(&self) -> Trap {
        self.register_trap(Dependencies::new())
    }

    /// Resume a trap from a saved [`Trap::describe_dependencies`] if every
    /// recorded observation still holds. `None` means the caller must
    /// recompute.
    ///
    /// The trap is bound before validation starts, so a change ingested while
    /// the validator is waiting on I/O fires it and the result is `None`.
    pub async fn rehydrate_trap(&self, saved: &Dependencies) -> Option<Trap> {
        let trap = self.register_trap(saved.clone());
        if !self.inner.validator.validate(self, saved).await {
            debug!("Saved dependencies on {} paths no longer hold", saved.len());
            return None;
        }
        if trap.is_fired() {
            debug!("Trap {} fired while its dependencies were validated", trap.id());
            return None;
        }
        Some(trap)
    }

    fn register_trap(&self, bindings: Dependencies) -> Trap {
        let mut state = self.lock();
        state.last_trap_id += 1;
        let id = TrapId(state.last_trap_id);

        let paths: Vec<PathBuf> = bindings.keys().cloned().collect();
        let trap_state = Arc::new(Mutex::new(TrapState::new(bindings)));
        state.traps.insert(id, Arc::downgrade(&trap_state));
        for path in paths {
            state.bind(id, &trap_state, &path, false);
        }
        drop(state);

        Trap::new(id, self.clone(), trap_state)
    }

    /// Register `trap` as observing `path`.
    pub(crate) fn bind_trap(
        &self,
        id: TrapId,
        trap: &Mutex<TrapState>,
        path: &Path,
        trigger_on_change: bool,
    ) {
        self.lock().bind(id, trap, path, trigger_on_change);
    }

    /// Remove a dropped trap from every path it observed.
    pub(crate) fn release_trap(&self, id: TrapId, trap: &Mutex<TrapState>) {
        let mut state = self.lock();
        let paths = lock_trap(trap).take_bound_paths();
        state.detach(id, &paths);
    }

    /// Traps currently observing `path`, in registration order.
    pub fn bound_traps(&self, path: impl AsRef<Path>) -> Vec<TrapId> {
        self.lock()
            .traps_by_path
            .get(path.as_ref())
            .cloned()
            .unwrap_or_default()
    }

    /// Whether `path` was removed and not seen again since.
    pub fn is_known_removed(&self, path: impl AsRef<Path>) -> bool {
        matches!(self.lock().files.get(path.as_ref()), Some(None))
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CacheState {
    fn next_generation(&mut self) -> u64 {
        self.last_generation += 1;
        self.last_generation
    }

    fn bind(&mut self, id: TrapId, trap: &Mutex<TrapState>, path: &Path, trigger_on_change: bool) {
        let mut trap = lock_trap(trap);
        assert!(!trap.is_fired(), "trap {id} queried after it fired");

        if trigger_on_change {
            trap.trigger_on_change(path);
        }
        if trap.add_bound_path(path) {
            self.traps_by_path
                .entry(path.to_path_buf())
                .or_default()
                .push(id);
        }
    }

    /// Fire every trap on `path` that `cause` invalidates.
    ///
    /// All fired traps are detached from all of their paths before any event
    /// is produced. Events come back newest registration first.
    fn spring_traps(&mut self, path: &Path, cause: ChangeCause) -> Vec<TrapEvent> {
        let Some(bound) = self.traps_by_path.get(path).cloned() else {
            return Vec::new();
        };

        let mut fired = Vec::new();
        for id in bound {
            let Some(trap) = self.traps.get(&id).and_then(Weak::upgrade) else {
                continue;
            };
            let mut trap = lock_trap(&trap);
            if trap.should_fire(path, cause) {
                fired.push((id, trap.fire(cause)));
            }
        }

        for (id, paths) in &fired {
            self.detach(*id, paths);
        }

        fired
            .into_iter()
            .rev()
            .map(|(trap, _)| {
                debug!("Trap {} fired: {} {}", trap, cause, path.display());
                TrapEvent {
                    trap,
                    path: path.to_path_buf(),
                    cause,
                }
            })
            .collect()
    }

    fn detach(&mut self, id: TrapId, paths: &[PathBuf]) {
        for path in paths {
            if let Some(ids) = self.traps_by_path.get_mut(path) {
                ids.retain(|bound| *bound != id);
                if ids.is_empty() {
                    self.traps_by_path.remove(path);
                }
            }
        }
        self.traps.remove(&id);
    }

    /// Channel sends never call back into the cache, so publishing while
    /// the state lock is held cannot re-enter it.
    fn publish(&mut self, events: Vec<TrapEvent>) {
        if events.is_empty() {
            return;
        }
        self.subscribers
            .retain(|tx| events.iter().all(|event| tx.send(event.clone()).is_ok()));
    }
}

fn lock_trap(trap: &Mutex<TrapState>) -> MutexGuard<'_, TrapState> {
    trap.lock().unwrap_or_else(PoisonError::into_inner)
}

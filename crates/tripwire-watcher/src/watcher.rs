//! Filesystem watcher implementation

use crate::config::WatcherConfig;
use anyhow::Result;
use globset::GlobSet;
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tripwire_core::{FileCache, StatInfo};

/// Events emitted by the file watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// File or directory created
    Created(PathBuf),
    /// File or directory modified
    Modified(PathBuf),
    /// File or directory removed
    Removed(PathBuf),
    /// Renamed, without saying whether the path is the old or the new name
    Renamed(PathBuf),
}

impl WatchEvent {
    pub fn path(&self) -> &Path {
        match self {
            WatchEvent::Created(path)
            | WatchEvent::Modified(path)
            | WatchEvent::Removed(path)
            | WatchEvent::Renamed(path) => path,
        }
    }
}

/// File system watcher that turns notify events into [`WatchEvent`]s
pub struct FileWatcher {
    watcher: RecommendedWatcher,
    event_rx: mpsc::UnboundedReceiver<WatchEvent>,
    root_path: PathBuf,
}

impl FileWatcher {
    /// Create a new file watcher for the given root path
    pub fn new(root_path: impl AsRef<Path>, ignore: GlobSet) -> Result<Self> {
        let root_path = root_path.as_ref().to_path_buf();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let watcher = notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
            match res {
                Ok(event) => {
                    debug!("File system event: {:?}", event);
                    for watch_event in translate(event) {
                        if ignore.is_match(watch_event.path()) {
                            continue;
                        }
                        if let Err(e) = event_tx.send(watch_event) {
                            warn!("Failed to forward watch event: {}", e);
                        }
                    }
                }
                Err(e) => {
                    error!("File system watch error: {}", e);
                }
            }
        })?;

        Ok(Self {
            watcher,
            event_rx,
            root_path,
        })
    }

    /// Watch a directory recursively
    pub fn watch_directory(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        info!("Watching directory: {:?}", path);

        self.watcher.watch(path, RecursiveMode::Recursive)?;
        Ok(())
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Get the event receiver
    pub fn event_receiver(&mut self) -> &mut mpsc::UnboundedReceiver<WatchEvent> {
        &mut self.event_rx
    }
}

/// Map one notify event onto cache-level events. Renames become a removal of
/// the old name and a creation of the new one.
pub fn translate(event: notify::Event) -> Vec<WatchEvent> {
    let notify::Event { kind, paths, .. } = event;
    match kind {
        EventKind::Create(_) => paths.into_iter().map(WatchEvent::Created).collect(),
        EventKind::Remove(_) => paths.into_iter().map(WatchEvent::Removed).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            paths.into_iter().map(WatchEvent::Removed).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            paths.into_iter().map(WatchEvent::Created).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut paths = paths.into_iter();
            let mut events = Vec::new();
            if let Some(from) = paths.next() {
                events.push(WatchEvent::Removed(from));
            }
            events.extend(paths.map(WatchEvent::Created));
            events
        }
        EventKind::Modify(ModifyKind::Name(_)) => paths.into_iter().map(WatchEvent::Renamed).collect(),
        EventKind::Modify(_) => paths.into_iter().map(WatchEvent::Modified).collect(),
        _ => Vec::new(),
    }
}

/// Watcher service that feeds filesystem events into a [`FileCache`]
pub struct WatcherService {
    watcher: FileWatcher,
    cache: FileCache,
}

impl WatcherService {
    /// Create a new watcher service for `root_path`
    pub fn new(root_path: impl AsRef<Path>, cache: FileCache, config: &WatcherConfig) -> Result<Self> {
        let watcher = FileWatcher::new(root_path, config.ignore_set()?)?;
        Ok(Self { watcher, cache })
    }

    pub fn cache(&self) -> &FileCache {
        &self.cache
    }

    /// Start watching the project directory
    pub fn start_watching(&mut self) -> Result<()> {
        let root_path = self.watcher.root_path().to_path_buf();
        self.watcher.watch_directory(&root_path)?;

        info!("Started watching project directory: {:?}", root_path);
        Ok(())
    }

    /// Wait for the next filesystem event and push it into the cache.
    /// Returns `false` once the watcher has shut down.
    pub async fn ingest_next(&mut self) -> bool {
        match self.watcher.event_receiver().recv().await {
            Some(event) => {
                apply_event(&self.cache, event).await;
                true
            }
            None => false,
        }
    }
}

/// Push one watch event into the cache, pre-seeding the stat when the path
/// can still be read. Directory events are dropped.
pub async fn apply_event(cache: &FileCache, event: WatchEvent) {
    debug!("Processing watch event: {:?}", event);

    match event {
        WatchEvent::Created(path) => {
            if let Some(stat) = stat_path(&path).await {
                cache.on_file_added(path, stat);
            }
        }
        WatchEvent::Modified(path) => {
            if let Some(stat) = stat_path(&path).await {
                cache.on_file_changed(path, stat);
            }
        }
        WatchEvent::Removed(path) => {
            cache.on_file_removed(path);
        }
        // Whichever side of the rename this was, the stat tells what is
        // there now. A file that appeared may replace one already cached, so
        // it is reported both as added and as changed.
        WatchEvent::Renamed(path) => match stat_path(&path).await {
            None => {}
            Some(None) => cache.on_file_removed(path),
            Some(stat) => {
                cache.on_file_added(path.clone(), stat);
                cache.on_file_changed(path, stat);
            }
        },
    }
}

/// `None` for directories, `Some(None)` when the stat itself failed.
async fn stat_path(path: &Path) -> Option<Option<StatInfo>> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_dir() => None,
        Ok(metadata) => Some(Some(StatInfo::from_metadata(&metadata))),
        Err(e) => {
            debug!("Could not stat {}: {}", path.display(), e);
            Some(None)
        }
    }
}

//! CLI command implementations

use anyhow::Context;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tripwire_core::{
    CacheResult, Dependencies, FileCache, GraphDiff, Snapshot, TokioBackend, Trap, diff as snapshot_diff,
};
use tripwire_watcher::{WatcherConfig, WatcherService};

fn disk_cache() -> FileCache {
    FileCache::new(Arc::new(TokioBackend::new()))
}

fn resolve(root: &Path, file: &Path) -> PathBuf {
    if file.is_absolute() {
        file.to_path_buf()
    } else {
        root.join(file)
    }
}

/// Read the text hash of every file through one trap.
async fn arm(cache: &FileCache, files: &[PathBuf]) -> anyhow::Result<Trap> {
    let trap = cache.create_trap();
    for file in files {
        trap.read_text_hash(file)
            .await
            .with_context(|| format!("Failed to read {}", file.display()))?;
    }
    Ok(trap)
}

pub async fn deps(root: PathBuf, files: Vec<PathBuf>) -> anyhow::Result<()> {
    let files: Vec<PathBuf> = files.iter().map(|f| resolve(&root, f)).collect();
    let cache = disk_cache();
    let trap = arm(&cache, &files).await?;

    let json = serde_json::to_string_pretty(&trap.describe_dependencies())?;
    println!("{json}");
    Ok(())
}

/// Returns whether the saved dependencies are still valid.
pub async fn check(root: PathBuf, saved: PathBuf) -> anyhow::Result<bool> {
    let saved = resolve(&root, &saved);
    let text = std::fs::read_to_string(&saved)
        .with_context(|| format!("Failed to read {}", saved.display()))?;
    let dependencies: Dependencies = serde_json::from_str(&text)
        .with_context(|| format!("Invalid dependency description in {}", saved.display()))?;

    let cache = disk_cache();
    let valid = cache.rehydrate_trap(&dependencies).await.is_some();
    println!("{}", if valid { "valid" } else { "stale" });
    Ok(valid)
}

fn load_snapshot(path: &Path) -> anyhow::Result<Snapshot<String, serde_json::Value>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let snapshot: BTreeMap<String, serde_json::Value> = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a JSON object snapshot", path.display()))?;
    Ok(snapshot)
}

pub fn diff(from: PathBuf, to: PathBuf) -> anyhow::Result<()> {
    let diff = snapshot_diff(load_snapshot(&from)?, load_snapshot(&to)?);
    let report = GraphDiff::from_diff(1, &diff);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Observe `file` through `trap`: existence first, then its text hash. A
/// missing file is recorded as absent so its creation fires the trap.
async fn observe(trap: &Trap, file: &Path) -> CacheResult<Option<String>> {
    if !trap.is_file(file).await? {
        return Ok(None);
    }
    trap.read_text_hash(file).await.map(Some)
}

/// Observe every file through `trap`. Returns `false` as soon as the trap
/// has fired, since a fired trap must not be queried again.
async fn observe_all(trap: &Trap, files: &[PathBuf]) -> bool {
    for file in files {
        if trap.is_fired() {
            return false;
        }
        match observe(trap, file).await {
            Ok(Some(hash)) => tracing::debug!("{} {}", &hash[..12], file.display()),
            Ok(None) => tracing::warn!("{} does not exist yet", file.display()),
            Err(e) => tracing::warn!("{}", e),
        }
    }
    !trap.is_fired()
}

/// A trap over `files` that was still armed after every file was observed.
async fn rearm(cache: &FileCache, files: &[PathBuf]) -> Trap {
    loop {
        let trap = cache.create_trap();
        if observe_all(&trap, files).await {
            return trap;
        }
        tracing::debug!("Trap {} fired while arming, starting over", trap.id());
    }
}

/// Events are ingested on this task between arming passes, so a trap is
/// never fired underneath a pass that is still querying it.
pub async fn watch(root: PathBuf, files: Vec<PathBuf>) -> anyhow::Result<()> {
    let config = WatcherConfig::load(&root)?;
    let files: Vec<PathBuf> = files.iter().map(|f| resolve(&root, f)).collect();

    let cache = disk_cache();
    let mut invalidations = cache.subscribe();
    let mut service = WatcherService::new(&root, cache, &config)?;
    service.start_watching()?;

    let mut trap = rearm(service.cache(), &files).await;
    tracing::info!("Tracking {} files", files.len());

    while service.ingest_next().await {
        let mut fired = false;
        while let Ok(event) = invalidations.try_recv() {
            if event.trap == trap.id() {
                tracing::info!("{} {}", event.cause, event.path.display());
                fired = true;
            }
        }
        if fired {
            trap = rearm(service.cache(), &files).await;
        }
    }

    Ok(())
}

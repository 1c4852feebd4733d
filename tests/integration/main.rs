//! Integration tests for Tripwire
//!
//! These tests drive the CLI binary and the library crates together.

use std::path::Path;
use std::process::{Command, Output};
use std::sync::Arc;
use tempfile::TempDir;
use tripwire_core::{ChangeCause, Dependencies, FileCache, StatInfo, TokioBackend, merge_diffs};

fn tripwire(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_tripwire"))
        .arg("--root")
        .arg(root)
        .args(args)
        .output()
        .expect("Failed to execute tripwire")
}

/// Test that the CLI can be invoked
#[test]
fn test_cli_invocation() {
    let temp_dir = TempDir::new().unwrap();
    let output = tripwire(temp_dir.path(), &["--help"]);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Fine-grained file dependency tracking"));
    assert!(stdout.contains("deps"));
    assert!(stdout.contains("check"));
}

/// Saved dependencies stay valid until a tracked file changes
#[test]
fn test_deps_then_check() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    std::fs::write(root.join("index.js"), "import './a.js';").unwrap();
    std::fs::write(root.join("a.js"), "export {};").unwrap();

    let output = tripwire(root, &["deps", "index.js", "a.js"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let saved: Dependencies = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(saved.len(), 2);
    assert!(saved.values().all(|b| b.is_file == Some(true) && b.text_hash.is_some()));
    std::fs::write(root.join("deps.json"), &output.stdout).unwrap();

    let output = tripwire(root, &["check", "deps.json"]);
    assert!(output.status.success());
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "valid");

    std::fs::write(root.join("a.js"), "export const changed = true;").unwrap();
    let output = tripwire(root, &["check", "deps.json"]);
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "stale");
}

/// The diff command reports new, pruned, and changed nodes
#[test]
fn test_diff_command() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    std::fs::write(root.join("before.json"), r#"{"a": {"deps": ["b"]}, "b": {"deps": []}}"#).unwrap();
    std::fs::write(root.join("after.json"), r#"{"a": {"deps": []}, "c": {"deps": []}}"#).unwrap();

    let output = tripwire(
        root,
        &[
            "diff",
            root.join("before.json").to_str().unwrap(),
            root.join("after.json").to_str().unwrap(),
        ],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["new_nodes"], serde_json::json!(["c"]));
    assert_eq!(report["pruned_nodes"], serde_json::json!(["b"]));
    assert_eq!(report["changed_nodes"], serde_json::json!(["a"]));
}

/// A trap over real files survives a restart and fires on the next change
#[tokio::test]
async fn test_disk_trap_resumes_after_restart() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("style.css");
    std::fs::write(&file, "body { color: red; }").unwrap();

    let saved = {
        let cache = FileCache::new(Arc::new(TokioBackend::new()));
        let trap = cache.create_trap();
        trap.read_text_hash(&file).await.unwrap();
        trap.describe_dependencies()
    };

    let cache = FileCache::new(Arc::new(TokioBackend::new()));
    let mut events = cache.subscribe();
    let trap = cache.rehydrate_trap(&saved).await.expect("dependencies still hold");

    std::fs::write(&file, "body { color: blue; }").unwrap();
    let stat = StatInfo::from_metadata(&std::fs::metadata(&file).unwrap());
    cache.on_file_changed(&file, Some(stat));

    let event = events.recv().await.unwrap();
    assert_eq!(event.trap, trap.id());
    assert_eq!(event.cause, ChangeCause::Changed);
    assert!(trap.is_fired());
}

/// Merged build diffs only compare the outer snapshots
#[test]
fn test_merged_build_diffs() {
    use std::collections::BTreeMap;
    use tripwire_core::DiffEngine;

    let mut engine: DiffEngine<String, u32> = DiffEngine::new();
    let (_, first) = engine.advance(BTreeMap::from([("a".to_string(), 1)]));
    let (_, second) = engine.advance(BTreeMap::from([("a".to_string(), 1), ("b".to_string(), 2)]));
    let (report, third) = engine.advance(BTreeMap::from([("a".to_string(), 5)]));
    assert_eq!(report.sequence, 3);

    let merged = merge_diffs(&second, &third);
    assert!(merged.new_nodes().is_empty());
    assert!(merged.pruned_nodes().is_empty());
    assert_eq!(merged.changed_nodes(), vec!["a".to_string()]);

    let whole = merge_diffs(&merge_diffs(&first, &second), &third);
    assert_eq!(whole.new_nodes(), vec!["a".to_string()]);
    assert!(whole.changed_nodes().is_empty());
}

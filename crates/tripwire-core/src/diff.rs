//! Snapshot diffing between successive dependency-graph builds

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Immutable key→value view of a dependency graph at one point in time.
pub type Snapshot<K, V> = BTreeMap<K, V>;

/// A pair of snapshots. All node queries are computed on demand from the
/// two endpoints, with values compared by deep equality.
pub struct Diff<K, V> {
    from: Arc<Snapshot<K, V>>,
    to: Arc<Snapshot<K, V>>,
}

impl<K, V> Clone for Diff<K, V> {
    fn clone(&self) -> Self {
        Diff {
            from: Arc::clone(&self.from),
            to: Arc::clone(&self.to),
        }
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for Diff<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diff")
            .field("from", &self.from)
            .field("to", &self.to)
            .finish()
    }
}

/// Diff between two snapshots.
pub fn diff<K, V>(
    from: impl Into<Arc<Snapshot<K, V>>>,
    to: impl Into<Arc<Snapshot<K, V>>>,
) -> Diff<K, V> {
    Diff {
        from: from.into(),
        to: to.into(),
    }
}

/// Compose two chronologically adjacent diffs into one spanning both.
///
/// This is O(1) and only keeps the outer endpoints, so the result is a coarse
/// before/after comparison, not an event log: a node added in `first` and
/// pruned in `second` is neither new, pruned, nor changed in the merge.
///
/// `first.to()` and `second.from()` must describe the same build. That is
/// the caller's responsibility and is only checked in debug builds.
pub fn merge_diffs<K, V>(first: &Diff<K, V>, second: &Diff<K, V>) -> Diff<K, V>
where
    K: Ord,
    V: PartialEq,
{
    debug_assert!(
        Arc::ptr_eq(&first.to, &second.from) || first.to == second.from,
        "merged diffs are not adjacent"
    );
    Diff {
        from: Arc::clone(&first.from),
        to: Arc::clone(&second.to),
    }
}

impl<K, V> Diff<K, V> {
    pub fn from(&self) -> &Snapshot<K, V> {
        &self.from
    }

    pub fn to(&self) -> &Snapshot<K, V> {
        &self.to
    }
}

impl<K: Ord + Clone, V: PartialEq> Diff<K, V> {
    /// Keys present in `to` but not in `from`.
    pub fn new_nodes(&self) -> Vec<K> {
        self.to
            .keys()
            .filter(|key| !self.from.contains_key(*key))
            .cloned()
            .collect()
    }

    /// Keys present in `from` but not in `to`.
    pub fn pruned_nodes(&self) -> Vec<K> {
        self.from
            .keys()
            .filter(|key| !self.to.contains_key(*key))
            .cloned()
            .collect()
    }

    /// Keys present on both sides whose values differ.
    pub fn changed_nodes(&self) -> Vec<K> {
        self.to
            .iter()
            .filter(|(key, value)| self.from.get(*key).is_some_and(|old| old != *value))
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.from.len() == self.to.len()
            && self
                .to
                .iter()
                .all(|(key, value)| self.from.get(key) == Some(value))
    }
}

/// Report of what changed between builds, ready to hand to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphDiff<K> {
    /// Monotonically increasing build sequence number.
    pub sequence: u64,
    pub new_nodes: Vec<K>,
    pub pruned_nodes: Vec<K>,
    pub changed_nodes: Vec<K>,
}

impl<K> GraphDiff<K> {
    pub fn is_empty(&self) -> bool {
        self.new_nodes.is_empty() && self.pruned_nodes.is_empty() && self.changed_nodes.is_empty()
    }
}

impl<K: Ord + Clone> GraphDiff<K> {
    pub fn from_diff<V: PartialEq>(sequence: u64, diff: &Diff<K, V>) -> Self {
        GraphDiff {
            sequence,
            new_nodes: diff.new_nodes(),
            pruned_nodes: diff.pruned_nodes(),
            changed_nodes: diff.changed_nodes(),
        }
    }
}

/// Remembers the previous build's snapshot so each new build can be diffed
/// against it.
pub struct DiffEngine<K, V> {
    sequence: u64,
    last: Arc<Snapshot<K, V>>,
}

impl<K: Ord + Clone, V: PartialEq> DiffEngine<K, V> {
    pub fn new() -> Self {
        DiffEngine {
            sequence: 0,
            last: Arc::new(Snapshot::new()),
        }
    }

    /// Record the next build's snapshot and return the diff since the last
    /// one. The first build is diffed against an empty graph.
    pub fn advance(&mut self, next: Snapshot<K, V>) -> (GraphDiff<K>, Diff<K, V>) {
        let next = Arc::new(next);
        let diff = diff(Arc::clone(&self.last), Arc::clone(&next));
        self.last = next;
        self.sequence += 1;
        (GraphDiff::from_diff(self.sequence, &diff), diff)
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn last_snapshot(&self) -> &Snapshot<K, V> {
        &self.last
    }
}

impl<K: Ord + Clone, V: PartialEq> Default for DiffEngine<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

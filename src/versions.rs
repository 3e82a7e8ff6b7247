/// Version store: the ordered list of snapshots for the current lineage.
///
/// Append-only during normal generation. The only way to drop snapshots is
/// `truncate_after` (a restore) or `clear` (start over / fresh prompt). Ids are
/// handed out by the store itself from a counter that restore rewinds, so ids
/// are strictly increasing and contiguous from the first element.
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::document::Document;
use crate::turns::TurnLog;

// ── SnapshotId ────────────────────────────────────────────────────────────────

/// Scoped to one lineage, not globally unique: after a restore to `n` the
/// next snapshot is `n + 1` again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SnapshotId(u64);

impl SnapshotId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    #[cfg(test)]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

// ── Snapshot ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    id: SnapshotId,
    prompt: String,
    document: Document,
    /// Log as of this snapshot, including the round that produced it
    turn_log: TurnLog,
    created_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn id(&self) -> SnapshotId {
        self.id
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn turn_log(&self) -> &TurnLog {
        &self.turn_log
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

// ── VersionStore ──────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct VersionStore {
    snapshots: Vec<Arc<Snapshot>>,
    /// Id of the most recently allocated snapshot; 0 = none yet
    counter: u64,
}

impl VersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id the next `push` will assign.
    pub fn next_id(&self) -> SnapshotId {
        SnapshotId(self.counter + 1)
    }

    /// Allocate the next id and append a snapshot for it.
    pub fn push(&mut self, prompt: String, document: Document, turn_log: TurnLog) -> Arc<Snapshot> {
        let id = self.next_id();
        self.counter = id.0;
        let snapshot = Arc::new(Snapshot {
            id,
            prompt,
            document,
            turn_log,
            created_at: Utc::now(),
        });
        debug_assert!(
            self.snapshots.last().is_none_or(|s| s.id.0 + 1 == self.counter),
            "snapshot ids must stay contiguous"
        );
        self.snapshots.push(Arc::clone(&snapshot));
        snapshot
    }

    pub fn get(&self, id: SnapshotId) -> Option<Arc<Snapshot>> {
        self.position(id).map(|i| Arc::clone(&self.snapshots[i]))
    }

    pub fn latest(&self) -> Option<&Arc<Snapshot>> {
        self.snapshots.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Snapshot>> {
        self.snapshots.iter()
    }

    pub fn ids(&self) -> Vec<SnapshotId> {
        self.snapshots.iter().map(|s| s.id).collect()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Keep snapshots up to and including `id`, drop the rest, and rewind the
    /// counter so numbering continues from `id`. Returns the dropped snapshots,
    /// or `None` if `id` is not in the store (nothing is changed then).
    pub fn truncate_after(&mut self, id: SnapshotId) -> Option<Vec<Arc<Snapshot>>> {
        let pos = self.position(id)?;
        let dropped = self.snapshots.split_off(pos + 1);
        self.counter = id.0;
        Some(dropped)
    }

    /// Drop everything and reset the counter to zero.
    pub fn clear(&mut self) {
        self.snapshots.clear();
        self.counter = 0;
    }

    fn position(&self, id: SnapshotId) -> Option<usize> {
        // Ids are sorted, so binary search is exact.
        self.snapshots.binary_search_by_key(&id, |s| s.id).ok()
    }
}

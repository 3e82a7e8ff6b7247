/// Timeline and branch control over a session's version store.
///
/// `preview` is a pure read: it hands out a shared handle to an immutable
/// snapshot and changes nothing. `restore` is destructive: everything after the
/// restored snapshot is dropped and the next generation reuses the freed ids.
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{Rejection, SessionError};
use crate::session::Session;
use crate::versions::{Snapshot, SnapshotId};

const PROMPT_PREVIEW_CHARS: usize = 48;

/// Read-only view of a past snapshot, e.g. for an overlay.
#[derive(Debug, Clone, PartialEq)]
pub struct Preview {
    snapshot: Arc<Snapshot>,
}

impl Preview {
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn id(&self) -> SnapshotId {
        self.snapshot.id()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TimelineEntry {
    Snapshot {
        id: SnapshotId,
        prompt: String,
        created_at: DateTime<Utc>,
        active: bool,
    },
    /// The current editable position; always last
    LiveEdge,
}

impl Session {
    pub fn preview(&self, id: SnapshotId) -> Result<Preview, SessionError> {
        match self.versions.get(id) {
            Some(snapshot) => Ok(Preview { snapshot }),
            None => {
                log::error!("preview of unknown snapshot {id} (have {:?})", self.versions.ids());
                Err(SessionError::SnapshotNotFound(id))
            }
        }
    }

    /// Rewind to `id`: drop later snapshots, adopt its turn log, display it.
    /// A refinement submitted afterwards sees exactly the context it would
    /// have seen right after `id` was first created.
    pub fn restore(&mut self, id: SnapshotId) -> Result<Arc<Snapshot>, SessionError> {
        if self.is_generating() {
            return Err(Rejection::Busy.into());
        }
        let Some(snapshot) = self.versions.get(id) else {
            log::error!("restore of unknown snapshot {id} (have {:?})", self.versions.ids());
            return Err(SessionError::SnapshotNotFound(id));
        };

        if let Some(dropped) = self.versions.truncate_after(id) {
            if !dropped.is_empty() {
                log::debug!("restore {id}: discarded {} later snapshot(s)", dropped.len());
            }
        }
        self.rebase_onto(&snapshot);
        Ok(snapshot)
    }

    /// Snapshots in id order, active one flagged, terminated by `LiveEdge`.
    pub fn timeline(&self) -> Vec<TimelineEntry> {
        let active = self.active_snapshot_id();
        let mut entries: Vec<TimelineEntry> = self
            .versions
            .iter()
            .map(|s| TimelineEntry::Snapshot {
                id: s.id(),
                prompt: preview_text(s.prompt()),
                created_at: s.created_at(),
                active: Some(s.id()) == active,
            })
            .collect();
        debug_assert!(
            active.is_none() || self.versions.latest().map(|s| s.id()) == active,
            "timeline must end at the active snapshot"
        );
        entries.push(TimelineEntry::LiveEdge);
        entries
    }
}

fn preview_text(prompt: &str) -> String {
    let first = prompt.lines().next().unwrap_or(prompt);
    if first.chars().count() <= PROMPT_PREVIEW_CHARS {
        first.to_string()
    } else {
        let cut: String = first.chars().take(PROMPT_PREVIEW_CHARS - 1).collect();
        format!("{cut}…")
    }
}

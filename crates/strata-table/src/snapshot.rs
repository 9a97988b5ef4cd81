//! Snapshots: immutable, fully committed table versions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Snapshot identifier, assigned monotonically per table starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(u64);

impl SnapshotId {
    /// Id of the root snapshot created with the table.
    pub const ROOT: Self = Self(1);

    /// Wraps a raw id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the id following this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of change a snapshot records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Files added, nothing removed.
    Append,
    /// Files removed and replaced by new files.
    Overwrite,
    /// Files removed.
    Delete,
    /// Manifests rewritten without changing live data.
    Replace,
}

impl OperationKind {
    /// Returns the lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Append => "append",
            Self::Overwrite => "overwrite",
            Self::Delete => "delete",
            Self::Replace => "replace",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters describing one snapshot's change and resulting totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    /// Files added by this snapshot.
    pub added_files: u64,
    /// Files removed by this snapshot.
    pub removed_files: u64,
    /// Rows added by this snapshot.
    pub added_rows: u64,
    /// Rows removed by this snapshot.
    pub removed_rows: u64,
    /// Live files after this snapshot.
    pub total_files: u64,
    /// Live rows after this snapshot.
    pub total_rows: u64,
}

impl SnapshotSummary {
    /// Builds a summary from the parent's totals and this change.
    #[must_use]
    pub const fn derive(
        parent: Option<&Self>,
        added_files: u64,
        added_rows: u64,
        removed_files: u64,
        removed_rows: u64,
    ) -> Self {
        let (files, rows) = match parent {
            Some(p) => (p.total_files, p.total_rows),
            None => (0, 0),
        };
        Self {
            added_files,
            removed_files,
            added_rows,
            removed_rows,
            total_files: (files + added_files).saturating_sub(removed_files),
            total_rows: (rows + added_rows).saturating_sub(removed_rows),
        }
    }
}

/// One committed table version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Unique, monotonically assigned id.
    pub snapshot_id: SnapshotId,
    /// Parent snapshot; `None` only for the root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_snapshot_id: Option<SnapshotId>,
    /// Sequence number of the commit that produced this snapshot.
    pub sequence_number: u64,
    /// Commit time.
    pub committed_at: DateTime<Utc>,
    /// Kind of change.
    pub operation: OperationKind,
    /// Location of this snapshot's manifest list.
    pub manifest_list: String,
    /// Change counters and totals.
    pub summary: SnapshotSummary,
}

impl Snapshot {
    /// Returns true for the table's root snapshot.
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.parent_snapshot_id.is_none()
    }
}

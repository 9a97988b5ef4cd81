//! Manifests and manifest lists.
//!
//! A manifest lists data file entries written by one commit. A manifest list
//! is the per-snapshot list of manifests, each annotated with partition
//! bounds and counts so whole manifests can be skipped during planning.
//!
//! Manifest lists are append-only across commits: a new snapshot's list is
//! its parent's list plus the commit's manifest. Removals are recorded as
//! `deleted` tombstones in the new manifest rather than by rewriting older
//! manifests.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::data_file::{DataFileEntry, FileStatus};
use crate::document::{Document, DocumentKind};
use crate::snapshot::SnapshotId;
use crate::value::Value;

/// Bounds of one partition field across a manifest's live entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldSummary {
    /// Smallest non-null partition value, if bounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower: Option<Value>,
    /// Largest non-null partition value, if bounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<Value>,
    /// True if any live entry has a null value for this field.
    pub contains_null: bool,
    /// True if bounds could not be maintained (NaN or incomparable values).
    #[serde(default)]
    pub unbounded: bool,
}

impl FieldSummary {
    fn observe(&mut self, value: &Value) {
        if value.is_null() {
            self.contains_null = true;
            return;
        }
        if self.unbounded {
            return;
        }
        if value.is_nan() {
            self.make_unbounded();
            return;
        }
        let lower = match &self.lower {
            None => Some(value.clone()),
            Some(current) => match value.compare(current) {
                Some(Ordering::Less) => Some(value.clone()),
                Some(_) => None,
                None => return self.make_unbounded(),
            },
        };
        let upper = match &self.upper {
            None => Some(value.clone()),
            Some(current) => match value.compare(current) {
                Some(Ordering::Greater) => Some(value.clone()),
                Some(_) => None,
                None => return self.make_unbounded(),
            },
        };
        if lower.is_some() {
            self.lower = lower;
        }
        if upper.is_some() {
            self.upper = upper;
        }
    }

    fn make_unbounded(&mut self) {
        self.unbounded = true;
        self.lower = None;
        self.upper = None;
    }
}

/// A manifest-list entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestFile {
    /// Location of the manifest.
    pub manifest_path: String,
    /// Snapshot that wrote the manifest.
    pub added_snapshot_id: SnapshotId,
    /// Bounds per partition field, in spec order.
    pub partitions: Vec<FieldSummary>,
    /// Entries with status `added`.
    pub added_files_count: u64,
    /// Entries with status `existing`.
    pub existing_files_count: u64,
    /// Entries with status `deleted`.
    pub deleted_files_count: u64,
    /// Rows in `added` entries.
    pub added_rows_count: u64,
    /// Rows in `existing` entries.
    pub existing_rows_count: u64,
    /// Rows in `deleted` entries.
    pub deleted_rows_count: u64,
}

impl ManifestFile {
    /// Summarizes a manifest's entries.
    #[must_use]
    pub fn summarize(
        manifest_path: String,
        added_snapshot_id: SnapshotId,
        partition_arity: usize,
        entries: &[DataFileEntry],
    ) -> Self {
        let mut summary = Self {
            manifest_path,
            added_snapshot_id,
            partitions: vec![FieldSummary::default(); partition_arity],
            added_files_count: 0,
            existing_files_count: 0,
            deleted_files_count: 0,
            added_rows_count: 0,
            existing_rows_count: 0,
            deleted_rows_count: 0,
        };
        for entry in entries {
            match entry.status {
                FileStatus::Added => {
                    summary.added_files_count += 1;
                    summary.added_rows_count += entry.record_count;
                }
                FileStatus::Existing => {
                    summary.existing_files_count += 1;
                    summary.existing_rows_count += entry.record_count;
                }
                FileStatus::Deleted => {
                    summary.deleted_files_count += 1;
                    summary.deleted_rows_count += entry.record_count;
                    continue;
                }
            }
            for (field, value) in summary.partitions.iter_mut().zip(entry.partition.values()) {
                field.observe(value);
            }
        }
        summary
    }

    /// Number of `added` plus `existing` entries.
    #[must_use]
    pub const fn live_files_count(&self) -> u64 {
        self.added_files_count + self.existing_files_count
    }

    /// Returns true if the manifest carries tombstones.
    #[must_use]
    pub const fn has_deletes(&self) -> bool {
        self.deleted_files_count > 0
    }
}

/// A manifest document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Snapshot that wrote the manifest.
    pub snapshot_id: SnapshotId,
    /// Data file entries.
    pub entries: Vec<DataFileEntry>,
}

impl Document for Manifest {
    const KIND: DocumentKind = DocumentKind::Manifest;
}

/// A manifest list document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestList {
    /// Snapshot the list belongs to.
    pub snapshot_id: SnapshotId,
    /// Parent of that snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_snapshot_id: Option<SnapshotId>,
    /// Manifests, oldest first.
    pub manifests: Vec<ManifestFile>,
}

impl Document for ManifestList {
    const KIND: DocumentKind = DocumentKind::ManifestList;
}

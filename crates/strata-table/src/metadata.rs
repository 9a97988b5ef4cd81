//! Table metadata documents.
//!
//! A metadata document is produced by every commit and never modified. It
//! holds the schema, partition spec and the append-only snapshot log. The log
//! is kept sorted by snapshot id so lookups are a binary search over the
//! arena rather than a graph walk.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::document::{Document, DocumentKind};
use crate::error::{Result, TableError};
use crate::ident::TableIdent;
use crate::partition::PartitionSpec;
use crate::schema::Schema;
use crate::snapshot::{Snapshot, SnapshotId};

/// A prior metadata location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataLogEntry {
    /// When that metadata was superseded.
    pub timestamp: DateTime<Utc>,
    /// Its location.
    pub metadata_file: String,
}

/// Immutable table metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    /// Table identity at creation.
    pub ident: TableIdent,
    /// Unique table id; distinguishes re-created tables with the same name.
    pub table_uuid: Uuid,
    /// Root location of the table's objects.
    pub location: String,
    /// Sequence number of the latest snapshot.
    pub last_sequence_number: u64,
    /// When this metadata was produced.
    pub last_updated_at: DateTime<Utc>,
    /// Current schema.
    pub schema: Schema,
    /// Partition spec.
    pub partition_spec: PartitionSpec,
    /// Snapshot the table currently designates.
    pub current_snapshot_id: SnapshotId,
    /// Snapshot arena, ascending by id.
    pub snapshots: Vec<Snapshot>,
    /// Locations of superseded metadata, oldest first.
    #[serde(default)]
    pub metadata_log: Vec<MetadataLogEntry>,
    /// Free-form table properties.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl Document for TableMetadata {
    const KIND: DocumentKind = DocumentKind::TableMetadata;
}

impl TableMetadata {
    /// Creates metadata for a new table whose only snapshot is `root`.
    #[must_use]
    pub fn new_table(
        ident: TableIdent,
        location: String,
        schema: Schema,
        partition_spec: PartitionSpec,
        root: Snapshot,
    ) -> Self {
        Self {
            ident,
            table_uuid: Uuid::new_v4(),
            location,
            last_sequence_number: root.sequence_number,
            last_updated_at: root.committed_at,
            schema,
            partition_spec,
            current_snapshot_id: root.snapshot_id,
            snapshots: vec![root],
            metadata_log: Vec::new(),
            properties: BTreeMap::new(),
        }
    }

    /// Looks up a snapshot by id.
    #[must_use]
    pub fn snapshot(&self, id: SnapshotId) -> Option<&Snapshot> {
        self.snapshots
            .binary_search_by_key(&id, |s| s.snapshot_id)
            .ok()
            .map(|i| &self.snapshots[i])
    }

    /// Returns the current snapshot.
    ///
    /// # Errors
    ///
    /// Returns `TableError::Serialization` if the document is inconsistent.
    pub fn current_snapshot(&self) -> Result<&Snapshot> {
        self.snapshot(self.current_snapshot_id).ok_or_else(|| {
            TableError::serialization(format!(
                "metadata for {} designates missing snapshot {}",
                self.ident, self.current_snapshot_id
            ))
        })
    }

    /// Returns the next snapshot id to assign.
    #[must_use]
    pub fn next_snapshot_id(&self) -> SnapshotId {
        self.snapshots
            .last()
            .map_or(SnapshotId::ROOT, |s| s.snapshot_id.next())
    }

    /// Walks the parent chain from `id` back to the root, inclusive.
    ///
    /// # Errors
    ///
    /// Returns `TableError::NotFound` if `id` is unknown, and
    /// `TableError::Serialization` if the chain references a missing parent
    /// or fails to terminate.
    pub fn ancestors(&self, id: SnapshotId) -> Result<Vec<&Snapshot>> {
        let mut chain = Vec::new();
        let mut cursor = Some(
            self.snapshot(id)
                .ok_or_else(|| TableError::not_found(format!("snapshot {id} of {}", self.ident)))?,
        );
        while let Some(snapshot) = cursor {
            if chain.len() > self.snapshots.len() {
                return Err(TableError::serialization(format!(
                    "snapshot chain of {} does not terminate",
                    self.ident
                )));
            }
            chain.push(snapshot);
            cursor = match snapshot.parent_snapshot_id {
                Some(parent) => Some(self.snapshot(parent).ok_or_else(|| {
                    TableError::serialization(format!(
                        "snapshot {} of {} references missing parent {parent}",
                        snapshot.snapshot_id, self.ident
                    ))
                })?),
                None => None,
            };
        }
        Ok(chain)
    }

    /// Returns new metadata with `snapshot` appended and made current.
    #[must_use]
    pub fn with_snapshot(&self, snapshot: Snapshot, previous_location: &str) -> Self {
        let mut next = self.clone();
        next.metadata_log.push(MetadataLogEntry {
            timestamp: snapshot.committed_at,
            metadata_file: previous_location.to_string(),
        });
        next.last_sequence_number = snapshot.sequence_number;
        next.last_updated_at = snapshot.committed_at;
        next.current_snapshot_id = snapshot.snapshot_id;
        next.snapshots.push(snapshot);
        next
    }

    /// Checks structural invariants: ids ascend, every parent precedes its
    /// child, exactly one root exists, and the current snapshot is present.
    ///
    /// # Errors
    ///
    /// Returns `TableError::Serialization` describing the first violation.
    pub fn validate(&self) -> Result<()> {
        let mut roots = 0;
        for (i, snapshot) in self.snapshots.iter().enumerate() {
            if i > 0 && self.snapshots[i - 1].snapshot_id >= snapshot.snapshot_id {
                return Err(TableError::serialization(format!(
                    "snapshot ids of {} are not ascending",
                    self.ident
                )));
            }
            match snapshot.parent_snapshot_id {
                None => roots += 1,
                Some(parent) if parent < snapshot.snapshot_id && self.snapshot(parent).is_some() => {}
                Some(parent) => {
                    return Err(TableError::serialization(format!(
                        "snapshot {} of {} has invalid parent {parent}",
                        snapshot.snapshot_id, self.ident
                    )));
                }
            }
        }
        if roots != 1 {
            return Err(TableError::serialization(format!(
                "{} has {roots} root snapshots",
                self.ident
            )));
        }
        self.current_snapshot().map(|_| ())
    }
}

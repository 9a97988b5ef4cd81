//! Data files and their manifest entries.
//!
//! A data file is an immutable JSON row container. Its entry records the
//! location, partition value, row count, byte size, a SHA-256 fingerprint of
//! the bytes and per-column stats. Entries are produced by
//! [`DataFileWriter`] before a commit and referenced by manifests after it.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;

use strata_core::{FileId, StorageBackend};

use crate::document::{self, Document, DocumentKind};
use crate::error::{Result, TableError};
use crate::metadata::TableMetadata;
use crate::partition::{PartitionSpec, PartitionValue};
use crate::paths;
use crate::schema::Schema;
use crate::snapshot::SnapshotId;
use crate::stats::{ColumnStats, compute_stats};
use crate::value::Row;

/// Status of an entry within a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    /// Added by the manifest's snapshot.
    Added,
    /// Carried over from an earlier snapshot.
    Existing,
    /// Removed by the manifest's snapshot (tombstone).
    Deleted,
}

/// A data file as recorded in a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFileEntry {
    /// Object location of the file.
    pub path: String,
    /// Status within the containing manifest.
    pub status: FileStatus,
    /// Partition value shared by every row in the file.
    pub partition: PartitionValue,
    /// Number of rows.
    pub record_count: u64,
    /// Size of the stored object in bytes.
    pub file_size_bytes: u64,
    /// Hex SHA-256 of the stored bytes.
    pub content_sha256: String,
    /// Stats keyed by column name.
    pub column_stats: BTreeMap<String, ColumnStats>,
    /// Snapshot that added the file; stamped at commit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<SnapshotId>,
}

impl DataFileEntry {
    /// Returns true for `added` and `existing` entries.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.status != FileStatus::Deleted
    }

    /// Returns a copy with a different status.
    #[must_use]
    pub fn with_status(&self, status: FileStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }
}

/// Contents of a data file object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFile {
    /// Schema the rows conform to.
    pub schema: Schema,
    /// Partition value of every row.
    pub partition: PartitionValue,
    /// Rows in write order.
    pub rows: Vec<Row>,
}

impl Document for DataFile {
    const KIND: DocumentKind = DocumentKind::DataFile;
}

/// Writes rows into partitioned data files for one table.
///
/// The writer only makes files durable; nothing is visible to readers until
/// the returned entries are committed.
#[derive(Clone)]
pub struct DataFileWriter {
    storage: Arc<dyn StorageBackend>,
    location: String,
    schema: Schema,
    spec: PartitionSpec,
}

impl std::fmt::Debug for DataFileWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataFileWriter")
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

impl DataFileWriter {
    /// Creates a writer for the table described by `metadata`.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>, metadata: &TableMetadata) -> Self {
        Self {
            storage,
            location: metadata.location.clone(),
            schema: metadata.schema.clone(),
            spec: metadata.partition_spec.clone(),
        }
    }

    /// Validates rows, splits them by partition and writes one file per
    /// partition. Returns the entries in partition path order.
    ///
    /// # Errors
    ///
    /// Returns `TableError::SchemaMismatch` if a row does not conform, or a
    /// storage error if a write fails.
    pub async fn write(&self, rows: Vec<Row>) -> Result<Vec<DataFileEntry>> {
        let mut groups: BTreeMap<String, (PartitionValue, Vec<Row>)> = BTreeMap::new();
        for row in rows {
            self.schema.validate_row(&row)?;
            let partition = self.spec.partition_of(&self.schema, &row)?;
            let dir = self.spec.path_of(&partition);
            groups
                .entry(dir)
                .or_insert_with(|| (partition, Vec::new()))
                .1
                .push(row);
        }

        let mut entries = Vec::with_capacity(groups.len());
        for (dir, (partition, rows)) in groups {
            entries.push(self.write_file(&dir, partition, rows).await?);
        }
        Ok(entries)
    }

    async fn write_file(
        &self,
        dir: &str,
        partition: PartitionValue,
        rows: Vec<Row>,
    ) -> Result<DataFileEntry> {
        let stats = compute_stats(&self.schema, &rows)?;
        let file = DataFile {
            schema: self.schema.clone(),
            partition,
            rows,
        };
        let bytes = document::encode(&file)?;
        let path = paths::data_file(&self.location, dir, &FileId::generate());
        let entry = DataFileEntry {
            path: path.clone(),
            status: FileStatus::Added,
            partition: file.partition,
            record_count: stats.row_count,
            file_size_bytes: bytes.len() as u64,
            content_sha256: fingerprint(&bytes),
            column_stats: stats.columns,
            snapshot_id: None,
        };
        document::put_once(self.storage.as_ref(), &path, bytes).await?;
        tracing::debug!(path = %entry.path, rows = entry.record_count, "wrote data file");
        Ok(entry)
    }
}

/// Reads the rows of a data file, verifying size and fingerprint.
///
/// # Errors
///
/// Returns `TableError::NotFound` if the object is missing and
/// `TableError::Serialization` if its bytes do not match the entry.
pub async fn read_rows(storage: &dyn StorageBackend, entry: &DataFileEntry) -> Result<Vec<Row>> {
    let bytes = storage.get(&entry.path).await.map_err(|e| {
        if e.is_not_found() {
            TableError::not_found(format!("data file {}", entry.path))
        } else {
            e.into()
        }
    })?;
    if bytes.len() as u64 != entry.file_size_bytes || fingerprint(&bytes) != entry.content_sha256 {
        return Err(TableError::serialization(format!(
            "data file {} does not match its manifest entry",
            entry.path
        )));
    }
    Ok(document::decode::<DataFile>(&bytes)?.rows)
}

fn fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

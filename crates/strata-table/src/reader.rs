//! Snapshot-pinned table readers.
//!
//! A reader binds to one immutable metadata document and one snapshot for its
//! whole lifetime. Since nothing a snapshot references is ever rewritten,
//! every read through the same reader returns the same rows no matter what
//! commits happen concurrently.

use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;

use strata_core::StorageBackend;

use crate::data_file::{DataFileEntry, read_rows};
use crate::error::Result;
use crate::expr::Predicate;
use crate::ident::TableIdent;
use crate::metadata::TableMetadata;
use crate::scan::{self, ScanPlan};
use crate::schema::Schema;
use crate::snapshot::Snapshot;
use crate::source::{RowBatch, RowSource};
use crate::value::Row;

/// A read handle pinned to one snapshot.
#[derive(Clone)]
pub struct TableReader {
    storage: Arc<dyn StorageBackend>,
    metadata: Arc<TableMetadata>,
    metadata_location: String,
    snapshot: Snapshot,
}

impl std::fmt::Debug for TableReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableReader")
            .field("table", &self.metadata.ident)
            .field("snapshot_id", &self.snapshot.snapshot_id)
            .finish_non_exhaustive()
    }
}

impl TableReader {
    pub(crate) fn new(
        storage: Arc<dyn StorageBackend>,
        metadata: Arc<TableMetadata>,
        metadata_location: String,
        snapshot: Snapshot,
    ) -> Self {
        Self {
            storage,
            metadata,
            metadata_location,
            snapshot,
        }
    }

    /// Table identity.
    #[must_use]
    pub fn ident(&self) -> &TableIdent {
        &self.metadata.ident
    }

    /// The pinned snapshot.
    #[must_use]
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// The metadata the reader was opened from.
    #[must_use]
    pub fn metadata(&self) -> &TableMetadata {
        &self.metadata
    }

    /// Location of that metadata document.
    #[must_use]
    pub fn metadata_location(&self) -> &str {
        &self.metadata_location
    }

    /// Table schema.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.metadata.schema
    }

    /// Parent chain from the pinned snapshot back to the root.
    ///
    /// # Errors
    ///
    /// Returns `TableError::Serialization` if the snapshot log is corrupt.
    pub fn ancestry(&self) -> Result<Vec<Snapshot>> {
        Ok(self
            .metadata
            .ancestors(self.snapshot.snapshot_id)?
            .into_iter()
            .cloned()
            .collect())
    }

    /// Every live data file of the pinned snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if a manifest cannot be read.
    pub async fn live_files(&self) -> Result<Vec<DataFileEntry>> {
        scan::live_files(self.storage.as_ref(), &self.metadata, &self.snapshot).await
    }

    /// Plans which files a scan for `predicate` must read.
    ///
    /// # Errors
    ///
    /// Returns `TableError::InvalidInput` for unknown columns, or an error if
    /// a manifest cannot be read.
    pub async fn plan_scan(&self, predicate: &Predicate) -> Result<ScanPlan> {
        scan::plan_scan(
            self.storage.as_ref(),
            &self.metadata,
            &self.snapshot,
            predicate,
        )
        .await
    }

    /// Returns the rows matching `predicate`: planned files, then a residual
    /// row filter.
    ///
    /// # Errors
    ///
    /// Returns an error if planning fails or a data file cannot be read.
    pub async fn scan(&self, predicate: &Predicate) -> Result<Vec<Row>> {
        let plan = self.plan_scan(predicate).await?;
        let filter = predicate.clone().rewrite_not();
        let mut rows = Vec::new();
        for entry in &plan.files {
            let file_rows = read_rows(self.storage.as_ref(), entry).await?;
            rows.extend(
                file_rows
                    .into_iter()
                    .filter(|row| filter.matches(self.schema(), row)),
            );
        }
        Ok(rows)
    }

    /// Returns every row of the pinned snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if a data file cannot be read.
    pub async fn read_all(&self) -> Result<Vec<Row>> {
        self.scan(&Predicate::AlwaysTrue).await
    }
}

impl RowSource for TableReader {
    fn schema(&self) -> &Schema {
        &self.metadata.schema
    }

    /// One batch per live data file.
    fn batches(&self) -> BoxStream<'_, Result<RowBatch>> {
        stream::once(self.live_files())
            .flat_map(move |files| match files {
                Ok(files) => stream::iter(files)
                    .then(move |entry| async move {
                        read_rows(self.storage.as_ref(), &entry).await
                    })
                    .boxed(),
                Err(e) => stream::once(async move { Err(e) }).boxed(),
            })
            .boxed()
    }
}

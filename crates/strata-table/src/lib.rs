//! # strata-table
//!
//! Versioned, snapshot-based tables over an object store.
//!
//! ## Layout
//!
//! Every table is a tree of immutable objects under one location, reached
//! through a single mutable catalog pointer:
//!
//! ```text
//! _catalog/tables/{ns}/{name}.pointer.json          (CAS-updated)
//!   └─ {table}/metadata/{seq}-{uuid}.metadata.json
//!        └─ {table}/metadata/snap-{id}-{uuid}.manifest-list.json
//!             └─ {table}/metadata/{commit}-m{n}.manifest.json
//!                  └─ {table}/data/{partition}/{file}.rows.json
//! ```
//!
//! Everything except the pointer is written exactly once. A commit writes a
//! new manifest, manifest list and metadata document, then swaps the
//! pointer; the loser of a concurrent swap gets [`TableError::Conflict`] and
//! rebases. Readers pin one snapshot and never observe later commits.
//!
//! ## Scans
//!
//! [`TableReader::plan_scan`] prunes manifests by partition summaries and
//! files by column stats, then [`TableReader::scan`] applies the predicate to
//! the remaining rows.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use strata_core::MemoryBackend;
//! use strata_table::prelude::*;
//!
//! # tokio_test::block_on(async {
//! let store = TableStore::new(Arc::new(MemoryBackend::new()), TableStoreConfig::default());
//! let ident = TableIdent::new("raw", "trips")?;
//! let schema = Schema::new(vec![Field::required("distance", DataType::Long)])?;
//! let metadata = store
//!     .create_table(&ident, schema, PartitionSpec::unpartitioned())
//!     .await?;
//!
//! let files = store.writer(&metadata).write(vec![vec![Value::Long(3)]]).await?;
//! let snapshot = store
//!     .commit(&ident, metadata.current_snapshot_id, Operation::Append { files })
//!     .await?;
//!
//! let reader = store.open(&ident, SnapshotSelector::Id(snapshot.snapshot_id)).await?;
//! assert_eq!(reader.scan(&col("distance").gt(1)).await?.len(), 1);
//! # Ok::<(), TableError>(())
//! # }).unwrap();
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod catalog;
pub mod data_file;
pub mod document;
pub mod error;
pub mod expr;
pub mod ident;
pub mod manifest;
pub mod metadata;
pub mod metrics;
pub mod operation;
pub mod partition;
pub mod paths;
pub mod reader;
pub mod scan;
pub mod schema;
pub mod snapshot;
pub mod source;
pub mod stats;
pub mod store;
pub mod value;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::data_file::{DataFileEntry, FileStatus};
    pub use crate::error::{Result, TableError};
    pub use crate::expr::{CompareOp, Predicate, col};
    pub use crate::ident::TableIdent;
    pub use crate::operation::{Operation, RemoveSpec};
    pub use crate::partition::{PartitionField, PartitionSpec, PartitionValue, Transform};
    pub use crate::reader::TableReader;
    pub use crate::schema::{DataType, Field, Schema};
    pub use crate::snapshot::{OperationKind, Snapshot, SnapshotId};
    pub use crate::source::{MemoryRowSource, RowBatch, RowSource};
    pub use crate::store::{SnapshotSelector, TableStore, TableStoreConfig};
    pub use crate::value::{Row, Value};
}

pub use catalog::{CasOutcome, Catalog, CatalogPointer, ObjectCatalog};
pub use data_file::{DataFileEntry, DataFileWriter, FileStatus, read_rows};
pub use error::{Result, TableError};
pub use expr::{CompareOp, Predicate, col};
pub use ident::TableIdent;
pub use manifest::{Manifest, ManifestFile, ManifestList};
pub use metadata::TableMetadata;
pub use metrics::TableMetrics;
pub use operation::{Operation, RemoveSpec};
pub use partition::{PartitionField, PartitionSpec, PartitionValue, Transform};
pub use reader::TableReader;
pub use scan::ScanPlan;
pub use schema::{DataType, Field, Schema};
pub use snapshot::{OperationKind, Snapshot, SnapshotId, SnapshotSummary};
pub use source::{MemoryRowSource, RowBatch, RowSource, collect_rows};
pub use stats::ColumnStats;
pub use store::{LoadedTable, SnapshotSelector, TableStore, TableStoreConfig, TableSummary};
pub use value::{Row, Value};

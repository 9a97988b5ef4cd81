//! The versioned table store.
//!
//! `TableStore` owns the commit protocol:
//!
//! 1. Re-read the catalog pointer. If it no longer designates the caller's
//!    base snapshot, report `Conflict` before writing anything.
//! 2. Resolve removals against the base snapshot and validate new entries.
//! 3. Write one manifest holding the new entries and removal tombstones.
//! 4. Write a manifest list: the base list plus that manifest.
//! 5. Write new metadata with the snapshot appended and made current.
//! 6. Compare-and-swap the catalog pointer from the base metadata location to
//!    the new one.
//!
//! Every object is written once. If the swap loses, the objects written by
//! the losing attempt are unreferenced and the caller receives `Conflict`
//! carrying the current snapshot id. The store never retries on its own.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use strata_core::{StorageBackend, StrataConfig};

use crate::catalog::{CasOutcome, Catalog, CatalogPointer, ObjectCatalog};
use crate::data_file::{DataFileEntry, DataFileWriter, FileStatus};
use crate::document::{read_document, write_document};
use crate::error::{Result, TableError};
use crate::ident::TableIdent;
use crate::manifest::{Manifest, ManifestFile, ManifestList};
use crate::metadata::TableMetadata;
use crate::metrics::TableMetrics;
use crate::operation::{Operation, RemoveSpec};
use crate::partition::PartitionSpec;
use crate::paths;
use crate::reader::TableReader;
use crate::scan::snapshot_files;
use crate::schema::Schema;
use crate::snapshot::{OperationKind, Snapshot, SnapshotId, SnapshotSummary};

/// Table store settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStoreConfig {
    /// Prefix under which table directories live.
    pub warehouse: String,
    /// Prefix under which catalog pointers live.
    pub catalog_prefix: String,
}

impl Default for TableStoreConfig {
    fn default() -> Self {
        Self::from(&StrataConfig::default())
    }
}

impl From<&StrataConfig> for TableStoreConfig {
    fn from(config: &StrataConfig) -> Self {
        Self {
            warehouse: config.warehouse.clone(),
            catalog_prefix: config.catalog_prefix.clone(),
        }
    }
}

/// Which snapshot a reader binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSelector {
    /// The snapshot the catalog currently designates.
    Latest,
    /// A specific snapshot (time travel).
    Id(SnapshotId),
}

/// A table as currently registered in the catalog.
#[derive(Debug, Clone)]
pub struct LoadedTable {
    /// Current metadata.
    pub metadata: Arc<TableMetadata>,
    /// Location of that metadata.
    pub metadata_location: String,
}

impl LoadedTable {
    /// The current snapshot id.
    #[must_use]
    pub fn current_snapshot_id(&self) -> SnapshotId {
        self.metadata.current_snapshot_id
    }
}

/// Snapshot count and live totals of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSummary {
    /// Table identity.
    pub ident: TableIdent,
    /// Current snapshot.
    pub current_snapshot_id: SnapshotId,
    /// Snapshots in the table's history, root included.
    pub snapshot_count: usize,
    /// Live data files at the current snapshot.
    pub live_files: u64,
    /// Live rows at the current snapshot.
    pub live_rows: u64,
}

/// Versioned table store over a blob store and a catalog.
#[derive(Clone)]
pub struct TableStore {
    storage: Arc<dyn StorageBackend>,
    catalog: Arc<dyn Catalog>,
    config: TableStoreConfig,
    metrics: TableMetrics,
}

impl std::fmt::Debug for TableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TableStore {
    /// Creates a store whose catalog lives in the same blob store.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>, config: TableStoreConfig) -> Self {
        let catalog = Arc::new(ObjectCatalog::new(
            Arc::clone(&storage),
            config.catalog_prefix.clone(),
        ));
        Self::with_catalog(storage, catalog, config)
    }

    /// Creates a store with an external catalog.
    #[must_use]
    pub fn with_catalog(
        storage: Arc<dyn StorageBackend>,
        catalog: Arc<dyn Catalog>,
        config: TableStoreConfig,
    ) -> Self {
        Self {
            storage,
            catalog,
            config,
            metrics: TableMetrics::new(),
        }
    }

    /// The blob store.
    #[must_use]
    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    /// The catalog.
    #[must_use]
    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    /// Store settings.
    #[must_use]
    pub fn config(&self) -> &TableStoreConfig {
        &self.config
    }

    /// Creates a writer for data files of the given table.
    #[must_use]
    pub fn writer(&self, metadata: &TableMetadata) -> DataFileWriter {
        DataFileWriter::new(Arc::clone(&self.storage), metadata)
    }

    /// Creates a table with a root snapshot and an empty manifest list.
    ///
    /// # Errors
    ///
    /// Returns `TableError::AlreadyExists` if the identity is registered, or
    /// `TableError::InvalidInput` if the partition spec does not fit the
    /// schema.
    #[tracing::instrument(skip(self, schema, spec), fields(table = %ident))]
    pub async fn create_table(
        &self,
        ident: &TableIdent,
        schema: Schema,
        spec: PartitionSpec,
    ) -> Result<TableMetadata> {
        spec.validate(&schema)?;
        let location = paths::table_location(&self.config.warehouse, ident);

        let list_path = paths::manifest_list(&location, SnapshotId::ROOT);
        let list = ManifestList {
            snapshot_id: SnapshotId::ROOT,
            parent_snapshot_id: None,
            manifests: Vec::new(),
        };
        write_document(self.storage.as_ref(), &list_path, &list).await?;

        let root = Snapshot {
            snapshot_id: SnapshotId::ROOT,
            parent_snapshot_id: None,
            sequence_number: 0,
            committed_at: Utc::now(),
            operation: OperationKind::Append,
            manifest_list: list_path,
            summary: SnapshotSummary::default(),
        };
        let metadata = TableMetadata::new_table(ident.clone(), location, schema, spec, root);
        let metadata_path = paths::metadata_file(&metadata.location, 0);
        write_document(self.storage.as_ref(), &metadata_path, &metadata).await?;

        let pointer = CatalogPointer::new(
            metadata.table_uuid,
            metadata_path.clone(),
            SnapshotId::ROOT,
            None,
        );
        self.catalog.create(ident, &pointer).await?;

        tracing::info!(metadata = %metadata_path, "created table");
        Ok(metadata)
    }

    /// Creates a table unless one with a matching schema and spec exists.
    ///
    /// # Errors
    ///
    /// Returns `TableError::SchemaMismatch` if the existing table has a
    /// different schema or partition spec.
    pub async fn create_table_if_not_exists(
        &self,
        ident: &TableIdent,
        schema: Schema,
        spec: PartitionSpec,
    ) -> Result<Arc<TableMetadata>> {
        match self.load_table(ident).await {
            Ok(existing) => return ensure_compatible(existing.metadata, &schema, &spec),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        match self.create_table(ident, schema.clone(), spec.clone()).await {
            Ok(metadata) => Ok(Arc::new(metadata)),
            Err(TableError::AlreadyExists { .. }) => {
                let existing = self.load_table(ident).await?;
                ensure_compatible(existing.metadata, &schema, &spec)
            }
            Err(e) => Err(e),
        }
    }

    /// Removes a table from the catalog. Its objects are left in place.
    ///
    /// # Errors
    ///
    /// Returns `TableError::NotFound` if the table is not registered.
    #[tracing::instrument(skip(self), fields(table = %ident))]
    pub async fn drop_table(&self, ident: &TableIdent) -> Result<()> {
        self.catalog.deregister(ident).await?;
        tracing::info!("dropped table");
        Ok(())
    }

    /// Lists registered tables, optionally within one namespace.
    ///
    /// # Errors
    ///
    /// Returns a storage error if listing fails.
    pub async fn list_tables(&self, namespace: Option<&str>) -> Result<Vec<TableIdent>> {
        self.catalog.list(namespace).await
    }

    /// Loads a table's current metadata. Always re-reads the catalog.
    ///
    /// # Errors
    ///
    /// Returns `TableError::NotFound` if the table is not registered.
    pub async fn load_table(&self, ident: &TableIdent) -> Result<LoadedTable> {
        let pointer = self.catalog.get_pointer(ident).await?;
        let metadata: TableMetadata =
            read_document(self.storage.as_ref(), &pointer.metadata_location).await?;
        if metadata.table_uuid != pointer.table_uuid {
            return Err(TableError::serialization(format!(
                "metadata {} belongs to table {}, pointer expects {}",
                pointer.metadata_location, metadata.table_uuid, pointer.table_uuid
            )));
        }
        Ok(LoadedTable {
            metadata: Arc::new(metadata),
            metadata_location: pointer.metadata_location,
        })
    }

    /// Opens a reader pinned to one snapshot.
    ///
    /// # Errors
    ///
    /// Returns `TableError::NotFound` if the table or snapshot is absent.
    pub async fn open(&self, ident: &TableIdent, selector: SnapshotSelector) -> Result<TableReader> {
        let table = self.load_table(ident).await?;
        let snapshot = match selector {
            SnapshotSelector::Latest => table.metadata.current_snapshot()?.clone(),
            SnapshotSelector::Id(id) => table
                .metadata
                .snapshot(id)
                .cloned()
                .ok_or_else(|| TableError::not_found(format!("snapshot {id} of {ident}")))?,
        };
        Ok(TableReader::new(
            Arc::clone(&self.storage),
            table.metadata,
            table.metadata_location,
            snapshot,
        ))
    }

    /// Returns the table's full snapshot lineage in id order.
    ///
    /// # Errors
    ///
    /// Returns `TableError::NotFound` if the table is not registered.
    pub async fn list_snapshots(&self, ident: &TableIdent) -> Result<Vec<Snapshot>> {
        Ok(self.load_table(ident).await?.metadata.snapshots.clone())
    }

    /// Returns snapshot count and live totals.
    ///
    /// # Errors
    ///
    /// Returns `TableError::NotFound` if the table is not registered.
    pub async fn table_summary(&self, ident: &TableIdent) -> Result<TableSummary> {
        let table = self.load_table(ident).await?;
        let current = table.metadata.current_snapshot()?;
        Ok(TableSummary {
            ident: ident.clone(),
            current_snapshot_id: current.snapshot_id,
            snapshot_count: table.metadata.snapshots.len(),
            live_files: current.summary.total_files,
            live_rows: current.summary.total_rows,
        })
    }

    /// Commits `operation` on top of `base_snapshot_id`.
    ///
    /// # Errors
    ///
    /// - `TableError::Conflict` if the table has moved past the base
    /// - `TableError::SchemaMismatch` if new entries do not fit the table
    /// - `TableError::NotFound` if a removed file is not live in the base
    /// - `TableError::InvalidInput` for an empty append or duplicate paths
    #[tracing::instrument(
        skip(self, operation),
        fields(table = %ident, base = %base_snapshot_id, operation = %operation.kind())
    )]
    pub async fn commit(
        &self,
        ident: &TableIdent,
        base_snapshot_id: SnapshotId,
        operation: Operation,
    ) -> Result<Snapshot> {
        let kind = operation.kind();
        let result = self.commit_inner(ident, base_snapshot_id, operation).await;
        self.record_commit(kind, &result);
        result
    }

    async fn commit_inner(
        &self,
        ident: &TableIdent,
        base_snapshot_id: SnapshotId,
        operation: Operation,
    ) -> Result<Snapshot> {
        let table = self.load_base(ident, base_snapshot_id).await?;
        let metadata = &table.metadata;
        let base = metadata.current_snapshot()?;
        let files = snapshot_files(self.storage.as_ref(), base).await?;

        if let Operation::Append { files: added } = &operation {
            if added.is_empty() {
                return Err(TableError::invalid_input("append must add at least one file"));
            }
        }
        validate_added(metadata, operation.added_files(), &files.referenced)?;
        let removed = match operation.removal() {
            Some(remove) => resolve_removal(metadata, remove, &files.live)?,
            None => Vec::new(),
        };

        let snapshot_id = metadata.next_snapshot_id();
        let mut entries: Vec<DataFileEntry> = operation
            .added_files()
            .iter()
            .map(|f| DataFileEntry {
                status: FileStatus::Added,
                snapshot_id: Some(snapshot_id),
                ..f.clone()
            })
            .collect();
        entries.extend(removed.iter().map(|f| f.with_status(FileStatus::Deleted)));

        let summary = SnapshotSummary::derive(
            Some(&base.summary),
            operation.added_files().len() as u64,
            operation.added_files().iter().map(|f| f.record_count).sum(),
            removed.len() as u64,
            removed.iter().map(|f| f.record_count).sum(),
        );

        let mut manifests = files.list.manifests;
        if !entries.is_empty() {
            manifests.push(self.write_manifest(metadata, snapshot_id, entries).await?);
        }
        self.publish(ident, &table, operation.kind(), snapshot_id, manifests, summary)
            .await
    }

    /// Folds every manifest of the base snapshot into one manifest holding
    /// only live entries, committed as a `replace` snapshot. Live data is
    /// unchanged.
    ///
    /// # Errors
    ///
    /// Returns `TableError::Conflict` if the table has moved past the base.
    #[tracing::instrument(skip(self), fields(table = %ident, base = %base_snapshot_id))]
    pub async fn compact_manifests(
        &self,
        ident: &TableIdent,
        base_snapshot_id: SnapshotId,
    ) -> Result<Snapshot> {
        let result = self.compact_inner(ident, base_snapshot_id).await;
        self.record_commit(OperationKind::Replace, &result);
        result
    }

    async fn compact_inner(&self, ident: &TableIdent, base_snapshot_id: SnapshotId) -> Result<Snapshot> {
        let table = self.load_base(ident, base_snapshot_id).await?;
        let metadata = &table.metadata;
        let base = metadata.current_snapshot()?;
        let files = snapshot_files(self.storage.as_ref(), base).await?;
        let snapshot_id = metadata.next_snapshot_id();

        let entries: Vec<DataFileEntry> = files
            .live
            .iter()
            .map(|f| f.with_status(FileStatus::Existing))
            .collect();
        let mut manifests = Vec::new();
        if !entries.is_empty() {
            manifests.push(self.write_manifest(metadata, snapshot_id, entries).await?);
        }
        let summary = SnapshotSummary::derive(Some(&base.summary), 0, 0, 0, 0);
        tracing::debug!(
            before = files.list.manifests.len(),
            after = manifests.len(),
            "compacting manifests"
        );
        self.publish(ident, &table, OperationKind::Replace, snapshot_id, manifests, summary)
            .await
    }

    /// Loads the table and checks the caller's base is still current.
    async fn load_base(&self, ident: &TableIdent, base_snapshot_id: SnapshotId) -> Result<LoadedTable> {
        let table = self.load_table(ident).await?;
        let current = table.current_snapshot_id();
        if current != base_snapshot_id {
            return Err(TableError::Conflict {
                table: ident.clone(),
                base_snapshot_id,
                current_snapshot_id: current,
            });
        }
        Ok(table)
    }

    async fn write_manifest(
        &self,
        metadata: &TableMetadata,
        snapshot_id: SnapshotId,
        entries: Vec<DataFileEntry>,
    ) -> Result<ManifestFile> {
        let path = paths::manifest(&metadata.location, &Uuid::new_v4(), 0);
        let manifest_file = ManifestFile::summarize(
            path.clone(),
            snapshot_id,
            metadata.partition_spec.fields().len(),
            &entries,
        );
        let manifest = Manifest {
            snapshot_id,
            entries,
        };
        write_document(self.storage.as_ref(), &path, &manifest).await?;
        Ok(manifest_file)
    }

    /// Writes the manifest list and metadata, then swaps the pointer.
    async fn publish(
        &self,
        ident: &TableIdent,
        table: &LoadedTable,
        operation: OperationKind,
        snapshot_id: SnapshotId,
        manifests: Vec<ManifestFile>,
        summary: SnapshotSummary,
    ) -> Result<Snapshot> {
        let metadata = &table.metadata;
        let base_snapshot_id = metadata.current_snapshot_id;
        let sequence_number = metadata.last_sequence_number + 1;

        let list_path = paths::manifest_list(&metadata.location, snapshot_id);
        let list = ManifestList {
            snapshot_id,
            parent_snapshot_id: Some(base_snapshot_id),
            manifests,
        };
        write_document(self.storage.as_ref(), &list_path, &list).await?;

        let snapshot = Snapshot {
            snapshot_id,
            parent_snapshot_id: Some(base_snapshot_id),
            sequence_number,
            committed_at: Utc::now(),
            operation,
            manifest_list: list_path,
            summary,
        };
        let next = metadata.with_snapshot(snapshot.clone(), &table.metadata_location);
        let metadata_path = paths::metadata_file(&metadata.location, sequence_number);
        write_document(self.storage.as_ref(), &metadata_path, &next).await?;

        let pointer = CatalogPointer::new(
            metadata.table_uuid,
            metadata_path,
            snapshot_id,
            Some(table.metadata_location.clone()),
        );
        match self
            .catalog
            .compare_and_swap(ident, &table.metadata_location, &pointer)
            .await?
        {
            CasOutcome::Swapped => {
                tracing::info!(
                    snapshot_id = %snapshot_id,
                    added_files = summary.added_files,
                    removed_files = summary.removed_files,
                    total_rows = summary.total_rows,
                    "committed snapshot"
                );
                Ok(snapshot)
            }
            CasOutcome::Conflict {
                current: Some(current),
            } => Err(TableError::Conflict {
                table: ident.clone(),
                base_snapshot_id,
                current_snapshot_id: current.current_snapshot_id,
            }),
            CasOutcome::Conflict { current: None } => {
                Err(TableError::not_found(format!("table {ident}")))
            }
        }
    }

    fn record_commit(&self, kind: OperationKind, result: &Result<Snapshot>) {
        let outcome = match result {
            Ok(_) => "committed",
            Err(e) if e.is_conflict() => {
                tracing::warn!(error = %e, "commit conflict");
                "conflict"
            }
            Err(_) => "error",
        };
        self.metrics.record_commit(kind.as_str(), outcome);
    }
}

fn ensure_compatible(
    metadata: Arc<TableMetadata>,
    schema: &Schema,
    spec: &PartitionSpec,
) -> Result<Arc<TableMetadata>> {
    if metadata.schema != *schema || metadata.partition_spec != *spec {
        return Err(TableError::schema_mismatch(format!(
            "table {} exists with a different schema or partition spec",
            metadata.ident
        )));
    }
    Ok(metadata)
}

/// Checks new entries against the table's schema, spec and existing paths.
fn validate_added(
    metadata: &TableMetadata,
    added: &[DataFileEntry],
    referenced: &HashSet<String>,
) -> Result<()> {
    let schema = &metadata.schema;
    let spec = &metadata.partition_spec;
    let data_prefix = format!("{}/data/", metadata.location);
    let mut seen = HashSet::new();

    for entry in added {
        if !entry.path.starts_with(&data_prefix) {
            return Err(TableError::invalid_input(format!(
                "data file {} is outside {data_prefix}",
                entry.path
            )));
        }
        if referenced.contains(&entry.path) || !seen.insert(entry.path.as_str()) {
            return Err(TableError::invalid_input(format!(
                "data file {} is already part of the table",
                entry.path
            )));
        }
        if entry.status != FileStatus::Added {
            return Err(TableError::invalid_input(format!(
                "data file {} must have status added",
                entry.path
            )));
        }

        if entry.partition.len() != spec.fields().len() {
            return Err(TableError::schema_mismatch(format!(
                "data file {} has {} partition values, spec has {} fields",
                entry.path,
                entry.partition.len(),
                spec.fields().len()
            )));
        }
        for (field, value) in spec.fields().iter().zip(entry.partition.values()) {
            let Some(source) = schema.field(&field.source_column) else {
                continue;
            };
            let expected = field.transform.result_type(source.data_type)?;
            if value.data_type().is_some_and(|t| t != expected) {
                return Err(TableError::schema_mismatch(format!(
                    "data file {}: partition field {} expects {expected}",
                    entry.path, field.name
                )));
            }
        }

        for (column, stats) in &entry.column_stats {
            let field = schema.field(column).ok_or_else(|| {
                TableError::schema_mismatch(format!(
                    "data file {} has stats for unknown column '{column}'",
                    entry.path
                ))
            })?;
            if !field.nullable && stats.null_count > 0 {
                return Err(TableError::schema_mismatch(format!(
                    "data file {} has nulls in non-nullable column '{column}'",
                    entry.path
                )));
            }
            let bound_types = [&stats.min, &stats.max]
                .into_iter()
                .flatten()
                .filter_map(crate::value::Value::data_type);
            for t in bound_types {
                if t != field.data_type {
                    return Err(TableError::schema_mismatch(format!(
                        "data file {}: column '{column}' is {}, stats are {t}",
                        entry.path, field.data_type
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Resolves a logical removal to concrete live entries.
fn resolve_removal(
    metadata: &TableMetadata,
    remove: &RemoveSpec,
    live: &[DataFileEntry],
) -> Result<Vec<DataFileEntry>> {
    match remove {
        RemoveSpec::All => Ok(live.to_vec()),
        RemoveSpec::Files(paths) => {
            let mut removed = Vec::with_capacity(paths.len());
            let mut seen = HashSet::new();
            for path in paths {
                if !seen.insert(path.as_str()) {
                    continue;
                }
                let entry = live.iter().find(|f| &f.path == path).ok_or_else(|| {
                    TableError::not_found(format!("data file {path} is not live in {}", metadata.ident))
                })?;
                removed.push(entry.clone());
            }
            Ok(removed)
        }
        RemoveSpec::Partitions(partitions) => {
            let arity = metadata.partition_spec.fields().len();
            if let Some(bad) = partitions.iter().find(|p| p.len() != arity) {
                return Err(TableError::schema_mismatch(format!(
                    "partition value has {} fields, spec has {arity}",
                    bad.len()
                )));
            }
            Ok(live
                .iter()
                .filter(|f| partitions.contains(&f.partition))
                .cloned()
                .collect())
        }
    }
}

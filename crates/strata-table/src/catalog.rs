//! Catalog: table identity to current metadata location.
//!
//! The catalog pointer is the only mutable state in the store. It is updated
//! with compare-and-swap on the metadata location, so any number of writer
//! processes can commit without external locking. Pointers are never cached:
//! every load and every commit re-reads them.
//!
//! # Storage Semantics
//!
//! - Create: `WritePrecondition::DoesNotExist`
//! - Swap: `WritePrecondition::MatchesVersion(version read with the pointer)`

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use strata_core::{StorageBackend, WritePrecondition, WriteResult};

use crate::error::{Result, TableError};
use crate::ident::TableIdent;
use crate::paths;
use crate::snapshot::SnapshotId;

/// Catalog record for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogPointer {
    /// Pointer schema version.
    pub version: u32,
    /// Table the pointer belongs to.
    pub table_uuid: Uuid,
    /// Location of the current metadata document.
    pub metadata_location: String,
    /// Current snapshot (denormalized for fast conflict checks).
    pub current_snapshot_id: SnapshotId,
    /// Metadata location this pointer replaced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_metadata_location: Option<String>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl CatalogPointer {
    /// Current pointer schema version.
    pub const CURRENT_VERSION: u32 = 1;

    /// Creates a pointer.
    #[must_use]
    pub fn new(
        table_uuid: Uuid,
        metadata_location: String,
        current_snapshot_id: SnapshotId,
        previous_metadata_location: Option<String>,
    ) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            table_uuid,
            metadata_location,
            current_snapshot_id,
            previous_metadata_location,
            updated_at: Utc::now(),
        }
    }
}

/// Outcome of a compare-and-swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// The pointer now references the new metadata.
    Swapped,
    /// The pointer did not reference the expected location.
    Conflict {
        /// The pointer as it stood when the swap was refused.
        current: Option<CatalogPointer>,
    },
}

/// A strongly consistent registry of table pointers.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Loads a table's pointer.
    ///
    /// Returns `TableError::NotFound` if the table is not registered.
    async fn get_pointer(&self, ident: &TableIdent) -> Result<CatalogPointer>;

    /// Replaces the pointer only if it still references `expected_location`.
    async fn compare_and_swap(
        &self,
        ident: &TableIdent,
        expected_location: &str,
        new: &CatalogPointer,
    ) -> Result<CasOutcome>;

    /// Registers a table.
    ///
    /// Returns `TableError::AlreadyExists` if the identity is taken.
    async fn create(&self, ident: &TableIdent, pointer: &CatalogPointer) -> Result<()>;

    /// Removes a table's registration. Objects are left in place.
    ///
    /// Returns `TableError::NotFound` if the table is not registered.
    async fn deregister(&self, ident: &TableIdent) -> Result<()>;

    /// Lists registered tables, optionally within one namespace, sorted.
    async fn list(&self, namespace: Option<&str>) -> Result<Vec<TableIdent>>;
}

/// Catalog stored as one pointer object per table in a blob store.
#[derive(Clone)]
pub struct ObjectCatalog {
    storage: Arc<dyn StorageBackend>,
    prefix: String,
}

impl std::fmt::Debug for ObjectCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectCatalog")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl ObjectCatalog {
    /// Creates a catalog rooted at `prefix`.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>, prefix: impl Into<String>) -> Self {
        Self {
            storage,
            prefix: prefix.into(),
        }
    }

    async fn load(&self, ident: &TableIdent) -> Result<Option<(CatalogPointer, String)>> {
        let path = paths::pointer(&self.prefix, ident);
        let Some(meta) = self.storage.head(&path).await? else {
            return Ok(None);
        };
        let bytes = match self.storage.get(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let pointer: CatalogPointer = serde_json::from_slice(&bytes)
            .map_err(|e| TableError::serialization(format!("parse pointer {path}: {e}")))?;
        if pointer.version > CatalogPointer::CURRENT_VERSION {
            return Err(TableError::serialization(format!(
                "unsupported pointer version {}, max supported is {}",
                pointer.version,
                CatalogPointer::CURRENT_VERSION
            )));
        }
        Ok(Some((pointer, meta.version)))
    }
}

#[async_trait]
impl Catalog for ObjectCatalog {
    async fn get_pointer(&self, ident: &TableIdent) -> Result<CatalogPointer> {
        self.load(ident)
            .await?
            .map(|(pointer, _)| pointer)
            .ok_or_else(|| TableError::not_found(format!("table {ident}")))
    }

    async fn compare_and_swap(
        &self,
        ident: &TableIdent,
        expected_location: &str,
        new: &CatalogPointer,
    ) -> Result<CasOutcome> {
        let Some((current, version)) = self.load(ident).await? else {
            return Err(TableError::not_found(format!("table {ident}")));
        };
        if current.metadata_location != expected_location {
            return Ok(CasOutcome::Conflict {
                current: Some(current),
            });
        }

        let path = paths::pointer(&self.prefix, ident);
        let bytes = Bytes::from(serde_json::to_vec(new)?);
        match self
            .storage
            .put(&path, bytes, WritePrecondition::MatchesVersion(version))
            .await?
        {
            WriteResult::Success { .. } => Ok(CasOutcome::Swapped),
            WriteResult::PreconditionFailed { .. } => {
                // Lost the race between read and write.
                let current = self.load(ident).await?.map(|(pointer, _)| pointer);
                Ok(CasOutcome::Conflict { current })
            }
        }
    }

    async fn create(&self, ident: &TableIdent, pointer: &CatalogPointer) -> Result<()> {
        let path = paths::pointer(&self.prefix, ident);
        let bytes = Bytes::from(serde_json::to_vec(pointer)?);
        match self
            .storage
            .put(&path, bytes, WritePrecondition::DoesNotExist)
            .await?
        {
            WriteResult::Success { .. } => Ok(()),
            WriteResult::PreconditionFailed { .. } => Err(TableError::AlreadyExists {
                table: ident.clone(),
            }),
        }
    }

    async fn deregister(&self, ident: &TableIdent) -> Result<()> {
        let path = paths::pointer(&self.prefix, ident);
        if self.storage.head(&path).await?.is_none() {
            return Err(TableError::not_found(format!("table {ident}")));
        }
        self.storage.delete(&path).await?;
        Ok(())
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<TableIdent>> {
        let prefix = paths::pointer_prefix(&self.prefix, namespace);
        let mut tables: Vec<TableIdent> = self
            .storage
            .list(&prefix)
            .await?
            .into_iter()
            .filter_map(|meta| paths::parse_pointer(&self.prefix, &meta.path))
            .collect();
        tables.sort();
        Ok(tables)
    }
}

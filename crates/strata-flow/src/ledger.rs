//! Materialization ledger.
//!
//! Records which snapshot each (asset, partition) unit produced and when.
//! The scheduler consults it to decide whether an upstream has ever been
//! materialized; a unit whose upstream has no record proceeds with a
//! `StaleUpstream` warning.
//!
//! # Storage layout
//!
//! The object-backed ledger writes one write-once record per
//! materialization:
//!
//! ```text
//! {flow}/materializations/{namespace}/{asset}/{partition}/{ulid}.json
//! ```
//!
//! Unpartitioned assets use the partition segment `__unpartitioned__`.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use ulid::{Generator, Ulid};

use strata_core::{RunId, StorageBackend};
use strata_table::{SnapshotId, TableIdent};

use crate::asset::AssetKey;
use crate::error::{Error, Result};
use crate::partition::PartitionKey;

const UNPARTITIONED_SEGMENT: &str = "__unpartitioned__";

/// One completed materialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializationRecord {
    /// Asset materialized.
    pub asset: AssetKey,
    /// Partition materialized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<PartitionKey>,
    /// Table written.
    pub table: TableIdent,
    /// Snapshot committed; `None` when the unit had nothing to commit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<SnapshotId>,
    /// Run that produced it.
    pub run_id: RunId,
    /// Completion time.
    pub materialized_at: DateTime<Utc>,
}

/// Stores materialization records.
#[async_trait]
pub trait MaterializationLedger: Send + Sync {
    /// Appends a record.
    async fn record(&self, record: MaterializationRecord) -> Result<()>;

    /// Returns the most recent record for a unit, if any.
    async fn latest(
        &self,
        asset: &AssetKey,
        partition: Option<&PartitionKey>,
    ) -> Result<Option<MaterializationRecord>>;
}

type UnitId = (AssetKey, Option<PartitionKey>);

/// Ledger held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedger {
    records: Arc<RwLock<HashMap<UnitId, Vec<MaterializationRecord>>>>,
}

impl InMemoryLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every record for a unit, oldest first.
    pub async fn history(
        &self,
        asset: &AssetKey,
        partition: Option<&PartitionKey>,
    ) -> Vec<MaterializationRecord> {
        self.records
            .read()
            .await
            .get(&(asset.clone(), partition.cloned()))
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl MaterializationLedger for InMemoryLedger {
    async fn record(&self, record: MaterializationRecord) -> Result<()> {
        self.records
            .write()
            .await
            .entry((record.asset.clone(), record.partition.clone()))
            .or_default()
            .push(record);
        Ok(())
    }

    async fn latest(
        &self,
        asset: &AssetKey,
        partition: Option<&PartitionKey>,
    ) -> Result<Option<MaterializationRecord>> {
        Ok(self
            .records
            .read()
            .await
            .get(&(asset.clone(), partition.cloned()))
            .and_then(|records| records.last().cloned()))
    }
}

/// Ledger stored as write-once objects in a blob store.
///
/// Record names are monotonic ULIDs, so the lexically greatest name under a
/// unit prefix is its latest record.
#[derive(Clone)]
pub struct ObjectLedger {
    storage: Arc<dyn StorageBackend>,
    prefix: String,
    ids: Arc<Mutex<Generator>>,
}

impl std::fmt::Debug for ObjectLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectLedger")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl ObjectLedger {
    /// Creates a ledger under `{flow_prefix}/materializations`.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>, flow_prefix: &str) -> Self {
        Self {
            storage,
            prefix: format!("{flow_prefix}/materializations"),
            ids: Arc::new(Mutex::new(Generator::new())),
        }
    }

    fn next_id(&self) -> Ulid {
        self.ids
            .lock()
            .ok()
            .and_then(|mut ids| ids.generate().ok())
            .unwrap_or_else(Ulid::new)
    }

    fn unit_prefix(&self, asset: &AssetKey, partition: Option<&PartitionKey>) -> String {
        let segment = partition.map_or(UNPARTITIONED_SEGMENT, PartitionKey::as_str);
        format!(
            "{}/{}/{}/{segment}/",
            self.prefix, asset.namespace, asset.name
        )
    }
}

#[async_trait]
impl MaterializationLedger for ObjectLedger {
    async fn record(&self, record: MaterializationRecord) -> Result<()> {
        let path = format!(
            "{}{}.json",
            self.unit_prefix(&record.asset, record.partition.as_ref()),
            self.next_id()
        );
        let bytes = Bytes::from(serde_json::to_vec(&record)?);
        self.storage.put_once(&path, bytes).await?;
        tracing::debug!(path = %path, "recorded materialization");
        Ok(())
    }

    async fn latest(
        &self,
        asset: &AssetKey,
        partition: Option<&PartitionKey>,
    ) -> Result<Option<MaterializationRecord>> {
        let prefix = self.unit_prefix(asset, partition);
        let Some(newest) = self
            .storage
            .list(&prefix)
            .await?
            .into_iter()
            .map(|meta| meta.path)
            .max()
        else {
            return Ok(None);
        };
        let bytes = self.storage.get(&newest).await?;
        let record = serde_json::from_slice(&bytes).map_err(|e| Error::Serialization {
            message: format!("parse materialization record {newest}: {e}"),
        })?;
        Ok(Some(record))
    }
}

//! Asset definitions and the executor capability.
//!
//! An asset is a node of the graph: a key, a partition key space, the keys
//! of its upstream assets, the table it materializes into, and an executor
//! that turns bound upstream readers into rows.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use strata_core::RunId;
use strata_table::{PartitionSpec, RemoveSpec, RowSource, Schema, TableIdent, TableReader};

use crate::error::{Error, Result};
use crate::partition::{PartitionKey, PartitionsDefinition};

/// Identity of an asset.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssetKey {
    /// Namespace (e.g., "raw", "silver", "gold").
    pub namespace: String,
    /// Asset name within the namespace.
    pub name: String,
}

impl AssetKey {
    /// Creates a new asset key.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Returns the canonical path form (`namespace/name`).
    #[must_use]
    pub fn canonical_string(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

/// The table an asset writes, created on first materialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableTarget {
    /// Table identity.
    pub ident: TableIdent,
    /// Table schema.
    pub schema: Schema,
    /// Table partition spec.
    pub partition_spec: PartitionSpec,
}

impl TableTarget {
    /// Creates an unpartitioned target.
    #[must_use]
    pub fn new(ident: TableIdent, schema: Schema) -> Self {
        Self {
            ident,
            schema,
            partition_spec: PartitionSpec::unpartitioned(),
        }
    }

    /// Sets the partition spec.
    #[must_use]
    pub fn with_partition_spec(mut self, spec: PartitionSpec) -> Self {
        self.partition_spec = spec;
        self
    }
}

/// How a materialization's files are committed.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum WriteMode {
    /// Add files.
    #[default]
    Append,
    /// Replace every live file in the table partitions the new files touch.
    /// On an unpartitioned table this replaces the whole table.
    ReplacePartitions,
    /// Remove the given files, then add the new ones.
    Overwrite(RemoveSpec),
    /// Remove every live file, then add the new ones.
    Truncate,
}

/// What an executor produced for one unit.
pub struct Materialization {
    /// Rows to write. Must use the target table's schema.
    pub rows: Box<dyn RowSource>,
    /// How to commit the written files.
    pub write_mode: WriteMode,
    /// Free-form values recorded on the unit outcome.
    pub metadata: BTreeMap<String, String>,
}

impl fmt::Debug for Materialization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Materialization")
            .field("write_mode", &self.write_mode)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

impl Materialization {
    /// Appends `rows`.
    #[must_use]
    pub fn append(rows: impl RowSource + 'static) -> Self {
        Self {
            rows: Box::new(rows),
            write_mode: WriteMode::Append,
            metadata: BTreeMap::new(),
        }
    }

    /// Sets the write mode.
    #[must_use]
    pub fn with_write_mode(mut self, mode: WriteMode) -> Self {
        self.write_mode = mode;
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.insert(key.into(), value.to_string());
        self
    }
}

/// Everything an executor may read while producing one unit.
#[derive(Debug)]
pub struct ExecutionContext {
    /// Run the unit belongs to.
    pub run_id: RunId,
    /// Asset being materialized.
    pub asset: AssetKey,
    /// Partition being materialized (`None` when unpartitioned).
    pub partition: Option<PartitionKey>,
    /// Upstream readers bound to each upstream's latest snapshot.
    pub inputs: BTreeMap<AssetKey, TableReader>,
    /// The target table at its latest snapshot.
    pub target: TableReader,
}

impl ExecutionContext {
    /// Returns the reader for an upstream asset.
    ///
    /// # Errors
    ///
    /// Returns `Error::DependencyNotFound` if `key` is not an upstream.
    pub fn input(&self, key: &AssetKey) -> Result<&TableReader> {
        self.inputs.get(key).ok_or_else(|| Error::DependencyNotFound {
            asset_key: self.asset.to_string(),
            dependency: key.to_string(),
        })
    }

    /// Schema rows must be produced in.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        self.target.schema()
    }
}

/// Produces rows for one unit of an asset.
#[async_trait]
pub trait AssetExecutor: Send + Sync {
    /// Runs the transformation. Errors mark the unit `Failed`.
    async fn execute(&self, context: &ExecutionContext) -> Result<Materialization>;
}

/// A node of the asset graph.
#[derive(Clone)]
pub struct AssetDefinition {
    /// Asset identity.
    pub key: AssetKey,
    /// Partition key space.
    pub partitions: PartitionsDefinition,
    /// Upstream assets, in declaration order.
    pub upstream: Vec<AssetKey>,
    /// Table the asset writes.
    pub target: TableTarget,
    /// Transformation.
    pub executor: Arc<dyn AssetExecutor>,
}

impl fmt::Debug for AssetDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetDefinition")
            .field("key", &self.key)
            .field("partitions", &self.partitions)
            .field("upstream", &self.upstream)
            .field("target", &self.target.ident)
            .finish_non_exhaustive()
    }
}

impl AssetDefinition {
    /// Creates an unpartitioned asset with no upstreams.
    #[must_use]
    pub fn new(key: AssetKey, target: TableTarget, executor: Arc<dyn AssetExecutor>) -> Self {
        Self {
            key,
            partitions: PartitionsDefinition::Unpartitioned,
            upstream: Vec::new(),
            target,
            executor,
        }
    }

    /// Declares an upstream asset. Repeats are ignored.
    #[must_use]
    pub fn depends_on(mut self, upstream: AssetKey) -> Self {
        if !self.upstream.contains(&upstream) {
            self.upstream.push(upstream);
        }
        self
    }

    /// Sets the partitions definition.
    #[must_use]
    pub fn with_partitions(mut self, partitions: PartitionsDefinition) -> Self {
        self.partitions = partitions;
        self
    }
}

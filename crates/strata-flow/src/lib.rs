//! # strata-flow
//!
//! Partition-aware asset materialization for strata tables.
//!
//! ## Core Concepts
//!
//! - **Asset**: a table produced by an executor from its upstream assets
//! - **Unit**: one (asset, partition) pair; the scheduler's unit of work and
//!   of commit
//! - **Run**: one execution of a selection, reported unit by unit
//! - **Ledger**: the record of which snapshot each unit last produced
//!
//! ## Guarantees
//!
//! - **Ordered**: a unit starts only after every upstream unit in the run
//!   succeeded
//! - **Isolated**: failures skip their downstream units and nothing else
//! - **Atomic**: each unit's output becomes visible in one commit or not at
//!   all
//! - **Deterministic**: execution order follows the graph, ties broken by
//!   declaration order
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use strata_core::MemoryBackend;
//! use strata_flow::prelude::*;
//! use strata_table::prelude::*;
//!
//! struct Trips;
//!
//! #[async_trait]
//! impl AssetExecutor for Trips {
//!     async fn execute(&self, ctx: &ExecutionContext) -> strata_flow::Result<Materialization> {
//!         let rows = vec![vec![Value::Long(3)], vec![Value::Long(10)]];
//!         Ok(Materialization::append(MemoryRowSource::new(ctx.schema().clone(), rows)))
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let schema = Schema::new(vec![Field::required("distance", DataType::Long)])?;
//! let ident = TableIdent::new("raw", "trips")?;
//! let graph = AssetGraph::builder()
//!     .asset(AssetDefinition::new(
//!         AssetKey::new("raw", "trips"),
//!         TableTarget::new(ident.clone(), schema),
//!         Arc::new(Trips),
//!     ))
//!     .build()?;
//!
//! let store = TableStore::new(Arc::new(MemoryBackend::new()), TableStoreConfig::default());
//! let scheduler = Scheduler::new(
//!     graph,
//!     store.clone(),
//!     Arc::new(InMemoryLedger::new()),
//!     SchedulerConfig::default(),
//! );
//! let report = scheduler.run(RunRequest::all(scheduler.graph())).await?;
//! assert!(report.is_success());
//! assert_eq!(store.table_summary(&ident).await?.live_rows, 2);
//! # Ok::<(), strata_flow::Error>(())
//! # }).unwrap();
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod asset;
pub(crate) mod dag;
pub mod error;
pub mod graph;
pub mod ledger;
pub mod metrics;
pub mod partition;
pub mod run;
pub mod scheduler;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::asset::{
        AssetDefinition, AssetExecutor, AssetKey, ExecutionContext, Materialization, TableTarget,
        WriteMode,
    };
    pub use crate::graph::{AssetGraph, AssetGraphBuilder, SelectionOptions};
    pub use crate::ledger::{
        InMemoryLedger, MaterializationLedger, MaterializationRecord, ObjectLedger,
    };
    pub use crate::partition::{PartitionKey, PartitionSelection, PartitionsDefinition};
    pub use crate::run::{RunReport, RunState, TransitionReason, UnitOutcome, UnitState, UnitWarning};
    pub use crate::scheduler::{RunRequest, Scheduler, SchedulerConfig};
}

pub use asset::{
    AssetDefinition, AssetExecutor, AssetKey, ExecutionContext, Materialization, TableTarget,
    WriteMode,
};
pub use error::{Error, Result};
pub use graph::{AssetGraph, AssetGraphBuilder, SelectionOptions};
pub use ledger::{InMemoryLedger, MaterializationLedger, MaterializationRecord, ObjectLedger};
pub use metrics::FlowMetrics;
pub use partition::{PartitionKey, PartitionSelection, PartitionsDefinition};
pub use run::{
    RunReport, RunState, TransitionReason, UnitKey, UnitOutcome, UnitState, UnitWarning,
};
pub use scheduler::{RunRequest, Scheduler, SchedulerConfig};

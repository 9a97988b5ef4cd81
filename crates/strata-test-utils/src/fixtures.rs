//! Pre-built fixtures: a test context, the taxi trip schema and executors.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use strata_core::StrataConfig;
use strata_flow::{
    AssetExecutor, AssetGraph, Error as FlowError, ExecutionContext, InMemoryLedger,
    Materialization, MaterializationLedger, ObjectLedger, Result as FlowResult, Scheduler,
    SchedulerConfig, WriteMode,
};
use strata_table::{
    DataType, Field, MemoryRowSource, ObjectCatalog, PartitionField, PartitionSpec, Row, Schema,
    TableStore, TableStoreConfig, Transform, Value,
};
use tokio::sync::Notify;

use crate::catalog::ContendedCatalog;
use crate::storage::TracingMemoryBackend;

/// Microseconds in one minute.
const MICROS_PER_MINUTE: i64 = 60_000_000;

/// Test environment: a tracing backend, a table store over it and a
/// contended catalog that can be told to refuse swaps.
pub struct TestContext {
    /// Shared storage backend.
    pub storage: Arc<TracingMemoryBackend>,
    /// Catalog used by `store`.
    pub catalog: ContendedCatalog,
    /// Table store.
    pub store: TableStore,
    /// Configuration the store and schedulers derive from.
    pub config: StrataConfig,
}

impl TestContext {
    /// Creates a context with default configuration under a unique
    /// warehouse.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(StrataConfig {
            warehouse: format!("warehouse-{}", uuid::Uuid::new_v4().as_simple()),
            ..StrataConfig::default()
        })
    }

    /// Creates a context with the given configuration.
    #[must_use]
    pub fn with_config(config: StrataConfig) -> Self {
        Self::with_storage(config, TracingMemoryBackend::new())
    }

    /// Creates a context over a caller-built backend, for example one with
    /// injected latency.
    #[must_use]
    pub fn with_storage(config: StrataConfig, storage: TracingMemoryBackend) -> Self {
        let storage = Arc::new(storage);
        let catalog = ContendedCatalog::new(Arc::new(ObjectCatalog::new(
            storage.clone(),
            config.catalog_prefix.clone(),
        )));
        let store = TableStore::with_catalog(
            storage.clone(),
            Arc::new(catalog.clone()),
            TableStoreConfig::from(&config),
        );
        Self {
            storage,
            catalog,
            store,
            config,
        }
    }

    /// Returns a ledger stored alongside the tables.
    #[must_use]
    pub fn object_ledger(&self) -> Arc<ObjectLedger> {
        Arc::new(ObjectLedger::new(
            self.storage.clone(),
            &self.config.flow_prefix,
        ))
    }

    /// Returns a scheduler over `graph` with an object ledger.
    #[must_use]
    pub fn scheduler(&self, graph: AssetGraph) -> Scheduler {
        self.scheduler_with_ledger(graph, self.object_ledger())
    }

    /// Returns a scheduler over `graph` with the given ledger.
    #[must_use]
    pub fn scheduler_with_ledger(
        &self,
        graph: AssetGraph,
        ledger: Arc<dyn MaterializationLedger>,
    ) -> Scheduler {
        Scheduler::new(
            graph,
            self.store.clone(),
            ledger,
            SchedulerConfig::from(&self.config),
        )
    }

    /// Returns a scheduler with an in-memory ledger.
    #[must_use]
    pub fn scheduler_in_memory(&self, graph: AssetGraph) -> Scheduler {
        self.scheduler_with_ledger(graph, Arc::new(InMemoryLedger::new()))
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Schema of the yellow taxi trip tables.
#[must_use]
pub fn taxi_schema() -> Schema {
    Schema::new(vec![
        Field::required("vendorid", DataType::Long),
        Field::required("tpep_pickup_datetime", DataType::Timestamp),
        Field::required("tpep_dropoff_datetime", DataType::Timestamp),
        Field::optional("passenger_count", DataType::Long),
        Field::required("trip_distance", DataType::Double),
        Field::optional("total_amount", DataType::Double),
    ])
    .expect("taxi schema is valid")
}

/// Partition spec bucketing taxi trips by pickup month.
#[must_use]
pub fn taxi_monthly_spec() -> PartitionSpec {
    PartitionSpec::new(vec![PartitionField::new(
        "tpep_pickup_datetime",
        "pickup_month",
        Transform::Month,
    )])
}

/// Builds `count` deterministic trips starting at `start_micros`, one minute
/// apart. Distances cycle through 0.5 to 30.0 miles.
#[must_use]
pub fn taxi_rows(start_micros: i64, count: usize) -> Vec<Row> {
    (0..count)
        .map(|i| {
            let n = i64::try_from(i).expect("row index fits i64");
            let pickup = start_micros + n * MICROS_PER_MINUTE;
            #[allow(clippy::cast_precision_loss)]
            let distance = 0.5 + (n % 60) as f64 * 0.5;
            vec![
                Value::Long(1 + n % 2),
                Value::Timestamp(pickup),
                Value::Timestamp(pickup + 12 * MICROS_PER_MINUTE),
                if n % 7 == 0 {
                    Value::Null
                } else {
                    Value::Long(1 + n % 4)
                },
                Value::Double(distance),
                Value::Double(distance.mul_add(2.5, 3.0)),
            ]
        })
        .collect()
}

/// Schema with a single required `distance` column of type long.
#[must_use]
pub fn distance_schema() -> Schema {
    Schema::new(vec![Field::required("distance", DataType::Long)]).expect("valid schema")
}

/// One-column rows holding the given distances.
#[must_use]
pub fn distance_rows(distances: &[i64]) -> Vec<Row> {
    distances.iter().map(|d| vec![Value::Long(*d)]).collect()
}

/// Returns fixed rows on every call and counts calls.
#[derive(Debug, Default)]
pub struct StaticExecutor {
    rows: Vec<Row>,
    write_mode: WriteMode,
    calls: AtomicUsize,
}

impl StaticExecutor {
    /// Appends `rows` on every call.
    #[must_use]
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    /// Uses `mode` instead of appending.
    #[must_use]
    pub fn with_write_mode(mut self, mode: WriteMode) -> Self {
        self.write_mode = mode;
        self
    }

    /// Returns how many times the executor ran.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AssetExecutor for StaticExecutor {
    async fn execute(&self, context: &ExecutionContext) -> FlowResult<Materialization> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(
            Materialization::append(MemoryRowSource::new(
                context.schema().clone(),
                self.rows.clone(),
            ))
            .with_write_mode(self.write_mode.clone())
            .with_metadata("rows", self.rows.len()),
        )
    }
}

/// Always fails.
#[derive(Debug, Clone)]
pub struct FailingExecutor {
    message: String,
}

impl FailingExecutor {
    /// Fails with `message`.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl AssetExecutor for FailingExecutor {
    async fn execute(&self, _context: &ExecutionContext) -> FlowResult<Materialization> {
        Err(FlowError::executor(self.message.clone()))
    }
}

/// Copies every row of one upstream asset into the target, optionally
/// keeping only rows whose timestamp column falls in the unit's `YYYY-MM`
/// partition.
#[derive(Debug, Clone)]
pub struct CopyExecutor {
    upstream: strata_flow::AssetKey,
    month_column: Option<String>,
}

impl CopyExecutor {
    /// Copies `upstream`.
    #[must_use]
    pub fn new(upstream: strata_flow::AssetKey) -> Self {
        Self {
            upstream,
            month_column: None,
        }
    }

    /// Keeps only rows of the unit's month, judged by `column`.
    #[must_use]
    pub fn by_month(mut self, column: impl Into<String>) -> Self {
        self.month_column = Some(column.into());
        self
    }
}

#[async_trait]
impl AssetExecutor for CopyExecutor {
    async fn execute(&self, context: &ExecutionContext) -> FlowResult<Materialization> {
        let input = context.input(&self.upstream)?;
        let mut rows = input.read_all().await?;
        if let (Some(column), Some(partition)) = (&self.month_column, &context.partition) {
            let index = input
                .schema()
                .index_of(column)
                .ok_or_else(|| FlowError::executor(format!("no column {column}")))?;
            let (start, end) = partition
                .month_range_micros()
                .ok_or_else(|| FlowError::executor(format!("{partition} is not a month")))?;
            rows.retain(|row| matches!(row[index], Value::Timestamp(t) if t >= start && t < end));
        }
        Ok(Materialization::append(MemoryRowSource::new(
            context.schema().clone(),
            rows,
        )))
    }
}

/// Produces `rows_per_month` taxi trips inside the unit's `YYYY-MM`
/// partition.
#[derive(Debug, Clone)]
pub struct MonthlyTaxiExecutor {
    rows_per_month: usize,
    batch_size: usize,
}

impl MonthlyTaxiExecutor {
    /// Produces `rows_per_month` rows per unit in source batches of 100.
    #[must_use]
    pub const fn new(rows_per_month: usize) -> Self {
        Self {
            rows_per_month,
            batch_size: 100,
        }
    }
}

#[async_trait]
impl AssetExecutor for MonthlyTaxiExecutor {
    async fn execute(&self, context: &ExecutionContext) -> FlowResult<Materialization> {
        let partition = context
            .partition
            .as_ref()
            .ok_or_else(|| FlowError::executor("monthly executor needs a partition"))?;
        let (start, _) = partition
            .month_range_micros()
            .ok_or_else(|| FlowError::executor(format!("{partition} is not a month")))?;
        let rows = taxi_rows(start, self.rows_per_month);
        Ok(Materialization::append(
            MemoryRowSource::new(context.schema().clone(), rows).with_batch_size(self.batch_size),
        )
        .with_write_mode(WriteMode::ReplacePartitions))
    }
}

/// Blocks inside `execute` until released, so tests can act while a unit
/// is running.
#[derive(Debug, Default)]
pub struct GateExecutor {
    rows: Vec<Row>,
    started: Notify,
    release: Notify,
}

impl GateExecutor {
    /// Appends `rows` once released.
    #[must_use]
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    /// Waits until `execute` has been entered.
    pub async fn wait_started(&self) {
        self.started.notified().await;
    }

    /// Lets a blocked (or the next) `execute` call proceed.
    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[async_trait]
impl AssetExecutor for GateExecutor {
    async fn execute(&self, context: &ExecutionContext) -> FlowResult<Materialization> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(Materialization::append(MemoryRowSource::new(
            context.schema().clone(),
            self.rows.clone(),
        )))
    }
}

/// Sleeps inside `execute` and records the most executors seen running at
/// once.
#[derive(Debug, Default)]
pub struct ConcurrencyProbe {
    running: AtomicUsize,
    peak: AtomicUsize,
    hold: Duration,
}

impl ConcurrencyProbe {
    /// Holds each call for `hold`.
    #[must_use]
    pub fn new(hold: Duration) -> Self {
        Self {
            hold,
            ..Self::default()
        }
    }

    /// Returns the peak number of concurrent calls.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AssetExecutor for ConcurrencyProbe {
    async fn execute(&self, context: &ExecutionContext) -> FlowResult<Materialization> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.hold).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(Materialization::append(MemoryRowSource::new(
            context.schema().clone(),
            distance_rows(&[1]),
        )))
    }
}

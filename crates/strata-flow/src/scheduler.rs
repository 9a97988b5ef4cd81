//! Partition-aware materialization scheduler.
//!
//! A run closes its selection over the asset graph, expands every selected
//! asset into units (one per selected partition), and executes the units as
//! a fork/join graph:
//!
//! - **Ordering**: each unit awaits the units it depends on
//! - **Parallelism**: independent units run concurrently, bounded by
//!   `max_concurrency`
//! - **Isolation**: a unit whose upstream did not succeed is skipped; other
//!   branches continue
//! - **Atomicity**: each unit publishes its output with exactly one commit,
//!   rebased and resubmitted on conflict up to `commit_max_attempts`
//! - **Single writer per table**: units of one scheduler take a per-table
//!   lock around their commit, so only writers outside the scheduler can
//!   make a commit conflict. Executors and data file writes stay parallel.
//!
//! # Partition mapping
//!
//! | Downstream | Upstream | Depends on |
//! |------------|----------|------------|
//! | partitioned | partitioned | the upstream unit with the same key |
//! | any | unpartitioned | the single upstream unit |
//! | unpartitioned | partitioned | every selected upstream unit |

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::future::{BoxFuture, FutureExt, Shared, join_all};
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use strata_core::{RunId, StrataConfig};
use strata_core::observability::run_span;
use strata_table::{
    DataFileEntry, Operation, PartitionValue, RemoveSpec, Row, RowSource, Snapshot, SnapshotId,
    SnapshotSelector, TableError, TableIdent, TableMetadata, TableStore,
};

use crate::asset::{AssetDefinition, AssetKey, ExecutionContext, WriteMode};
use crate::error::{Error, Result};
use crate::graph::{AssetGraph, SelectionOptions};
use crate::ledger::{MaterializationLedger, MaterializationRecord};
use crate::metrics::{FlowMetrics, TimingGuard};
use crate::partition::{PartitionKey, PartitionSelection};
use crate::run::{RunReport, RunState, TransitionReason, UnitKey, UnitOutcome, UnitState, UnitWarning};

/// Scheduler tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Maximum units executing at once.
    pub max_concurrency: usize,
    /// Commit attempts per unit before it fails.
    pub commit_max_attempts: u32,
    /// Rows per data file when draining an executor's rows.
    pub target_file_rows: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from(&StrataConfig::default())
    }
}

impl From<&StrataConfig> for SchedulerConfig {
    fn from(config: &StrataConfig) -> Self {
        Self {
            max_concurrency: config.max_concurrency,
            commit_max_attempts: config.commit_max_attempts,
            target_file_rows: config.target_file_rows,
        }
    }
}

/// What a run materializes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunRequest {
    /// Requested assets.
    pub selection: Vec<AssetKey>,
    /// How the selection is expanded.
    pub options: SelectionOptions,
    /// Partitions per asset. Partitioned assets not listed run every key.
    pub partitions: BTreeMap<AssetKey, PartitionSelection>,
}

impl RunRequest {
    /// Requests the given assets, unexpanded.
    #[must_use]
    pub fn new(selection: impl IntoIterator<Item = AssetKey>) -> Self {
        Self {
            selection: selection.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Requests every asset of a graph.
    #[must_use]
    pub fn all(graph: &AssetGraph) -> Self {
        Self::new(graph.assets().iter().map(|a| a.key.clone()))
    }

    /// Sets how the selection is expanded.
    #[must_use]
    pub const fn with_options(mut self, options: SelectionOptions) -> Self {
        self.options = options;
        self
    }

    /// Restricts the partitions run for one asset.
    #[must_use]
    pub fn with_partitions(mut self, asset: AssetKey, selection: PartitionSelection) -> Self {
        self.partitions.insert(asset, selection);
        self
    }
}

/// One unit of a planned run.
#[derive(Debug, Clone)]
struct PlannedUnit {
    key: UnitKey,
    definition: AssetDefinition,
    /// Every upstream unit this one reads, in or out of the run.
    upstream_units: Vec<UnitKey>,
    /// Indices of the upstream units that are part of the run.
    deps: Vec<usize>,
}

#[derive(Debug)]
struct RunTracker {
    state: RunState,
    units: Vec<UnitOutcome>,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl RunTracker {
    fn report(&self, run_id: RunId) -> RunReport {
        RunReport {
            run_id,
            state: self.state,
            units: self.units.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

#[derive(Debug, Clone)]
struct RunEntry {
    tracker: Arc<RwLock<RunTracker>>,
    cancel: CancellationToken,
    finished: CancellationToken,
}

/// Per-run state shared by every unit future.
struct RunContext {
    run_id: RunId,
    tracker: Arc<RwLock<RunTracker>>,
    cancel: CancellationToken,
    semaphore: Arc<Semaphore>,
}

/// What a unit produced, kept even when it fails part way.
#[derive(Debug, Default)]
struct UnitProgress {
    warnings: Vec<UnitWarning>,
    snapshot_id: Option<SnapshotId>,
    commit_attempts: u32,
    rows_written: u64,
    files_written: u64,
    metadata: BTreeMap<String, String>,
}

type UnitFuture = Shared<BoxFuture<'static, UnitState>>;

struct SchedulerInner {
    graph: Arc<AssetGraph>,
    store: TableStore,
    ledger: Arc<dyn MaterializationLedger>,
    config: SchedulerConfig,
    metrics: FlowMetrics,
    runs: RwLock<HashMap<RunId, RunEntry>>,
    commit_locks: Mutex<HashMap<TableIdent, Arc<Mutex<()>>>>,
}

/// Runs selections of an asset graph against a table store.
///
/// Cheap to clone; clones share runs.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("assets", &self.inner.graph.len())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Creates a scheduler.
    #[must_use]
    pub fn new(
        graph: impl Into<Arc<AssetGraph>>,
        store: TableStore,
        ledger: Arc<dyn MaterializationLedger>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                graph: graph.into(),
                store,
                ledger,
                config,
                metrics: FlowMetrics::new(),
                runs: RwLock::new(HashMap::new()),
                commit_locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The asset graph.
    #[must_use]
    pub fn graph(&self) -> &AssetGraph {
        &self.inner.graph
    }

    /// The table store units write to.
    #[must_use]
    pub fn store(&self) -> &TableStore {
        &self.inner.store
    }

    /// The materialization ledger.
    #[must_use]
    pub fn ledger(&self) -> &Arc<dyn MaterializationLedger> {
        &self.inner.ledger
    }

    /// Runs a request and waits for every unit to finish.
    ///
    /// Unit failures are reported in the returned [`RunReport`], not as
    /// errors.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be planned: an unknown asset
    /// (`Error::AssetNotFound`) or a partition outside an asset's
    /// definition (`Error::InvalidPartition`).
    pub async fn run(&self, request: RunRequest) -> Result<RunReport> {
        let run_id = self.submit(request).await?;
        self.wait(run_id).await
    }

    /// Plans a request and starts it in the background.
    ///
    /// # Errors
    ///
    /// Returns the same planning errors as [`Scheduler::run`].
    #[tracing::instrument(skip(self, request), fields(selection = request.selection.len()))]
    pub async fn submit(&self, request: RunRequest) -> Result<RunId> {
        let units = self.inner.plan(&request)?;
        let run_id = RunId::generate();
        let entry = RunEntry {
            tracker: Arc::new(RwLock::new(RunTracker {
                state: RunState::Running,
                units: units
                    .iter()
                    .map(|u| UnitOutcome::pending(u.key.clone()))
                    .collect(),
                started_at: Utc::now(),
                completed_at: None,
            })),
            cancel: CancellationToken::new(),
            finished: CancellationToken::new(),
        };
        self.inner
            .runs
            .write()
            .await
            .insert(run_id, entry.clone());

        tracing::info!(run_id = %run_id, units = units.len(), "submitted run");
        let span = run_span("run", &run_id.to_string());
        tokio::spawn(Arc::clone(&self.inner).drive(run_id, units, entry).instrument(span));
        Ok(run_id)
    }

    /// Returns the current report of a run.
    ///
    /// # Errors
    ///
    /// Returns `Error::RunNotFound` for an unknown run.
    pub async fn status(&self, run_id: RunId) -> Result<RunReport> {
        let entry = self.inner.entry(run_id).await?;
        let tracker = entry.tracker.read().await;
        Ok(tracker.report(run_id))
    }

    /// Cancels a run. Units already running finish; units that have not
    /// started end `Skipped` with reason `run_cancelled`.
    ///
    /// # Errors
    ///
    /// Returns `Error::RunNotFound` for an unknown run.
    pub async fn cancel(&self, run_id: RunId) -> Result<()> {
        let entry = self.inner.entry(run_id).await?;
        entry.cancel.cancel();
        tracing::info!(run_id = %run_id, "cancel requested");
        Ok(())
    }

    /// Waits for a run to finish and returns its final report.
    ///
    /// # Errors
    ///
    /// Returns `Error::RunNotFound` for an unknown run.
    pub async fn wait(&self, run_id: RunId) -> Result<RunReport> {
        let entry = self.inner.entry(run_id).await?;
        entry.finished.cancelled().await;
        let tracker = entry.tracker.read().await;
        Ok(tracker.report(run_id))
    }

    /// Removes a finished run and returns its final report. Later calls
    /// for the run return `Error::RunNotFound`.
    ///
    /// # Errors
    ///
    /// Returns `Error::RunNotFound` for an unknown run and
    /// `Error::RunInProgress` if the run has not finished.
    pub async fn forget(&self, run_id: RunId) -> Result<RunReport> {
        let mut runs = self.inner.runs.write().await;
        let entry = runs.get(&run_id).ok_or(Error::RunNotFound { run_id })?;
        if !entry.finished.is_cancelled() {
            return Err(Error::RunInProgress { run_id });
        }
        let report = entry.tracker.read().await.report(run_id);
        runs.remove(&run_id);
        drop(runs);
        tracing::debug!(run_id = %run_id, "forgot run");
        Ok(report)
    }

    /// Number of runs the scheduler still tracks, finished or not.
    pub async fn tracked_runs(&self) -> usize {
        self.inner.runs.read().await.len()
    }
}

impl SchedulerInner {
    async fn entry(&self, run_id: RunId) -> Result<RunEntry> {
        self.runs
            .read()
            .await
            .get(&run_id)
            .cloned()
            .ok_or(Error::RunNotFound { run_id })
    }

    /// Expands a request into units in execution order.
    fn plan(&self, request: &RunRequest) -> Result<Vec<PlannedUnit>> {
        let order = self.graph.close_selection(&request.selection, request.options)?;
        if let Some(extra) = request.partitions.keys().find(|k| !order.contains(k)) {
            return Err(Error::InvalidPartition {
                asset_key: extra.to_string(),
                message: "partitions requested for an asset outside the run".into(),
            });
        }

        let mut selected: HashMap<AssetKey, Vec<Option<PartitionKey>>> = HashMap::new();
        let mut index: HashMap<UnitKey, usize> = HashMap::new();
        let mut units = Vec::new();
        for key in &order {
            let definition = self.graph.require(key)?;
            let partitions = unit_partitions(definition, request.partitions.get(key))?;
            for partition in &partitions {
                let unit_key = UnitKey::new(key.clone(), partition.clone());
                let upstream_units =
                    self.upstream_units(definition, partition.as_ref(), &selected)?;
                let deps = upstream_units
                    .iter()
                    .filter_map(|u| index.get(u).copied())
                    .collect();
                index.insert(unit_key.clone(), units.len());
                units.push(PlannedUnit {
                    key: unit_key,
                    definition: definition.clone(),
                    upstream_units,
                    deps,
                });
            }
            selected.insert(key.clone(), partitions);
        }
        Ok(units)
    }

    /// Maps one unit onto the upstream units it reads.
    fn upstream_units(
        &self,
        definition: &AssetDefinition,
        partition: Option<&PartitionKey>,
        selected: &HashMap<AssetKey, Vec<Option<PartitionKey>>>,
    ) -> Result<Vec<UnitKey>> {
        let mut units = Vec::new();
        for upstream in &definition.upstream {
            let upstream_def = self.graph.require(upstream)?;
            if !upstream_def.partitions.is_partitioned() {
                units.push(UnitKey::new(upstream.clone(), None));
                continue;
            }
            match partition {
                Some(key) => {
                    if !upstream_def.partitions.contains(key) {
                        return Err(Error::InvalidPartition {
                            asset_key: definition.key.to_string(),
                            message: format!("upstream {upstream} has no partition '{key}'"),
                        });
                    }
                    units.push(UnitKey::new(upstream.clone(), Some(key.clone())));
                }
                None => match selected.get(upstream) {
                    Some(keys) => units.extend(
                        keys.iter()
                            .map(|k| UnitKey::new(upstream.clone(), k.clone())),
                    ),
                    None => units.extend(
                        upstream_def
                            .partitions
                            .keys()
                            .into_iter()
                            .map(|k| UnitKey::new(upstream.clone(), Some(k))),
                    ),
                },
            }
        }
        Ok(units)
    }

    /// Builds the fork/join graph of unit futures and drives it to
    /// completion.
    async fn drive(self: Arc<Self>, run_id: RunId, units: Vec<PlannedUnit>, entry: RunEntry) {
        let context = Arc::new(RunContext {
            run_id,
            tracker: Arc::clone(&entry.tracker),
            cancel: entry.cancel.clone(),
            semaphore: Arc::new(Semaphore::new(self.config.max_concurrency.max(1))),
        });

        let mut futures: Vec<UnitFuture> = Vec::with_capacity(units.len());
        for (index, unit) in units.into_iter().enumerate() {
            let deps: Vec<UnitFuture> = unit.deps.iter().map(|&d| futures[d].clone()).collect();
            let future = Arc::clone(&self)
                .run_unit(Arc::clone(&context), index, unit, deps)
                .boxed()
                .shared();
            futures.push(future);
        }
        join_all(futures).await;

        let mut tracker = entry.tracker.write().await;
        let state = RunState::from_units(&tracker.units, entry.cancel.is_cancelled());
        tracker.state = state;
        tracker.completed_at = Some(Utc::now());
        self.metrics.record_run(state.as_label());
        tracing::info!(
            state = %state,
            succeeded = tracker.units.iter().filter(|u| u.state == UnitState::Succeeded).count(),
            units = tracker.units.len(),
            "run finished"
        );
        drop(tracker);
        entry.finished.cancel();
    }

    /// Waits for upstream units, then runs one unit in its own task.
    async fn run_unit(
        self: Arc<Self>,
        context: Arc<RunContext>,
        index: usize,
        unit: PlannedUnit,
        deps: Vec<UnitFuture>,
    ) -> UnitState {
        let upstream = join_all(deps).await;
        if upstream.iter().any(|s| *s != UnitState::Succeeded) {
            let reason = if context.cancel.is_cancelled() {
                TransitionReason::RunCancelled
            } else {
                TransitionReason::UpstreamFailed
            };
            return self.skip(&context, index, &unit.key, reason).await;
        }
        if context.cancel.is_cancelled() {
            return self
                .skip(&context, index, &unit.key, TransitionReason::RunCancelled)
                .await;
        }

        let semaphore = Arc::clone(&context.semaphore);
        let permit = tokio::select! {
            permit = semaphore.acquire_owned() => permit,
            () = context.cancel.cancelled() => {
                return self
                    .skip(&context, index, &unit.key, TransitionReason::RunCancelled)
                    .await;
            }
        };
        let Ok(permit) = permit else {
            return self
                .skip(&context, index, &unit.key, TransitionReason::RunCancelled)
                .await;
        };
        if context.cancel.is_cancelled() {
            return self
                .skip(&context, index, &unit.key, TransitionReason::RunCancelled)
                .await;
        }

        if let Some(outcome) = context.tracker.write().await.units.get_mut(index) {
            if let Err(e) = outcome.transition(UnitState::Running, TransitionReason::ExecutionStarted) {
                tracing::error!(unit = %unit.key, error = %e, "unit state corrupted");
                return UnitState::Failed;
            }
        }
        tracing::debug!(unit = %unit.key, "unit started");

        let key = unit.key.clone();
        let inner = Arc::clone(&self);
        let run_id = context.run_id;
        let span = tracing::info_span!("unit", unit = %key);
        let task = tokio::spawn(
            async move {
                let _permit = permit;
                let metrics = inner.metrics.clone();
                let _timer = TimingGuard::new(move |elapsed| {
                    metrics.observe_unit_duration(elapsed.as_secs_f64());
                });
                let mut progress = UnitProgress::default();
                let result = inner.materialize(run_id, &unit, &mut progress).await;
                (progress, result)
            }
            .instrument(span),
        );
        let (progress, result) = match task.await {
            Ok(done) => done,
            Err(e) => (
                UnitProgress::default(),
                Err(Error::executor(format!("unit task aborted: {e}"))),
            ),
        };
        self.finish(&context, index, &key, progress, result).await
    }

    async fn skip(
        &self,
        context: &RunContext,
        index: usize,
        key: &UnitKey,
        reason: TransitionReason,
    ) -> UnitState {
        if let Some(outcome) = context.tracker.write().await.units.get_mut(index) {
            if let Err(e) = outcome.transition(UnitState::Skipped, reason) {
                tracing::error!(unit = %key, error = %e, "unit state corrupted");
            }
        }
        self.metrics.record_unit(UnitState::Skipped.as_label());
        tracing::info!(unit = %key, reason = %reason, "unit skipped");
        UnitState::Skipped
    }

    async fn finish(
        &self,
        context: &RunContext,
        index: usize,
        key: &UnitKey,
        progress: UnitProgress,
        result: Result<()>,
    ) -> UnitState {
        let (state, reason, error) = match result {
            Ok(()) => (UnitState::Succeeded, TransitionReason::ExecutionSucceeded, None),
            Err(e @ Error::CommitRetriesExhausted { .. }) => (
                UnitState::Failed,
                TransitionReason::CommitRetriesExhausted,
                Some(e),
            ),
            Err(e) => (UnitState::Failed, TransitionReason::ExecutionFailed, Some(e)),
        };

        let mut tracker = context.tracker.write().await;
        if let Some(outcome) = tracker.units.get_mut(index) {
            outcome.warnings = progress.warnings;
            outcome.snapshot_id = progress.snapshot_id;
            outcome.commit_attempts = progress.commit_attempts;
            outcome.rows_written = progress.rows_written;
            outcome.files_written = progress.files_written;
            outcome.metadata = progress.metadata;
            outcome.error = error.as_ref().map(ToString::to_string);
            if let Err(e) = outcome.transition(state, reason) {
                tracing::error!(unit = %key, error = %e, "unit state corrupted");
            }
        }
        drop(tracker);

        self.metrics.record_unit(state.as_label());
        match error {
            None => tracing::info!(unit = %key, "unit succeeded"),
            Some(e) => tracing::error!(unit = %key, reason = %reason, error = %e, "unit failed"),
        }
        state
    }

    /// Executes one unit: staleness check, executor, data files, commit and
    /// ledger record.
    async fn materialize(
        &self,
        run_id: RunId,
        unit: &PlannedUnit,
        progress: &mut UnitProgress,
    ) -> Result<()> {
        let definition = &unit.definition;

        for upstream in &unit.upstream_units {
            let recorded = self
                .ledger
                .latest(&upstream.asset, upstream.partition.as_ref())
                .await?;
            if recorded.is_none() {
                tracing::warn!(unit = %unit.key, upstream = %upstream, "upstream was never materialized");
                self.metrics.record_stale_upstream();
                progress.warnings.push(UnitWarning::StaleUpstream {
                    upstream: upstream.asset.clone(),
                    partition: upstream.partition.clone(),
                });
            }
        }

        let mut inputs = BTreeMap::new();
        for upstream in &definition.upstream {
            let target = &self.graph.require(upstream)?.target;
            self.store
                .create_table_if_not_exists(
                    &target.ident,
                    target.schema.clone(),
                    target.partition_spec.clone(),
                )
                .await?;
            let reader = self.store.open(&target.ident, SnapshotSelector::Latest).await?;
            inputs.insert(upstream.clone(), reader);
        }

        let target = &definition.target;
        let metadata = self
            .store
            .create_table_if_not_exists(
                &target.ident,
                target.schema.clone(),
                target.partition_spec.clone(),
            )
            .await?;
        let context = ExecutionContext {
            run_id,
            asset: definition.key.clone(),
            partition: unit.key.partition.clone(),
            inputs,
            target: self.store.open(&target.ident, SnapshotSelector::Latest).await?,
        };

        let materialization = definition.executor.execute(&context).await?;
        if materialization.rows.schema() != &metadata.schema {
            return Err(TableError::schema_mismatch(format!(
                "{} produced rows that do not match the schema of {}",
                definition.key, target.ident
            ))
            .into());
        }

        let files = self
            .write_chunks(&metadata, materialization.rows.as_ref())
            .await?;
        progress.rows_written = files.iter().map(|f| f.record_count).sum();
        progress.files_written = files.len() as u64;
        progress.metadata = materialization.metadata;

        let partitioned = !metadata.partition_spec.is_unpartitioned();
        match build_operation(&materialization.write_mode, partitioned, files) {
            Some(operation) => {
                let lock = self.commit_lock(&target.ident).await;
                let guard = lock.lock().await;
                let committed = self
                    .commit_with_retry(&target.ident, operation, progress)
                    .await;
                drop(guard);
                progress.snapshot_id = Some(committed?.snapshot_id);
            }
            None => tracing::debug!(unit = %unit.key, "nothing to commit"),
        }

        self.ledger
            .record(MaterializationRecord {
                asset: definition.key.clone(),
                partition: unit.key.partition.clone(),
                table: target.ident.clone(),
                snapshot_id: progress.snapshot_id,
                run_id,
                materialized_at: Utc::now(),
            })
            .await
    }

    /// Drains a row source into data files of at most `target_file_rows`
    /// rows per partition.
    async fn write_chunks(
        &self,
        metadata: &TableMetadata,
        rows: &dyn RowSource,
    ) -> Result<Vec<DataFileEntry>> {
        let writer = self.store.writer(metadata);
        let chunk_rows = self.config.target_file_rows.max(1);
        let mut files = Vec::new();
        let mut chunk: Vec<Row> = Vec::with_capacity(chunk_rows);
        let mut batches = rows.batches();
        while let Some(batch) = batches.next().await {
            for row in batch? {
                chunk.push(row);
                if chunk.len() >= chunk_rows {
                    files.extend(writer.write(std::mem::take(&mut chunk)).await?);
                }
            }
        }
        if !chunk.is_empty() {
            files.extend(writer.write(chunk).await?);
        }
        Ok(files)
    }

    /// Returns the lock serializing this scheduler's commits to one table.
    async fn commit_lock(&self, ident: &TableIdent) -> Arc<Mutex<()>> {
        let mut locks = self.commit_locks.lock().await;
        Arc::clone(locks.entry(ident.clone()).or_default())
    }

    /// Commits against the latest snapshot, rebasing after each conflict.
    async fn commit_with_retry(
        &self,
        ident: &TableIdent,
        operation: Operation,
        progress: &mut UnitProgress,
    ) -> Result<Snapshot> {
        let max_attempts = self.config.commit_max_attempts.max(1);
        let mut base = self.store.load_table(ident).await?.current_snapshot_id();
        loop {
            progress.commit_attempts += 1;
            match self.store.commit(ident, base, operation.clone()).await {
                Ok(snapshot) => return Ok(snapshot),
                Err(TableError::Conflict {
                    current_snapshot_id,
                    ..
                }) => {
                    if progress.commit_attempts >= max_attempts {
                        return Err(Error::CommitRetriesExhausted {
                            table: ident.clone(),
                            attempts: progress.commit_attempts,
                            current_snapshot_id,
                        });
                    }
                    tracing::warn!(
                        table = %ident,
                        attempt = progress.commit_attempts,
                        base = %base,
                        current = %current_snapshot_id,
                        "commit conflict, rebasing"
                    );
                    self.metrics.record_commit_retry();
                    base = self.store.load_table(ident).await?.current_snapshot_id();
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Resolves which partitions of an asset a run covers. Unpartitioned assets
/// have one unit with no partition.
fn unit_partitions(
    definition: &AssetDefinition,
    selection: Option<&PartitionSelection>,
) -> Result<Vec<Option<PartitionKey>>> {
    let asset_key = definition.key.to_string();
    let keys = selection
        .unwrap_or(&PartitionSelection::All)
        .resolve(&asset_key, &definition.partitions)
        .map_err(|e| match e {
            Error::InvalidPartition { message, .. } => Error::InvalidPartition {
                asset_key: asset_key.clone(),
                message,
            },
            other => other,
        })?;
    if definition.partitions.is_partitioned() {
        Ok(keys.into_iter().map(Some).collect())
    } else {
        Ok(vec![None])
    }
}

/// Turns written files into the commit their write mode calls for. `None`
/// when the mode only adds and nothing was written.
fn build_operation(
    mode: &WriteMode,
    partitioned: bool,
    files: Vec<DataFileEntry>,
) -> Option<Operation> {
    match mode {
        WriteMode::Append => {
            if files.is_empty() {
                None
            } else {
                Some(Operation::Append { files })
            }
        }
        WriteMode::ReplacePartitions => {
            if files.is_empty() {
                return None;
            }
            let remove = if partitioned {
                let mut touched: Vec<PartitionValue> = Vec::new();
                for file in &files {
                    if !touched.contains(&file.partition) {
                        touched.push(file.partition.clone());
                    }
                }
                RemoveSpec::Partitions(touched)
            } else {
                RemoveSpec::All
            };
            Some(Operation::Overwrite { remove, files })
        }
        WriteMode::Overwrite(remove) => Some(replace(remove.clone(), files)),
        WriteMode::Truncate => Some(replace(RemoveSpec::All, files)),
    }
}

fn replace(remove: RemoveSpec, files: Vec<DataFileEntry>) -> Operation {
    if files.is_empty() {
        Operation::Delete { remove }
    } else {
        Operation::Overwrite { remove, files }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_table::{FileStatus, Value};

    fn entry(path: &str, partition: &str) -> DataFileEntry {
        DataFileEntry {
            path: path.into(),
            status: FileStatus::Added,
            partition: PartitionValue(vec![Value::String(partition.into())]),
            record_count: 1,
            file_size_bytes: 10,
            content_sha256: String::new(),
            column_stats: BTreeMap::new(),
            snapshot_id: None,
        }
    }

    #[test]
    fn append_without_files_commits_nothing() {
        assert!(build_operation(&WriteMode::Append, false, Vec::new()).is_none());
        assert!(build_operation(&WriteMode::ReplacePartitions, true, Vec::new()).is_none());
    }

    #[test]
    fn replace_partitions_removes_touched_partitions_once() {
        let files = vec![entry("a", "us"), entry("b", "us"), entry("c", "eu")];
        let Some(Operation::Overwrite { remove, files }) =
            build_operation(&WriteMode::ReplacePartitions, true, files)
        else {
            panic!("expected overwrite");
        };
        assert_eq!(files.len(), 3);
        assert_eq!(
            remove,
            RemoveSpec::Partitions(vec![
                PartitionValue(vec![Value::String("us".into())]),
                PartitionValue(vec![Value::String("eu".into())]),
            ])
        );

        let Some(Operation::Overwrite { remove, .. }) =
            build_operation(&WriteMode::ReplacePartitions, false, vec![entry("a", "x")])
        else {
            panic!("expected overwrite");
        };
        assert_eq!(remove, RemoveSpec::All);
    }

    #[test]
    fn truncate_without_files_deletes() {
        assert_eq!(
            build_operation(&WriteMode::Truncate, false, Vec::new()),
            Some(Operation::Delete {
                remove: RemoveSpec::All
            })
        );
        assert!(matches!(
            build_operation(&WriteMode::Truncate, false, vec![entry("a", "x")]),
            Some(Operation::Overwrite {
                remove: RemoveSpec::All,
                ..
            })
        ));
    }

    #[test]
    fn config_derives_from_strata_config() {
        let config = StrataConfig {
            max_concurrency: 3,
            commit_max_attempts: 7,
            target_file_rows: 11,
            ..StrataConfig::default()
        };
        let scheduler = SchedulerConfig::from(&config);
        assert_eq!(scheduler.max_concurrency, 3);
        assert_eq!(scheduler.commit_max_attempts, 7);
        assert_eq!(scheduler.target_file_rows, 11);
    }
}

//! Integration tests for partitioned assets: one unit and one commit per
//! partition, partition mapping between assets, and replace semantics.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use strata_core::StrataConfig;
use strata_flow::prelude::*;
use strata_flow::Error;
use strata_table::prelude::*;
use strata_test_utils::{
    CopyExecutor, MonthlyTaxiExecutor, StaticExecutor, TestContext, TracingMemoryBackend,
    assert_run_succeeded,
    assert_topological_order, distance_rows, distance_schema, taxi_monthly_spec, taxi_schema,
};

const ROWS_PER_MONTH: usize = 250;

fn key(ns: &str, name: &str) -> AssetKey {
    AssetKey::new(ns, name)
}

fn ident(key: &AssetKey) -> TableIdent {
    TableIdent::new(key.namespace.clone(), key.name.clone()).unwrap()
}

fn q1_2024() -> PartitionsDefinition {
    PartitionsDefinition::monthly(
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
    )
    .unwrap()
}

fn context() -> TestContext {
    TestContext::with_config(StrataConfig {
        target_file_rows: 100,
        ..StrataConfig::default()
    })
}

/// raw (monthly) -> silver (monthly) -> gold (unpartitioned)
fn taxi_graph() -> AssetGraph {
    let raw = key("raw", "yellow_trips");
    let silver = key("silver", "yellow_trips");
    let gold = key("gold", "all_trips");
    AssetGraph::builder()
        .asset(
            AssetDefinition::new(
                raw.clone(),
                TableTarget::new(ident(&raw), taxi_schema()).with_partition_spec(taxi_monthly_spec()),
                Arc::new(MonthlyTaxiExecutor::new(ROWS_PER_MONTH)),
            )
            .with_partitions(q1_2024()),
        )
        .asset(
            AssetDefinition::new(
                silver.clone(),
                TableTarget::new(ident(&silver), taxi_schema())
                    .with_partition_spec(taxi_monthly_spec()),
                Arc::new(CopyExecutor::new(raw.clone()).by_month("tpep_pickup_datetime")),
            )
            .depends_on(raw)
            .with_partitions(q1_2024()),
        )
        .asset(
            AssetDefinition::new(
                gold.clone(),
                TableTarget::new(ident(&gold), taxi_schema()),
                Arc::new(CopyExecutor::new(silver.clone())),
            )
            .depends_on(silver),
        )
        .build()
        .unwrap()
}

fn month(key: &str) -> PartitionKey {
    PartitionKey::new(key).unwrap()
}

#[tokio::test]
async fn test_each_month_is_one_unit_and_one_commit() {
    let ctx = context();
    let scheduler = ctx.scheduler(taxi_graph());
    let graph = scheduler.graph();

    let report = scheduler.run(RunRequest::all(graph)).await.unwrap();
    assert_run_succeeded(&report);
    assert_topological_order(&report, graph);
    assert_eq!(report.units.len(), 7);

    let raw = key("raw", "yellow_trips");
    let partitions: Vec<String> = report
        .units_of(&raw)
        .map(|u| u.key.partition.as_ref().unwrap().to_string())
        .collect();
    assert_eq!(partitions, vec!["2024-01", "2024-02", "2024-03"]);

    for unit in report.units_of(&raw) {
        assert_eq!(unit.rows_written, ROWS_PER_MONTH as u64);
        // 250 rows in files of at most 100.
        assert_eq!(unit.files_written, 3);
        assert!(unit.snapshot_id.is_some());
    }

    let summary = ctx.store.table_summary(&ident(&raw)).await.unwrap();
    assert_eq!(summary.live_rows, 3 * ROWS_PER_MONTH as u64);
    assert_eq!(summary.live_files, 9);
    // Root plus exactly one commit per unit.
    assert_eq!(summary.snapshot_count, 4);

    let silver = ctx
        .store
        .table_summary(&ident(&key("silver", "yellow_trips")))
        .await
        .unwrap();
    assert_eq!(silver.live_rows, 3 * ROWS_PER_MONTH as u64);
    assert_eq!(silver.snapshot_count, 4);

    let gold_key = key("gold", "all_trips");
    let gold = report.unit(&gold_key, None).unwrap();
    assert_eq!(gold.rows_written, 3 * ROWS_PER_MONTH as u64);
    let silver_done = report
        .units_of(&key("silver", "yellow_trips"))
        .filter_map(|u| u.completed_at)
        .max()
        .unwrap();
    assert!(gold.started_at.unwrap() >= silver_done);
}

#[tokio::test]
async fn test_rerunning_a_month_replaces_it() {
    let ctx = context();
    let scheduler = ctx.scheduler(taxi_graph());
    let raw = key("raw", "yellow_trips");

    let first = scheduler
        .run(RunRequest::new([raw.clone()]))
        .await
        .unwrap();
    assert_run_succeeded(&first);

    let request = RunRequest::new([raw.clone()])
        .with_partitions(raw.clone(), PartitionSelection::keys(["2024-02"]).unwrap());
    let second = scheduler.run(request).await.unwrap();
    assert_run_succeeded(&second);
    assert_eq!(second.units.len(), 1);

    let summary = ctx.store.table_summary(&ident(&raw)).await.unwrap();
    assert_eq!(summary.live_rows, 3 * ROWS_PER_MONTH as u64);
    assert_eq!(summary.snapshot_count, 5);

    let snapshot = ctx
        .store
        .list_snapshots(&ident(&raw))
        .await
        .unwrap()
        .pop()
        .unwrap();
    assert_eq!(snapshot.operation, OperationKind::Overwrite);
    assert_eq!(snapshot.summary.removed_files, 3);
    assert_eq!(snapshot.summary.added_files, 3);

    let ledger = scheduler.ledger();
    let latest = ledger.latest(&raw, Some(&month("2024-02"))).await.unwrap().unwrap();
    assert_eq!(latest.snapshot_id, Some(snapshot.snapshot_id));
    assert_eq!(latest.run_id, second.run_id);
    let january = ledger.latest(&raw, Some(&month("2024-01"))).await.unwrap().unwrap();
    assert_eq!(january.run_id, first.run_id);
}

#[tokio::test]
async fn test_partition_subset_warns_per_partition() {
    let ctx = context();
    let scheduler = ctx.scheduler(taxi_graph());
    let raw = key("raw", "yellow_trips");
    let silver = key("silver", "yellow_trips");

    scheduler
        .run(
            RunRequest::new([raw.clone()])
                .with_partitions(raw.clone(), PartitionSelection::keys(["2024-01"]).unwrap()),
        )
        .await
        .unwrap();

    let request = RunRequest::new([silver.clone()])
        .with_partitions(silver.clone(), PartitionSelection::keys(["2024-01", "2024-03"]).unwrap());
    let report = scheduler.run(request).await.unwrap();
    assert_run_succeeded(&report);

    let january = report.unit(&silver, Some(&month("2024-01"))).unwrap();
    assert!(january.warnings.is_empty());
    assert_eq!(january.rows_written, ROWS_PER_MONTH as u64);

    let march = report.unit(&silver, Some(&month("2024-03"))).unwrap();
    assert_eq!(
        march.warnings,
        vec![UnitWarning::StaleUpstream {
            upstream: raw,
            partition: Some(month("2024-03")),
        }]
    );
    assert_eq!(march.rows_written, 0);
}

#[tokio::test]
async fn test_invalid_partition_requests_fail_planning() {
    let ctx = context();
    let scheduler = ctx.scheduler(taxi_graph());
    let raw = key("raw", "yellow_trips");
    let gold = key("gold", "all_trips");

    let outside = RunRequest::new([raw.clone()])
        .with_partitions(raw.clone(), PartitionSelection::keys(["2023-12"]).unwrap());
    assert!(matches!(
        scheduler.run(outside).await,
        Err(Error::InvalidPartition { .. })
    ));

    let unpartitioned = RunRequest::new([gold.clone()])
        .with_partitions(gold.clone(), PartitionSelection::keys(["2024-01"]).unwrap());
    assert!(matches!(
        scheduler.run(unpartitioned).await,
        Err(Error::InvalidPartition { .. })
    ));

    let not_in_run = RunRequest::new([gold])
        .with_partitions(raw, PartitionSelection::keys(["2024-01"]).unwrap());
    assert!(matches!(
        scheduler.run(not_in_run).await,
        Err(Error::InvalidPartition { .. })
    ));
}

#[tokio::test]
async fn test_downstream_partition_missing_upstream_fails_planning() {
    let ctx = context();
    let raw = key("raw", "yellow_trips");
    let regional = key("silver", "regional");
    let graph = AssetGraph::builder()
        .asset(
            AssetDefinition::new(
                raw.clone(),
                TableTarget::new(ident(&raw), taxi_schema()).with_partition_spec(taxi_monthly_spec()),
                Arc::new(MonthlyTaxiExecutor::new(10)),
            )
            .with_partitions(q1_2024()),
        )
        .asset(
            AssetDefinition::new(
                regional.clone(),
                TableTarget::new(ident(&regional), taxi_schema()),
                Arc::new(CopyExecutor::new(raw.clone())),
            )
            .depends_on(raw)
            .with_partitions(PartitionsDefinition::static_keys(["2024-01", "2025-01"]).unwrap()),
        )
        .build()
        .unwrap();
    let scheduler = ctx.scheduler(graph);

    let result = scheduler.run(RunRequest::all(scheduler.graph())).await;
    match result {
        Err(Error::InvalidPartition { asset_key, message }) => {
            assert_eq!(asset_key, "silver.regional");
            assert!(message.contains("2025-01"), "{message}");
        }
        other => panic!("expected invalid partition, got {other:?}"),
    }
}

#[tokio::test]
async fn test_truncate_replaces_the_whole_table() {
    let ctx = context();
    let lookup = key("ref", "zones");
    let graph = AssetGraph::builder()
        .asset(AssetDefinition::new(
            lookup.clone(),
            TableTarget::new(ident(&lookup), distance_schema()),
            Arc::new(StaticExecutor::new(distance_rows(&[1, 2, 3])).with_write_mode(WriteMode::Truncate)),
        ))
        .build()
        .unwrap();
    let scheduler = ctx.scheduler(graph);

    for _ in 0..3 {
        let report = scheduler.run(RunRequest::all(scheduler.graph())).await.unwrap();
        assert_run_succeeded(&report);
    }

    let summary = ctx.store.table_summary(&ident(&lookup)).await.unwrap();
    assert_eq!(summary.live_rows, 3);
    assert_eq!(summary.snapshot_count, 4);
    let snapshots = ctx.store.list_snapshots(&ident(&lookup)).await.unwrap();
    assert!(snapshots[1..].iter().all(|s| s.operation == OperationKind::Overwrite));
}

#[tokio::test]
async fn test_replace_partitions_on_unpartitioned_table_replaces_everything() {
    let ctx = context();
    let lookup = key("ref", "vendors");
    let executor = Arc::new(
        StaticExecutor::new(distance_rows(&[7, 8])).with_write_mode(WriteMode::ReplacePartitions),
    );
    let graph = AssetGraph::builder()
        .asset(AssetDefinition::new(
            lookup.clone(),
            TableTarget::new(ident(&lookup), distance_schema()),
            executor.clone(),
        ))
        .build()
        .unwrap();
    let scheduler = ctx.scheduler(graph);

    scheduler.run(RunRequest::all(scheduler.graph())).await.unwrap();
    scheduler.run(RunRequest::all(scheduler.graph())).await.unwrap();
    assert_eq!(executor.calls(), 2);

    let summary = ctx.store.table_summary(&ident(&lookup)).await.unwrap();
    assert_eq!(summary.live_rows, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_monthly_backfill_commits_every_month_with_default_config() {
    let ctx = TestContext::with_storage(
        StrataConfig::default(),
        TracingMemoryBackend::with_latency(Duration::from_millis(2)),
    );
    let raw = key("raw", "yellow_trips");
    let year = PartitionsDefinition::monthly(
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(2024, 12, 1).unwrap(),
    )
    .unwrap();
    let graph = AssetGraph::builder()
        .asset(
            AssetDefinition::new(
                raw.clone(),
                TableTarget::new(ident(&raw), taxi_schema()).with_partition_spec(taxi_monthly_spec()),
                Arc::new(MonthlyTaxiExecutor::new(20)),
            )
            .with_partitions(year),
        )
        .build()
        .unwrap();
    let scheduler = ctx.scheduler(graph);

    let report = scheduler.run(RunRequest::all(scheduler.graph())).await.unwrap();
    assert_run_succeeded(&report);
    assert_eq!(report.units.len(), 12);
    for unit in report.units_of(&raw) {
        assert_eq!(unit.commit_attempts, 1, "{} had to rebase", unit.key);
        assert!(unit.snapshot_id.is_some());
    }

    let summary = ctx.store.table_summary(&ident(&raw)).await.unwrap();
    assert_eq!(summary.live_rows, 12 * 20);
    assert_eq!(summary.snapshot_count, 13);
}

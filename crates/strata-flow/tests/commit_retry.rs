//! Integration tests for commit conflicts, rebase-and-retry and ledger
//! failures.

use std::sync::Arc;

use strata_core::StrataConfig;
use strata_flow::prelude::*;
use strata_table::prelude::*;
use strata_test_utils::{
    StaticExecutor, TestContext, assert_run_failed, assert_run_succeeded, distance_rows,
    distance_schema,
};

fn single_asset() -> (AssetKey, TableIdent, AssetGraph) {
    let key = AssetKey::new("raw", "trips");
    let ident = TableIdent::new("raw", "trips").unwrap();
    let graph = AssetGraph::builder()
        .asset(AssetDefinition::new(
            key.clone(),
            TableTarget::new(ident.clone(), distance_schema()),
            Arc::new(StaticExecutor::new(distance_rows(&[3, 10, 27]))),
        ))
        .build()
        .unwrap();
    (key, ident, graph)
}

fn context(max_attempts: u32) -> TestContext {
    TestContext::with_config(StrataConfig {
        commit_max_attempts: max_attempts,
        ..StrataConfig::default()
    })
}

#[tokio::test]
async fn test_lost_swaps_are_retried() {
    let ctx = context(3);
    let (key, ident, graph) = single_asset();
    let scheduler = ctx.scheduler(graph);

    ctx.catalog.refuse_next(2);
    let report = scheduler.run(RunRequest::all(scheduler.graph())).await.unwrap();
    assert_run_succeeded(&report);

    let unit = report.unit(&key, None).unwrap();
    assert_eq!(unit.commit_attempts, 3);
    assert_eq!(ctx.catalog.swap_attempts(), 3);

    // Retries reuse the written files: one commit, three rows.
    let summary = ctx.store.table_summary(&ident).await.unwrap();
    assert_eq!(summary.snapshot_count, 2);
    assert_eq!(summary.live_rows, 3);
    assert_eq!(unit.snapshot_id, Some(summary.current_snapshot_id));
}

#[tokio::test]
async fn test_exhausted_retries_fail_the_unit() {
    let ctx = context(3);
    let (key, ident, graph) = single_asset();
    let scheduler = ctx.scheduler(graph);

    ctx.catalog.refuse_next(10);
    let report = scheduler.run(RunRequest::all(scheduler.graph())).await.unwrap();
    assert_run_failed(&report);

    let unit = report.unit(&key, None).unwrap();
    assert_eq!(unit.state, UnitState::Failed);
    assert_eq!(unit.reason, Some(TransitionReason::CommitRetriesExhausted));
    assert_eq!(unit.commit_attempts, 3);
    assert_eq!(unit.snapshot_id, None);
    assert!(unit.error.as_deref().unwrap().contains("3 attempts"));

    let summary = ctx.store.table_summary(&ident).await.unwrap();
    assert_eq!(summary.current_snapshot_id, SnapshotId::ROOT);
    assert_eq!(summary.live_rows, 0);

    // Nothing was recorded for the failed unit.
    assert!(scheduler.ledger().latest(&key, None).await.unwrap().is_none());
}

#[tokio::test]
async fn test_zero_max_attempts_still_tries_once() {
    let ctx = context(0);
    let (key, _, graph) = single_asset();
    let scheduler = ctx.scheduler(graph);

    let report = scheduler.run(RunRequest::all(scheduler.graph())).await.unwrap();
    assert_run_succeeded(&report);
    assert_eq!(report.unit(&key, None).unwrap().commit_attempts, 1);
}

#[tokio::test]
async fn test_ledger_failure_fails_the_unit_after_commit() {
    let ctx = context(3);
    let (key, ident, graph) = single_asset();
    let scheduler = ctx.scheduler(graph);

    ctx.storage
        .inject_failure(format!("{}/materializations/", ctx.config.flow_prefix));
    let report = scheduler.run(RunRequest::all(scheduler.graph())).await.unwrap();
    assert_run_failed(&report);

    // The commit is visible and reported even though recording it failed.
    let unit = report.unit(&key, None).unwrap();
    assert_eq!(unit.state, UnitState::Failed);
    let summary = ctx.store.table_summary(&ident).await.unwrap();
    assert_eq!(unit.snapshot_id, Some(summary.current_snapshot_id));
    assert_eq!(summary.live_rows, 3);
}

//! Integration tests for the commit protocol: snapshot lineage, write-once
//! objects, removals and time travel.

use strata_core::storage::{StorageBackend, WritePrecondition};
use strata_table::prelude::*;
use strata_test_utils::{
    StorageOp, TestContext, distance_rows, distance_schema, init_test_logging, taxi_monthly_spec,
    taxi_rows, taxi_schema,
};

const JAN_2024: i64 = 1_704_067_200_000_000;
const FEB_2024: i64 = 1_706_745_600_000_000;

fn trips() -> TableIdent {
    TableIdent::new("raw", "trips").unwrap()
}

async fn append(ctx: &TestContext, ident: &TableIdent, distances: &[i64]) -> Snapshot {
    let table = ctx.store.load_table(ident).await.unwrap();
    let files = ctx
        .store
        .writer(&table.metadata)
        .write(distance_rows(distances))
        .await
        .unwrap();
    ctx.store
        .commit(ident, table.current_snapshot_id(), Operation::Append { files })
        .await
        .unwrap()
}

fn distances(rows: &[Row]) -> Vec<i64> {
    let mut out: Vec<i64> = rows
        .iter()
        .map(|row| match row[0] {
            Value::Long(v) => v,
            ref other => panic!("unexpected value {other:?}"),
        })
        .collect();
    out.sort_unstable();
    out
}

#[tokio::test]
async fn test_create_table_starts_at_root_snapshot() {
    init_test_logging();
    let ctx = TestContext::new();
    let ident = trips();

    let metadata = ctx
        .store
        .create_table(&ident, distance_schema(), PartitionSpec::unpartitioned())
        .await
        .unwrap();
    assert_eq!(metadata.current_snapshot_id, SnapshotId::ROOT);

    let reader = ctx.store.open(&ident, SnapshotSelector::Latest).await.unwrap();
    assert!(reader.read_all().await.unwrap().is_empty());
    assert!(reader.snapshot().is_root());

    let again = ctx
        .store
        .create_table(&ident, distance_schema(), PartitionSpec::unpartitioned())
        .await;
    assert!(matches!(again, Err(TableError::AlreadyExists { .. })));
}

#[tokio::test]
async fn test_appends_build_a_linear_lineage() {
    let ctx = TestContext::new();
    let ident = trips();
    ctx.store
        .create_table(&ident, distance_schema(), PartitionSpec::unpartitioned())
        .await
        .unwrap();

    let first = append(&ctx, &ident, &[3, 10, 27]).await;
    let second = append(&ctx, &ident, &[1, 40]).await;

    assert_eq!(first.parent_snapshot_id, Some(SnapshotId::ROOT));
    assert_eq!(second.parent_snapshot_id, Some(first.snapshot_id));
    assert!(second.sequence_number > first.sequence_number);
    assert_eq!(second.summary.total_rows, 5);
    assert_eq!(second.summary.total_files, 2);

    let snapshots = ctx.store.list_snapshots(&ident).await.unwrap();
    let ids: Vec<SnapshotId> = snapshots.iter().map(|s| s.snapshot_id).collect();
    assert_eq!(ids, vec![SnapshotId::ROOT, first.snapshot_id, second.snapshot_id]);

    let reader = ctx.store.open(&ident, SnapshotSelector::Latest).await.unwrap();
    let ancestry = reader.ancestry().unwrap();
    assert_eq!(ancestry.len(), 3);
    assert_eq!(distances(&reader.read_all().await.unwrap()), vec![1, 3, 10, 27, 40]);

    let summary = ctx.store.table_summary(&ident).await.unwrap();
    assert_eq!(summary.current_snapshot_id, second.snapshot_id);
    assert_eq!(summary.snapshot_count, 3);
    assert_eq!(summary.live_rows, 5);
}

#[tokio::test]
async fn test_only_the_catalog_pointer_is_overwritten() {
    let ctx = TestContext::new();
    let ident = trips();
    ctx.store
        .create_table(&ident, distance_schema(), PartitionSpec::unpartitioned())
        .await
        .unwrap();
    append(&ctx, &ident, &[1, 2]).await;
    append(&ctx, &ident, &[3]).await;

    let pointer_prefix = format!("{}/tables/", ctx.config.catalog_prefix);
    for op in ctx.storage.operations() {
        if let StorageOp::Put { path, precondition, .. } = op {
            if path.starts_with(&pointer_prefix) {
                assert_ne!(precondition, WritePrecondition::None, "unguarded pointer write");
            } else {
                assert_eq!(
                    precondition,
                    WritePrecondition::DoesNotExist,
                    "{path} was not written once"
                );
            }
        }
    }
}

#[tokio::test]
async fn test_time_travel_is_stable_across_later_commits() {
    let ctx = TestContext::new();
    let ident = trips();
    ctx.store
        .create_table(&ident, distance_schema(), PartitionSpec::unpartitioned())
        .await
        .unwrap();
    let first = append(&ctx, &ident, &[3, 10, 27]).await;

    let pinned = ctx
        .store
        .open(&ident, SnapshotSelector::Id(first.snapshot_id))
        .await
        .unwrap();
    let before = pinned.read_all().await.unwrap();
    let objects_before: Vec<(String, Option<bytes::Bytes>)> = ctx
        .storage
        .paths_with_prefix(&format!("{}/raw/trips/", ctx.config.warehouse))
        .into_iter()
        .map(|p| {
            let bytes = ctx.storage.bytes(&p);
            (p, bytes)
        })
        .collect();

    append(&ctx, &ident, &[1, 40]).await;
    let table = ctx.store.load_table(&ident).await.unwrap();
    ctx.store
        .commit(
            &ident,
            table.current_snapshot_id(),
            Operation::Delete {
                remove: RemoveSpec::All,
            },
        )
        .await
        .unwrap();

    assert_eq!(pinned.read_all().await.unwrap(), before);
    let reopened = ctx
        .store
        .open(&ident, SnapshotSelector::Id(first.snapshot_id))
        .await
        .unwrap();
    assert_eq!(reopened.read_all().await.unwrap(), before);
    for (path, bytes) in objects_before {
        assert_eq!(ctx.storage.bytes(&path), bytes, "{path} changed");
    }

    let latest = ctx.store.open(&ident, SnapshotSelector::Latest).await.unwrap();
    assert!(latest.read_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_snapshot_is_not_found() {
    let ctx = TestContext::new();
    let ident = trips();
    ctx.store
        .create_table(&ident, distance_schema(), PartitionSpec::unpartitioned())
        .await
        .unwrap();

    let result = ctx
        .store
        .open(&ident, SnapshotSelector::Id(SnapshotId::new(42)))
        .await;
    assert!(result.is_err_and(|e| e.is_not_found()));
}

#[tokio::test]
async fn test_stale_base_is_a_conflict() {
    let ctx = TestContext::new();
    let ident = trips();
    let metadata = ctx
        .store
        .create_table(&ident, distance_schema(), PartitionSpec::unpartitioned())
        .await
        .unwrap();
    let head = append(&ctx, &ident, &[1]).await;

    let files = ctx
        .store
        .writer(&metadata)
        .write(distance_rows(&[2]))
        .await
        .unwrap();
    let err = ctx
        .store
        .commit(&ident, SnapshotId::ROOT, Operation::Append { files })
        .await
        .unwrap_err();
    match err {
        TableError::Conflict {
            base_snapshot_id,
            current_snapshot_id,
            ..
        } => {
            assert_eq!(base_snapshot_id, SnapshotId::ROOT);
            assert_eq!(current_snapshot_id, head.snapshot_id);
        }
        other => panic!("expected conflict, got {other:?}"),
    }
}

#[tokio::test]
async fn test_empty_append_is_rejected() {
    let ctx = TestContext::new();
    let ident = trips();
    ctx.store
        .create_table(&ident, distance_schema(), PartitionSpec::unpartitioned())
        .await
        .unwrap();

    let result = ctx
        .store
        .commit(&ident, SnapshotId::ROOT, Operation::Append { files: vec![] })
        .await;
    assert!(matches!(result, Err(TableError::InvalidInput { .. })));
}

#[tokio::test]
async fn test_recommitting_a_file_is_rejected() {
    let ctx = TestContext::new();
    let ident = trips();
    let metadata = ctx
        .store
        .create_table(&ident, distance_schema(), PartitionSpec::unpartitioned())
        .await
        .unwrap();
    let files = ctx
        .store
        .writer(&metadata)
        .write(distance_rows(&[5]))
        .await
        .unwrap();
    let first = ctx
        .store
        .commit(&ident, SnapshotId::ROOT, Operation::Append { files: files.clone() })
        .await
        .unwrap();

    let result = ctx
        .store
        .commit(&ident, first.snapshot_id, Operation::Append { files })
        .await;
    assert!(matches!(result, Err(TableError::InvalidInput { .. })));
}

#[tokio::test]
async fn test_overwrite_removes_named_files_atomically() {
    let ctx = TestContext::new();
    let ident = trips();
    ctx.store
        .create_table(&ident, distance_schema(), PartitionSpec::unpartitioned())
        .await
        .unwrap();
    append(&ctx, &ident, &[3, 10, 27]).await;
    let head = append(&ctx, &ident, &[1, 40]).await;

    let reader = ctx.store.open(&ident, SnapshotSelector::Latest).await.unwrap();
    let live = reader.live_files().await.unwrap();
    let small = live
        .iter()
        .find(|f| f.record_count == 2)
        .map(|f| f.path.clone())
        .unwrap();

    let table = ctx.store.load_table(&ident).await.unwrap();
    let replacement = ctx
        .store
        .writer(&table.metadata)
        .write(distance_rows(&[100]))
        .await
        .unwrap();
    let snapshot = ctx
        .store
        .commit(
            &ident,
            head.snapshot_id,
            Operation::Overwrite {
                remove: RemoveSpec::Files(vec![small.clone()]),
                files: replacement,
            },
        )
        .await
        .unwrap();
    assert_eq!(snapshot.operation, OperationKind::Overwrite);
    assert_eq!(snapshot.summary.removed_files, 1);
    assert_eq!(snapshot.summary.total_rows, 4);

    let latest = ctx.store.open(&ident, SnapshotSelector::Latest).await.unwrap();
    assert_eq!(distances(&latest.read_all().await.unwrap()), vec![3, 10, 27, 100]);

    // The removed file is no longer live, so naming it again fails.
    let again = ctx
        .store
        .commit(
            &ident,
            snapshot.snapshot_id,
            Operation::Delete {
                remove: RemoveSpec::Files(vec![small]),
            },
        )
        .await;
    assert!(again.is_err_and(|e| e.is_not_found()));
}

#[tokio::test]
async fn test_partitioned_writes_split_files_by_month() {
    let ctx = TestContext::new();
    let ident = TableIdent::new("raw", "yellow_trips").unwrap();
    let metadata = ctx
        .store
        .create_table(&ident, taxi_schema(), taxi_monthly_spec())
        .await
        .unwrap();

    let mut rows = taxi_rows(JAN_2024, 30);
    rows.extend(taxi_rows(FEB_2024, 20));
    let files = ctx.store.writer(&metadata).write(rows).await.unwrap();
    assert_eq!(files.len(), 2);
    assert_eq!(files[0].record_count, 30);
    assert_eq!(files[1].record_count, 20);
    assert_ne!(files[0].partition, files[1].partition);

    let snapshot = ctx
        .store
        .commit(&ident, SnapshotId::ROOT, Operation::Append { files: files.clone() })
        .await
        .unwrap();

    let replacement = ctx
        .store
        .writer(&metadata)
        .write(taxi_rows(FEB_2024, 5))
        .await
        .unwrap();
    let replaced = ctx
        .store
        .commit(
            &ident,
            snapshot.snapshot_id,
            Operation::Overwrite {
                remove: RemoveSpec::Partitions(vec![files[1].partition.clone()]),
                files: replacement,
            },
        )
        .await
        .unwrap();
    assert_eq!(replaced.summary.total_rows, 35);

    let reader = ctx.store.open(&ident, SnapshotSelector::Latest).await.unwrap();
    let plan = reader
        .plan_scan(&col("tpep_pickup_datetime").gt_eq(Value::Timestamp(FEB_2024)))
        .await
        .unwrap();
    assert_eq!(plan.files.len(), 1);
    assert_eq!(plan.planned_rows(), 5);
}

#[tokio::test]
async fn test_rows_must_match_the_schema() {
    let ctx = TestContext::new();
    let ident = trips();
    let metadata = ctx
        .store
        .create_table(&ident, distance_schema(), PartitionSpec::unpartitioned())
        .await
        .unwrap();

    let result = ctx
        .store
        .writer(&metadata)
        .write(vec![vec![Value::String("far".into())]])
        .await;
    assert!(matches!(result, Err(TableError::SchemaMismatch { .. })));

    let result = ctx
        .store
        .writer(&metadata)
        .write(vec![vec![Value::Null]])
        .await;
    assert!(matches!(result, Err(TableError::SchemaMismatch { .. })));
}

#[tokio::test]
async fn test_corrupted_data_file_is_detected() {
    let ctx = TestContext::new();
    let ident = trips();
    ctx.store
        .create_table(&ident, distance_schema(), PartitionSpec::unpartitioned())
        .await
        .unwrap();
    append(&ctx, &ident, &[7]).await;

    let reader = ctx.store.open(&ident, SnapshotSelector::Latest).await.unwrap();
    let file = reader.live_files().await.unwrap().remove(0);
    ctx.storage
        .put(
            &file.path,
            bytes::Bytes::from_static(b"{\"tampered\":true}"),
            WritePrecondition::None,
        )
        .await
        .unwrap();

    let result = reader.read_all().await;
    assert!(matches!(result, Err(TableError::Serialization { .. })));
}

#[tokio::test]
async fn test_compaction_keeps_live_data() {
    let ctx = TestContext::new();
    let ident = trips();
    ctx.store
        .create_table(&ident, distance_schema(), PartitionSpec::unpartitioned())
        .await
        .unwrap();
    append(&ctx, &ident, &[1]).await;
    append(&ctx, &ident, &[2]).await;
    let head = append(&ctx, &ident, &[3]).await;

    let before = ctx.store.open(&ident, SnapshotSelector::Latest).await.unwrap();
    let rows_before = distances(&before.read_all().await.unwrap());

    let compacted = ctx
        .store
        .compact_manifests(&ident, head.snapshot_id)
        .await
        .unwrap();
    assert_eq!(compacted.operation, OperationKind::Replace);
    assert_eq!(compacted.summary.total_rows, head.summary.total_rows);

    let after = ctx.store.open(&ident, SnapshotSelector::Latest).await.unwrap();
    assert_eq!(distances(&after.read_all().await.unwrap()), rows_before);
    let plan = after.plan_scan(&col("distance").gt(0)).await.unwrap();
    assert_eq!(plan.manifests_scanned + plan.manifests_skipped, 1);
}

#[tokio::test]
async fn test_create_if_not_exists_and_drop() {
    let ctx = TestContext::new();
    let ident = trips();
    let other = TableIdent::new("silver", "trips").unwrap();

    let first = ctx
        .store
        .create_table_if_not_exists(&ident, distance_schema(), PartitionSpec::unpartitioned())
        .await
        .unwrap();
    let second = ctx
        .store
        .create_table_if_not_exists(&ident, distance_schema(), PartitionSpec::unpartitioned())
        .await
        .unwrap();
    assert_eq!(first.table_uuid, second.table_uuid);

    let mismatch = ctx
        .store
        .create_table_if_not_exists(&ident, taxi_schema(), PartitionSpec::unpartitioned())
        .await;
    assert!(matches!(mismatch, Err(TableError::SchemaMismatch { .. })));

    ctx.store
        .create_table(&other, distance_schema(), PartitionSpec::unpartitioned())
        .await
        .unwrap();
    assert_eq!(
        ctx.store.list_tables(None).await.unwrap(),
        vec![ident.clone(), other.clone()]
    );
    assert_eq!(ctx.store.list_tables(Some("silver")).await.unwrap(), vec![other]);

    ctx.store.drop_table(&ident).await.unwrap();
    assert!(ctx.store.load_table(&ident).await.is_err_and(|e| e.is_not_found()));
    assert!(ctx.store.drop_table(&ident).await.is_err_and(|e| e.is_not_found()));
}

//! Custom assertion helpers for integration tests.

use strata_flow::{AssetGraph, AssetKey, PartitionKey, RunReport, RunState, UnitState};

use crate::storage::StorageOp;

/// Asserts that a run completed successfully.
///
/// # Panics
///
/// Panics if the run did not succeed or has failed units.
pub fn assert_run_succeeded(report: &RunReport) {
    assert_eq!(
        report.state,
        RunState::Succeeded,
        "Expected run to succeed, but state was {:?}: {:#?}",
        report.state,
        report.units
    );
    assert_eq!(
        report.count(UnitState::Failed),
        0,
        "Expected no failed units, but {} failed",
        report.count(UnitState::Failed)
    );
}

/// Asserts that a run failed.
///
/// # Panics
///
/// Panics if the run did not fail.
pub fn assert_run_failed(report: &RunReport) {
    assert_eq!(
        report.state,
        RunState::Failed,
        "Expected run to fail, but state was {:?}",
        report.state
    );
    assert!(
        report.count(UnitState::Failed) > 0,
        "Expected at least one failed unit"
    );
}

/// Asserts that all units in a run are in terminal states.
///
/// # Panics
///
/// Panics if any unit is not in a terminal state.
pub fn assert_all_units_terminal(report: &RunReport) {
    for unit in &report.units {
        assert!(
            unit.state.is_terminal(),
            "Unit {} is not terminal (state: {:?})",
            unit.key,
            unit.state
        );
    }
}

/// Asserts the state of one unit.
///
/// # Panics
///
/// Panics if the unit is missing from the report or in another state.
pub fn assert_unit_state(
    report: &RunReport,
    asset: &AssetKey,
    partition: Option<&str>,
    expected: UnitState,
) {
    let partition = partition.map(|p| PartitionKey::new(p).expect("valid partition key"));
    let unit = report
        .unit(asset, partition.as_ref())
        .unwrap_or_else(|| panic!("unit {asset} {partition:?} not in report"));
    assert_eq!(
        unit.state, expected,
        "Unit {} expected {expected:?}, was {:?} ({:?})",
        unit.key, unit.state, unit.error
    );
}

/// Asserts that units started only after their upstream units completed.
///
/// # Panics
///
/// Panics if any unit started before an upstream unit it depends on
/// completed.
pub fn assert_topological_order(report: &RunReport, graph: &AssetGraph) {
    for unit in &report.units {
        let Some(started) = unit.started_at else {
            continue;
        };
        let definition = graph.require(&unit.key.asset).expect("asset in graph");
        for upstream in &definition.upstream {
            for dep in report.units_of(upstream) {
                let mapped = match (&unit.key.partition, &dep.key.partition) {
                    (Some(own), Some(theirs)) => own == theirs,
                    _ => true,
                };
                if !mapped {
                    continue;
                }
                if let Some(dep_completed) = dep.completed_at {
                    assert!(
                        dep_completed <= started,
                        "Unit {} started before upstream {} completed",
                        unit.key,
                        dep.key
                    );
                }
            }
        }
    }
}

/// Asserts that storage operations contain expected patterns.
///
/// # Panics
///
/// Panics if expected operations are not found.
pub fn assert_storage_ops_contain(ops: &[StorageOp], expected: &[(&str, &str)]) {
    for (op_type, path_prefix) in expected {
        let found = ops
            .iter()
            .any(|op| op.kind() == *op_type && op.path().starts_with(path_prefix));
        assert!(
            found,
            "Expected {op_type} operation on path starting with '{path_prefix}', not found in {ops:?}",
        );
    }
}

/// Asserts that no storage operations accessed a given path prefix.
///
/// # Panics
///
/// Panics if any operation accessed the given prefix.
pub fn assert_storage_ops_exclude(ops: &[StorageOp], forbidden_prefix: &str) {
    for op in ops {
        assert!(
            !op.path().starts_with(forbidden_prefix),
            "Operation on forbidden path: {} (prefix: {forbidden_prefix})",
            op.path()
        );
    }
}

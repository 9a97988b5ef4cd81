//! Table store metrics.
//!
//! Metrics go through the `metrics` crate facade; install any recorder to
//! export them.
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `strata_table_commits_total` | Counter | `operation`, `result` | Commit attempts by outcome |
//! | `strata_table_scan_files_total` | Counter | `decision` | Files planned or pruned |
//! | `strata_table_scan_manifests_total` | Counter | `decision` | Manifests read or pruned |

use metrics::counter;

/// Metric names.
pub mod names {
    /// Counter: commit attempts by outcome.
    pub const COMMITS_TOTAL: &str = "strata_table_commits_total";
    /// Counter: data files considered by the planner.
    pub const SCAN_FILES_TOTAL: &str = "strata_table_scan_files_total";
    /// Counter: manifests considered by the planner.
    pub const SCAN_MANIFESTS_TOTAL: &str = "strata_table_scan_manifests_total";
}

/// Label keys.
pub mod labels {
    /// Operation kind (append, overwrite, delete, replace).
    pub const OPERATION: &str = "operation";
    /// Commit outcome (committed, conflict, error).
    pub const RESULT: &str = "result";
    /// Planner decision (scanned, skipped).
    pub const DECISION: &str = "decision";
}

/// Records table store metrics.
#[derive(Debug, Clone, Default)]
pub struct TableMetrics;

impl TableMetrics {
    /// Creates a metrics recorder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Records one commit attempt.
    pub fn record_commit(&self, operation: &str, result: &'static str) {
        counter!(
            names::COMMITS_TOTAL,
            labels::OPERATION => operation.to_string(),
            labels::RESULT => result,
        )
        .increment(1);
    }

    /// Records planner file decisions.
    pub fn record_scan_files(&self, scanned: usize, skipped: usize) {
        counter!(names::SCAN_FILES_TOTAL, labels::DECISION => "scanned").increment(scanned as u64);
        counter!(names::SCAN_FILES_TOTAL, labels::DECISION => "skipped").increment(skipped as u64);
    }

    /// Records planner manifest decisions.
    pub fn record_scan_manifests(&self, scanned: usize, skipped: usize) {
        counter!(names::SCAN_MANIFESTS_TOTAL, labels::DECISION => "scanned")
            .increment(scanned as u64);
        counter!(names::SCAN_MANIFESTS_TOTAL, labels::DECISION => "skipped")
            .increment(skipped as u64);
    }
}

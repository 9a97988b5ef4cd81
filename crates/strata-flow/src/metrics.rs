//! Scheduler metrics.
//!
//! Metrics go through the `metrics` crate facade; install any recorder to
//! export them.
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `strata_flow_runs_total` | Counter | `state` | Runs by final state |
//! | `strata_flow_units_total` | Counter | `state` | Units by terminal state |
//! | `strata_flow_unit_duration_seconds` | Histogram | - | Wall time of units that ran |
//! | `strata_flow_commit_retries_total` | Counter | - | Commits resubmitted after a conflict |
//! | `strata_flow_stale_upstream_total` | Counter | - | Units run against a never-materialized upstream |
//!
//! ## Usage
//!
//! ```rust
//! use strata_flow::metrics::{FlowMetrics, TimingGuard};
//!
//! let metrics = FlowMetrics::new();
//! {
//!     let _guard = TimingGuard::new(|duration| {
//!         metrics.observe_unit_duration(duration.as_secs_f64());
//!     });
//! }
//! metrics.record_unit("succeeded");
//! ```

use std::time::{Duration, Instant};

use metrics::{counter, histogram};

/// Metric names.
pub mod names {
    /// Counter: runs by final state.
    pub const RUNS_TOTAL: &str = "strata_flow_runs_total";
    /// Counter: units by terminal state.
    pub const UNITS_TOTAL: &str = "strata_flow_units_total";
    /// Histogram: unit wall time in seconds.
    pub const UNIT_DURATION_SECONDS: &str = "strata_flow_unit_duration_seconds";
    /// Counter: commits resubmitted after a conflict.
    pub const COMMIT_RETRIES_TOTAL: &str = "strata_flow_commit_retries_total";
    /// Counter: units that ran against a never-materialized upstream.
    pub const STALE_UPSTREAM_TOTAL: &str = "strata_flow_stale_upstream_total";
}

/// Label keys.
pub mod labels {
    /// Run or unit state (succeeded, failed, skipped, cancelled).
    pub const STATE: &str = "state";
}

/// Records scheduler metrics. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct FlowMetrics;

impl FlowMetrics {
    /// Creates a metrics recorder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Records a finished run.
    pub fn record_run(&self, state: &'static str) {
        counter!(names::RUNS_TOTAL, labels::STATE => state).increment(1);
    }

    /// Records a unit reaching a terminal state.
    pub fn record_unit(&self, state: &'static str) {
        counter!(names::UNITS_TOTAL, labels::STATE => state).increment(1);
    }

    /// Records how long a unit ran.
    pub fn observe_unit_duration(&self, seconds: f64) {
        histogram!(names::UNIT_DURATION_SECONDS).record(seconds);
    }

    /// Records one commit resubmission.
    pub fn record_commit_retry(&self) {
        counter!(names::COMMIT_RETRIES_TOTAL).increment(1);
    }

    /// Records one stale upstream warning.
    pub fn record_stale_upstream(&self) {
        counter!(names::STALE_UPSTREAM_TOTAL).increment(1);
    }
}

/// Calls a closure with the elapsed time when dropped.
pub struct TimingGuard<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> TimingGuard<F>
where
    F: FnOnce(Duration),
{
    /// Creates a guard that calls `on_drop` with the elapsed duration.
    pub fn new(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }

    /// Returns the time elapsed since the guard was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl<F> Drop for TimingGuard<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}

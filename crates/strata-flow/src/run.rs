//! Run and unit tracking.
//!
//! A run materializes a set of units, one per (asset, partition). Every
//! unit starts `Pending` and ends in exactly one terminal state:
//!
//! ```text
//! ┌─────────┐  started   ┌─────────┐  committed   ┌───────────┐
//! │ PENDING │───────────►│ RUNNING │─────────────►│ SUCCEEDED │
//! └─────────┘            └─────────┘              └───────────┘
//!      │                      │
//!  upstream failed        executor or
//!  or run cancelled       commit failed
//!      │                      │
//!      ▼                      ▼
//! ┌─────────┐            ┌─────────┐
//! │ SKIPPED │            │ FAILED  │
//! └─────────┘            └─────────┘
//! ```

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use strata_core::RunId;
use strata_table::SnapshotId;

use crate::asset::AssetKey;
use crate::error::{Error, Result};
use crate::partition::PartitionKey;

/// Unit state machine states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitState {
    /// Waiting on upstream units or a concurrency slot.
    #[default]
    Pending,
    /// Executing or committing.
    Running,
    /// Committed (or had nothing to commit) and recorded.
    Succeeded,
    /// The executor, the write or the commit failed.
    Failed,
    /// Never started: an upstream did not succeed or the run was cancelled.
    Skipped,
}

impl UnitState {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    /// Returns true if the transition from self to target is valid.
    #[must_use]
    pub const fn can_transition_to(&self, target: Self) -> bool {
        match self {
            Self::Pending => matches!(target, Self::Running | Self::Skipped),
            Self::Running => matches!(target, Self::Succeeded | Self::Failed),
            Self::Succeeded | Self::Failed | Self::Skipped => false,
        }
    }

    /// Returns a lowercase label suitable for metrics and logs.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Succeeded => write!(f, "SUCCEEDED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Skipped => write!(f, "SKIPPED"),
        }
    }
}

/// Reason for a unit state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    /// Upstreams finished and a concurrency slot was acquired.
    ExecutionStarted,
    /// Rows written, committed and recorded.
    ExecutionSucceeded,
    /// The executor, a data file write or the commit failed.
    ExecutionFailed,
    /// Every commit attempt lost to a concurrent writer.
    CommitRetriesExhausted,
    /// An upstream unit did not succeed.
    UpstreamFailed,
    /// The run was cancelled before the unit started.
    RunCancelled,
}

impl fmt::Display for TransitionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExecutionStarted => write!(f, "execution_started"),
            Self::ExecutionSucceeded => write!(f, "execution_succeeded"),
            Self::ExecutionFailed => write!(f, "execution_failed"),
            Self::CommitRetriesExhausted => write!(f, "commit_retries_exhausted"),
            Self::UpstreamFailed => write!(f, "upstream_failed"),
            Self::RunCancelled => write!(f, "run_cancelled"),
        }
    }
}

/// Identity of one unit: an asset and, if partitioned, one partition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnitKey {
    /// Asset.
    pub asset: AssetKey,
    /// Partition (`None` for unpartitioned assets).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<PartitionKey>,
}

impl UnitKey {
    /// Creates a unit key.
    #[must_use]
    pub const fn new(asset: AssetKey, partition: Option<PartitionKey>) -> Self {
        Self { asset, partition }
    }
}

impl fmt::Display for UnitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.partition {
            Some(partition) => write!(f, "{}[{partition}]", self.asset),
            None => write!(f, "{}", self.asset),
        }
    }
}

/// Advisory condition observed while running a unit. Never fails the unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UnitWarning {
    /// An upstream unit had never been materialized; the unit read the
    /// upstream table as it currently stands.
    StaleUpstream {
        /// Upstream asset.
        upstream: AssetKey,
        /// Upstream partition.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        partition: Option<PartitionKey>,
    },
}

impl fmt::Display for UnitWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StaleUpstream {
                upstream,
                partition: Some(partition),
            } => write!(f, "upstream {upstream}[{partition}] was never materialized"),
            Self::StaleUpstream {
                upstream,
                partition: None,
            } => write!(f, "upstream {upstream} was never materialized"),
        }
    }
}

/// Everything recorded about one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitOutcome {
    /// Unit identity.
    pub key: UnitKey,
    /// Current state.
    pub state: UnitState,
    /// Reason for the last transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<TransitionReason>,
    /// Snapshot committed, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<SnapshotId>,
    /// Commit attempts made.
    pub commit_attempts: u32,
    /// Advisory warnings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<UnitWarning>,
    /// Failure message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Rows written.
    pub rows_written: u64,
    /// Data files written.
    pub files_written: u64,
    /// When the unit started running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the unit reached a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Metadata returned by the executor.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl UnitOutcome {
    /// Creates a pending unit.
    #[must_use]
    pub const fn pending(key: UnitKey) -> Self {
        Self {
            key,
            state: UnitState::Pending,
            reason: None,
            snapshot_id: None,
            commit_attempts: 0,
            warnings: Vec::new(),
            error: None,
            rows_written: 0,
            files_written: 0,
            started_at: None,
            completed_at: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Moves the unit to `target`, stamping start or completion time.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidStateTransition` if the state machine does not
    /// allow the move.
    pub fn transition(&mut self, target: UnitState, reason: TransitionReason) -> Result<()> {
        if !self.state.can_transition_to(target) {
            return Err(Error::InvalidStateTransition {
                from: self.state.to_string(),
                to: target.to_string(),
                reason: format!("unit {} ({reason})", self.key),
            });
        }
        let now = Utc::now();
        if target == UnitState::Running {
            self.started_at = Some(now);
        }
        if target.is_terminal() {
            self.completed_at = Some(now);
        }
        self.state = target;
        self.reason = Some(reason);
        Ok(())
    }
}

/// Run state machine states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    /// Units are still pending or running.
    #[default]
    Running,
    /// Every unit succeeded.
    Succeeded,
    /// At least one unit failed or was skipped.
    Failed,
    /// Cancelled before every unit could start.
    Cancelled,
}

impl RunState {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Returns a lowercase label suitable for metrics and logs.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Derives the final state of a run from its units.
    #[must_use]
    pub fn from_units<'a>(units: impl IntoIterator<Item = &'a UnitOutcome>, cancelled: bool) -> Self {
        let mut all_succeeded = true;
        for unit in units {
            if !unit.state.is_terminal() {
                return Self::Running;
            }
            all_succeeded &= unit.state == UnitState::Succeeded;
        }
        if all_succeeded {
            Self::Succeeded
        } else if cancelled {
            Self::Cancelled
        } else {
            Self::Failed
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "RUNNING"),
            Self::Succeeded => write!(f, "SUCCEEDED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Snapshot of a run: its state and every unit, in execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Run identity.
    pub run_id: RunId,
    /// Run state.
    pub state: RunState,
    /// Units in topological order, partitions in definition order.
    pub units: Vec<UnitOutcome>,
    /// When the run was submitted.
    pub started_at: DateTime<Utc>,
    /// When the last unit finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunReport {
    /// Returns the outcome of one unit.
    #[must_use]
    pub fn unit(&self, asset: &AssetKey, partition: Option<&PartitionKey>) -> Option<&UnitOutcome> {
        self.units
            .iter()
            .find(|u| &u.key.asset == asset && u.key.partition.as_ref() == partition)
    }

    /// Returns every unit of one asset.
    pub fn units_of<'a>(&'a self, asset: &'a AssetKey) -> impl Iterator<Item = &'a UnitOutcome> + 'a {
        self.units.iter().filter(move |u| &u.key.asset == asset)
    }

    /// Returns how many units are in `state`.
    #[must_use]
    pub fn count(&self, state: UnitState) -> usize {
        self.units.iter().filter(|u| u.state == state).count()
    }

    /// Returns true if the run finished and every unit succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.state == RunState::Succeeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(name: &str) -> UnitOutcome {
        UnitOutcome::pending(UnitKey::new(AssetKey::new("raw", name), None))
    }

    #[test]
    fn unit_state_machine() {
        assert!(UnitState::Pending.can_transition_to(UnitState::Running));
        assert!(UnitState::Pending.can_transition_to(UnitState::Skipped));
        assert!(!UnitState::Pending.can_transition_to(UnitState::Succeeded));
        assert!(UnitState::Running.can_transition_to(UnitState::Failed));
        assert!(!UnitState::Running.can_transition_to(UnitState::Skipped));
        for terminal in [UnitState::Succeeded, UnitState::Failed, UnitState::Skipped] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(UnitState::Running));
        }
    }

    #[test]
    fn transition_stamps_times_and_rejects_invalid_moves() {
        let mut outcome = unit("trips");
        outcome
            .transition(UnitState::Running, TransitionReason::ExecutionStarted)
            .unwrap();
        assert!(outcome.started_at.is_some());
        assert!(outcome.completed_at.is_none());

        outcome
            .transition(UnitState::Succeeded, TransitionReason::ExecutionSucceeded)
            .unwrap();
        assert!(outcome.completed_at.is_some());
        assert_eq!(outcome.reason, Some(TransitionReason::ExecutionSucceeded));

        let err = outcome
            .transition(UnitState::Running, TransitionReason::ExecutionStarted)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition { .. }));
    }

    #[test]
    fn run_state_from_units() {
        let mut done = unit("a");
        done.state = UnitState::Succeeded;
        let mut skipped = unit("b");
        skipped.state = UnitState::Skipped;
        let pending = unit("c");

        assert_eq!(RunState::from_units([&done], false), RunState::Succeeded);
        assert_eq!(RunState::from_units([&done, &skipped], false), RunState::Failed);
        assert_eq!(RunState::from_units([&done, &skipped], true), RunState::Cancelled);
        assert_eq!(RunState::from_units([&done, &pending], false), RunState::Running);
        assert_eq!(RunState::from_units([], false), RunState::Succeeded);
    }

    #[test]
    fn reason_labels_are_snake_case() {
        assert_eq!(TransitionReason::RunCancelled.to_string(), "run_cancelled");
        assert_eq!(
            serde_json::to_string(&TransitionReason::UpstreamFailed).unwrap(),
            "\"upstream_failed\""
        );
    }

    #[test]
    fn unit_key_display() {
        let key = UnitKey::new(
            AssetKey::new("silver", "trips"),
            Some(PartitionKey::new("2024-01").unwrap()),
        );
        assert_eq!(key.to_string(), "silver.trips[2024-01]");
    }
}

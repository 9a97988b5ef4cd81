//! Error types for the scheduling domain.

use strata_core::RunId;
use strata_table::{SnapshotId, TableError, TableIdent};

/// The result type used throughout strata-flow.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building graphs and running assets.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A cycle was detected in the asset graph.
    #[error("cycle detected in asset graph: {}", cycle.join(" -> "))]
    CycleDetected {
        /// Asset keys along the cycle, first key repeated at the end.
        cycle: Vec<String>,
    },

    /// Two assets were declared with the same key.
    #[error("duplicate asset: {asset_key}")]
    DuplicateAsset {
        /// The repeated key.
        asset_key: String,
    },

    /// An asset declared an upstream that is not in the graph.
    #[error("dependency not found: {asset_key} depends on {dependency}")]
    DependencyNotFound {
        /// The declaring asset.
        asset_key: String,
        /// The missing upstream.
        dependency: String,
    },

    /// A selection named an asset that is not in the graph.
    #[error("asset not found: {asset_key}")]
    AssetNotFound {
        /// The unknown key.
        asset_key: String,
    },

    /// A DAG node was not found (internal graph operation error).
    #[error("DAG node not found: {node}")]
    DagNodeNotFound {
        /// The node identifier (index or value).
        node: String,
    },

    /// A partition request does not fit an asset's partitions definition.
    #[error("invalid partition for {asset_key}: {message}")]
    InvalidPartition {
        /// The asset the partition was requested for.
        asset_key: String,
        /// What is wrong with the request.
        message: String,
    },

    /// A run was not found.
    #[error("run not found: {run_id}")]
    RunNotFound {
        /// The run ID that was not found.
        run_id: RunId,
    },

    /// A run that has not finished was asked to be forgotten.
    #[error("run still in progress: {run_id}")]
    RunInProgress {
        /// The unfinished run.
        run_id: RunId,
    },

    /// An invalid unit state transition was attempted.
    #[error("invalid state transition: {from} -> {to} ({reason})")]
    InvalidStateTransition {
        /// The current state.
        from: String,
        /// The attempted target state.
        to: String,
        /// The reason the transition is invalid.
        reason: String,
    },

    /// An asset executor failed.
    #[error("executor failed: {message}")]
    ExecutorFailure {
        /// Description of the failure.
        message: String,
    },

    /// Every commit attempt for a unit lost its compare-and-swap.
    #[error("commit to {table} failed after {attempts} attempts (table is at snapshot {current_snapshot_id})")]
    CommitRetriesExhausted {
        /// Target table.
        table: TableIdent,
        /// Attempts made.
        attempts: u32,
        /// Snapshot the table was at on the last conflict.
        current_snapshot_id: SnapshotId,
    },

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// An error from the table store.
    #[error("table error: {0}")]
    Table(#[from] TableError),

    /// An error from strata-core.
    #[error("core error: {0}")]
    Core(#[from] strata_core::Error),
}

impl Error {
    /// Creates an executor failure.
    #[must_use]
    pub fn executor(message: impl Into<String>) -> Self {
        Self::ExecutorFailure {
            message: message.into(),
        }
    }

    /// Creates a new storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Returns true if this wraps a table commit conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Table(e) if e.is_conflict())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn cycle_error_display() {
        let err = Error::CycleDetected {
            cycle: vec!["raw.a".into(), "raw.b".into(), "raw.a".into()],
        };
        assert_eq!(
            err.to_string(),
            "cycle detected in asset graph: raw.a -> raw.b -> raw.a"
        );
    }

    #[test]
    fn state_transition_error_display() {
        let err = Error::InvalidStateTransition {
            from: "succeeded".into(),
            to: "running".into(),
            reason: "terminal states are final".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("succeeded"));
        assert!(msg.contains("running"));
        assert!(msg.contains("terminal"));
    }

    #[test]
    fn storage_error_with_source() {
        let source = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::storage_with_source("failed to read record", source);
        assert!(err.to_string().contains("storage error"));
        assert!(StdError::source(&err).is_some());
    }

    #[test]
    fn conflict_is_detected_through_table_errors() {
        let table = TableIdent::new("raw", "trips").unwrap();
        let err = Error::from(TableError::Conflict {
            table,
            base_snapshot_id: SnapshotId::new(1),
            current_snapshot_id: SnapshotId::new(2),
        });
        assert!(err.is_conflict());
        assert!(!Error::executor("boom").is_conflict());
    }
}

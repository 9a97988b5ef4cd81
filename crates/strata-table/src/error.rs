//! Error types for table store operations.

use thiserror::Error;

use crate::ident::TableIdent;
use crate::snapshot::SnapshotId;

/// Result type alias for table operations.
pub type Result<T> = std::result::Result<T, TableError>;

/// Errors that can occur during table operations.
#[derive(Debug, Error)]
pub enum TableError {
    /// Another committer advanced the catalog pointer after the base
    /// snapshot was read. Retryable by rebasing onto `current_snapshot_id`.
    #[error(
        "commit conflict on {table}: based on snapshot {base_snapshot_id}, current is {current_snapshot_id}"
    )]
    Conflict {
        /// Table the commit targeted.
        table: TableIdent,
        /// Snapshot the caller built against.
        base_snapshot_id: SnapshotId,
        /// Snapshot the catalog currently designates.
        current_snapshot_id: SnapshotId,
    },

    /// New data does not conform to the table schema or partition spec.
    #[error("schema mismatch: {message}")]
    SchemaMismatch {
        /// Description of the incompatibility.
        message: String,
    },

    /// A table, snapshot or file is absent.
    #[error("not found: {message}")]
    NotFound {
        /// Description of what was not found.
        message: String,
    },

    /// A table with this identity is already registered.
    #[error("table already exists: {table}")]
    AlreadyExists {
        /// The conflicting identity.
        table: TableIdent,
    },

    /// An object path was already occupied when a write-once put was issued.
    #[error("write-once violation: {path} already exists")]
    WriteOnceViolation {
        /// The occupied path.
        path: String,
    },

    /// Caller-supplied arguments are invalid.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// Description of the problem.
        message: String,
    },

    /// A stored document could not be encoded or decoded.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// The underlying blob store failed.
    #[error("storage error: {0}")]
    Storage(#[from] strata_core::Error),
}

impl TableError {
    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Creates a schema-mismatch error.
    #[must_use]
    pub fn schema_mismatch(message: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            message: message.into(),
        }
    }

    /// Creates an invalid-input error.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Creates a serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Returns true if the caller may rebase and retry.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Returns true for missing tables, snapshots and files.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Storage(e) => e.is_not_found(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for TableError {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

//! Commit operations.

use serde::{Deserialize, Serialize};

use crate::data_file::DataFileEntry;
use crate::partition::PartitionValue;
use crate::snapshot::OperationKind;

/// Which live files a commit removes.
///
/// Removals are logical: they are resolved against the base snapshot when
/// the commit is built, so a rebased commit removes whatever matches in the
/// new base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum RemoveSpec {
    /// Specific files by path. Every path must be live in the base.
    Files(Vec<String>),
    /// Every live file in any of these partitions.
    Partitions(Vec<PartitionValue>),
    /// Every live file.
    All,
}

/// A change to commit against a base snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum Operation {
    /// Add files.
    Append {
        /// Files already written by a [`crate::DataFileWriter`].
        files: Vec<DataFileEntry>,
    },
    /// Remove files and add replacements atomically.
    Overwrite {
        /// Files to remove.
        remove: RemoveSpec,
        /// Replacement files.
        files: Vec<DataFileEntry>,
    },
    /// Remove files.
    Delete {
        /// Files to remove.
        remove: RemoveSpec,
    },
}

impl Operation {
    /// Returns the snapshot operation kind this produces.
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        match self {
            Self::Append { .. } => OperationKind::Append,
            Self::Overwrite { .. } => OperationKind::Overwrite,
            Self::Delete { .. } => OperationKind::Delete,
        }
    }

    /// Returns the files the operation adds.
    #[must_use]
    pub fn added_files(&self) -> &[DataFileEntry] {
        match self {
            Self::Append { files } | Self::Overwrite { files, .. } => files,
            Self::Delete { .. } => &[],
        }
    }

    /// Returns the removal spec, if any.
    #[must_use]
    pub const fn removal(&self) -> Option<&RemoveSpec> {
        match self {
            Self::Append { .. } => None,
            Self::Overwrite { remove, .. } | Self::Delete { remove } => Some(remove),
        }
    }
}

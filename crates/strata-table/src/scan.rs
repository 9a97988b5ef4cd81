//! Scan planning with statistics pruning.
//!
//! Planning walks the snapshot's manifest list and keeps only the data files
//! that could contain a matching row. It never reads file contents:
//!
//! 1. The predicate's `Not`s are pushed to the leaves.
//! 2. Column clauses are projected through the partition transforms into an
//!    inclusive predicate over partition values.
//! 3. A manifest is skipped when that projection is disjoint from its
//!    partition summary.
//! 4. A file is skipped when the predicate is disjoint from its column stats
//!    or the projection is disjoint from its partition value.
//!
//! Pruning is conservative. Missing stats, NaN-contaminated columns,
//! incomparable literals and clauses that cannot be decomposed all mean
//! "must scan". `And` is disjoint if any child is; `Or` only if every child
//! is.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use strata_core::StorageBackend;

use crate::data_file::DataFileEntry;
use crate::document::read_document;
use crate::error::Result;
use crate::expr::{CompareOp, Predicate};
use crate::manifest::{Manifest, ManifestFile, ManifestList};
use crate::metadata::TableMetadata;
use crate::metrics::TableMetrics;
use crate::partition::{PartitionField, PartitionSpec, PartitionValue};
use crate::snapshot::{Snapshot, SnapshotId};
use crate::value::Value;

/// The files a scan must read, with planner counters.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanPlan {
    /// Snapshot the plan was built for.
    pub snapshot_id: SnapshotId,
    /// Live files that may contain matching rows, in manifest order.
    pub files: Vec<DataFileEntry>,
    /// Manifests whose entries were examined.
    pub manifests_scanned: usize,
    /// Manifests excluded by their partition summary or with no live entries.
    pub manifests_skipped: usize,
    /// Files kept (equal to `files.len()`).
    pub files_scanned: usize,
    /// Live files in examined manifests excluded by their stats.
    pub files_skipped: usize,
}

impl ScanPlan {
    /// Total rows in planned files.
    #[must_use]
    pub fn planned_rows(&self) -> u64 {
        self.files.iter().map(|f| f.record_count).sum()
    }
}

/// Value bounds of one column (or partition field) over a set of rows.
#[derive(Debug, Clone, Copy)]
pub struct Bounds<'a> {
    /// Smallest non-null value, if known.
    pub min: Option<&'a Value>,
    /// Largest non-null value, if known.
    pub max: Option<&'a Value>,
    /// Exact null count, if known.
    pub null_count: Option<u64>,
    /// Number of values (rows), if known.
    pub value_count: Option<u64>,
}

impl Bounds<'_> {
    fn all_null(&self) -> bool {
        matches!((self.null_count, self.value_count), (Some(n), Some(c)) if n == c)
    }
}

/// Something that can report bounds for a named column.
pub trait BoundsSource {
    /// Bounds of `column`, or `None` when nothing is known.
    fn bounds(&self, column: &str) -> Option<Bounds<'_>>;
}

impl BoundsSource for DataFileEntry {
    fn bounds(&self, column: &str) -> Option<Bounds<'_>> {
        self.column_stats.get(column).map(|stats| Bounds {
            min: stats.min.as_ref(),
            max: stats.max.as_ref(),
            null_count: Some(stats.null_count),
            value_count: Some(self.record_count),
        })
    }
}

struct SummaryBounds<'a> {
    spec: &'a PartitionSpec,
    manifest: &'a ManifestFile,
}

impl BoundsSource for SummaryBounds<'_> {
    fn bounds(&self, column: &str) -> Option<Bounds<'_>> {
        let i = self.spec.fields().iter().position(|f| f.name == column)?;
        let summary = self.manifest.partitions.get(i)?;
        Some(Bounds {
            min: summary.lower.as_ref(),
            max: summary.upper.as_ref(),
            null_count: (!summary.contains_null).then_some(0),
            value_count: None,
        })
    }
}

struct PartitionBounds<'a> {
    spec: &'a PartitionSpec,
    partition: &'a PartitionValue,
}

impl BoundsSource for PartitionBounds<'_> {
    fn bounds(&self, column: &str) -> Option<Bounds<'_>> {
        let i = self.spec.fields().iter().position(|f| f.name == column)?;
        let value = self.partition.values().get(i)?;
        let known = !value.is_null() && !value.is_nan();
        Some(Bounds {
            min: known.then_some(value),
            max: known.then_some(value),
            null_count: Some(u64::from(value.is_null())),
            value_count: Some(1),
        })
    }
}

/// Returns true if no row described by `source` can satisfy `predicate`.
///
/// `predicate` must already be free of `Not` (see
/// [`Predicate::rewrite_not`]); a remaining `Not` is treated as "must scan".
#[must_use]
pub fn can_skip(predicate: &Predicate, source: &impl BoundsSource) -> bool {
    match predicate {
        Predicate::AlwaysTrue | Predicate::Not { .. } => false,
        Predicate::AlwaysFalse => true,
        Predicate::And { children } => children.iter().any(|c| can_skip(c, source)),
        Predicate::Or { children } => children.iter().all(|c| can_skip(c, source)),
        Predicate::IsNull { column } => source
            .bounds(column)
            .is_some_and(|b| b.null_count == Some(0)),
        Predicate::NotNull { column } => source.bounds(column).is_some_and(|b| b.all_null()),
        Predicate::Compare { column, op, value } => {
            // Comparisons with null are never true.
            if value.is_null() {
                return true;
            }
            let Some(bounds) = source.bounds(column) else {
                return false;
            };
            if bounds.all_null() {
                return true;
            }
            match (bounds.min, bounds.max) {
                (Some(min), Some(max)) => disjoint(*op, min, max, value),
                _ => false,
            }
        }
    }
}

/// True if `[min, max] op value` cannot hold for any value in the range.
fn disjoint(op: CompareOp, min: &Value, max: &Value, value: &Value) -> bool {
    use Ordering::{Equal, Greater, Less};
    match op {
        CompareOp::Eq => {
            matches!(min.compare(value), Some(Greater)) || matches!(max.compare(value), Some(Less))
        }
        CompareOp::NotEq => {
            min.compare(value) == Some(Equal) && max.compare(value) == Some(Equal)
        }
        CompareOp::Lt => matches!(min.compare(value), Some(Greater | Equal)),
        CompareOp::LtEq => matches!(min.compare(value), Some(Greater)),
        CompareOp::Gt => matches!(max.compare(value), Some(Less | Equal)),
        CompareOp::GtEq => matches!(max.compare(value), Some(Less)),
    }
}

/// Projects a `Not`-free predicate over table columns onto partition fields.
///
/// Every row satisfying `predicate` has a partition value satisfying the
/// result. Clauses on unpartitioned columns project to `AlwaysTrue`.
#[must_use]
pub fn project(predicate: &Predicate, spec: &PartitionSpec) -> Predicate {
    let conjunction = |parts: Vec<Predicate>| match parts.len() {
        0 => Predicate::AlwaysTrue,
        1 => parts.into_iter().next().unwrap_or(Predicate::AlwaysTrue),
        _ => Predicate::And { children: parts },
    };

    match predicate {
        Predicate::AlwaysTrue | Predicate::Not { .. } => Predicate::AlwaysTrue,
        Predicate::AlwaysFalse => Predicate::AlwaysFalse,
        Predicate::Compare { value, .. } if value.is_null() => Predicate::AlwaysFalse,
        Predicate::Compare { column, op, value } => conjunction(
            sourced(spec, column)
                .into_iter()
                .filter_map(|field| {
                    field.transform.project(*op, value).map(|(op, value)| {
                        Predicate::Compare {
                            column: field.name.clone(),
                            op,
                            value,
                        }
                    })
                })
                .collect(),
        ),
        Predicate::IsNull { column } => conjunction(
            sourced(spec, column)
                .into_iter()
                .map(|field| Predicate::IsNull {
                    column: field.name.clone(),
                })
                .collect(),
        ),
        Predicate::NotNull { column } => conjunction(
            sourced(spec, column)
                .into_iter()
                .map(|field| Predicate::NotNull {
                    column: field.name.clone(),
                })
                .collect(),
        ),
        Predicate::And { children } => Predicate::And {
            children: children.iter().map(|c| project(c, spec)).collect(),
        },
        Predicate::Or { children } => Predicate::Or {
            children: children.iter().map(|c| project(c, spec)).collect(),
        },
    }
}

fn sourced<'s>(spec: &'s PartitionSpec, column: &str) -> Vec<&'s PartitionField> {
    spec.fields()
        .iter()
        .filter(|f| f.source_column == column)
        .collect()
}

/// Plans a scan of `snapshot` for rows matching `predicate`.
///
/// # Errors
///
/// Returns `TableError::InvalidInput` for unknown columns, or a storage /
/// not-found error if a manifest cannot be read.
pub async fn plan_scan(
    storage: &dyn StorageBackend,
    metadata: &TableMetadata,
    snapshot: &Snapshot,
    predicate: &Predicate,
) -> Result<ScanPlan> {
    predicate.bind(&metadata.schema)?;
    let filter = predicate.clone().rewrite_not();
    let spec = &metadata.partition_spec;
    let partition_filter = project(&filter, spec);

    let list: ManifestList = read_document(storage, &snapshot.manifest_list).await?;

    // Tombstones apply regardless of pruning, so manifests carrying them are
    // always read.
    let mut loaded: HashMap<usize, Manifest> = HashMap::new();
    let mut deleted: HashSet<String> = HashSet::new();
    for (i, manifest_file) in list.manifests.iter().enumerate() {
        if manifest_file.has_deletes() {
            let manifest: Manifest = read_document(storage, &manifest_file.manifest_path).await?;
            deleted.extend(
                manifest
                    .entries
                    .iter()
                    .filter(|e| !e.is_live())
                    .map(|e| e.path.clone()),
            );
            loaded.insert(i, manifest);
        }
    }

    let mut plan = ScanPlan {
        snapshot_id: snapshot.snapshot_id,
        files: Vec::new(),
        manifests_scanned: 0,
        manifests_skipped: 0,
        files_scanned: 0,
        files_skipped: 0,
    };

    for (i, manifest_file) in list.manifests.iter().enumerate() {
        let summary = SummaryBounds {
            spec,
            manifest: manifest_file,
        };
        if manifest_file.live_files_count() == 0 || can_skip(&partition_filter, &summary) {
            tracing::debug!(manifest = %manifest_file.manifest_path, "pruned manifest");
            plan.manifests_skipped += 1;
            continue;
        }
        let manifest = match loaded.remove(&i) {
            Some(m) => m,
            None => read_document(storage, &manifest_file.manifest_path).await?,
        };
        plan.manifests_scanned += 1;

        for entry in manifest.entries {
            if !entry.is_live() || deleted.contains(&entry.path) {
                continue;
            }
            let partition = PartitionBounds {
                spec,
                partition: &entry.partition,
            };
            if can_skip(&filter, &entry) || can_skip(&partition_filter, &partition) {
                tracing::debug!(file = %entry.path, "pruned data file");
                plan.files_skipped += 1;
            } else {
                plan.files.push(entry);
            }
        }
    }
    plan.files_scanned = plan.files.len();

    tracing::debug!(
        snapshot_id = %snapshot.snapshot_id,
        predicate = %filter,
        manifests_scanned = plan.manifests_scanned,
        manifests_skipped = plan.manifests_skipped,
        files_scanned = plan.files_scanned,
        files_skipped = plan.files_skipped,
        "planned scan"
    );
    let metrics = TableMetrics::new();
    metrics.record_scan_manifests(plan.manifests_scanned, plan.manifests_skipped);
    metrics.record_scan_files(plan.files_scanned, plan.files_skipped);
    Ok(plan)
}

/// Returns every live file of `snapshot`, in manifest order.
///
/// # Errors
///
/// Returns a storage or not-found error if a manifest cannot be read.
pub async fn live_files(
    storage: &dyn StorageBackend,
    metadata: &TableMetadata,
    snapshot: &Snapshot,
) -> Result<Vec<DataFileEntry>> {
    Ok(plan_scan(storage, metadata, snapshot, &Predicate::AlwaysTrue)
        .await?
        .files)
}

/// Full file state of a snapshot, read from every manifest.
#[derive(Debug, Clone)]
pub(crate) struct SnapshotFiles {
    /// The snapshot's manifest list.
    pub list: ManifestList,
    /// Live entries in manifest order.
    pub live: Vec<DataFileEntry>,
    /// Every path any manifest mentions, tombstones included.
    pub referenced: HashSet<String>,
}

/// Reads every manifest of `snapshot`.
pub(crate) async fn snapshot_files(
    storage: &dyn StorageBackend,
    snapshot: &Snapshot,
) -> Result<SnapshotFiles> {
    let list: ManifestList = read_document(storage, &snapshot.manifest_list).await?;
    let mut entries = Vec::new();
    for manifest_file in &list.manifests {
        let manifest: Manifest = read_document(storage, &manifest_file.manifest_path).await?;
        entries.extend(manifest.entries);
    }
    let deleted: HashSet<&str> = entries
        .iter()
        .filter(|e| !e.is_live())
        .map(|e| e.path.as_str())
        .collect();
    let live = entries
        .iter()
        .filter(|e| e.is_live() && !deleted.contains(e.path.as_str()))
        .cloned()
        .collect();
    let referenced = entries.iter().map(|e| e.path.clone()).collect();
    Ok(SnapshotFiles {
        list,
        live,
        referenced,
    })
}

//! Partition specs and transforms.
//!
//! A partition spec derives a tuple of partition values from each row by
//! applying a transform to a source column. All transforms are monotonic
//! (non-decreasing in the source value), which lets the scan planner project
//! column predicates onto partition values without losing soundness.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::error::{Result, TableError};
use crate::expr::CompareOp;
use crate::schema::{DataType, Schema};
use crate::value::{Row, Value};

const MICROS_PER_DAY: i64 = 86_400_000_000;

/// A monotonic function from a source column value to a partition value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transform {
    /// The source value itself.
    Identity,
    /// Years since 1970 of a timestamp.
    Year,
    /// Months since 1970-01 of a timestamp.
    Month,
    /// Days since 1970-01-01 of a timestamp.
    Day,
}

impl Transform {
    /// Returns the partition value type produced from a source column type.
    ///
    /// # Errors
    ///
    /// Returns `TableError::InvalidInput` if a time transform is applied to a
    /// non-timestamp column.
    pub fn result_type(self, source: DataType) -> Result<DataType> {
        match self {
            Self::Identity => Ok(source),
            Self::Year | Self::Month | Self::Day if source == DataType::Timestamp => {
                Ok(DataType::Long)
            }
            _ => Err(TableError::invalid_input(format!(
                "transform {self} requires a timestamp column, got {source}"
            ))),
        }
    }

    /// Applies the transform. Null maps to null.
    ///
    /// # Errors
    ///
    /// Returns `TableError::SchemaMismatch` if the value has the wrong type
    /// or is outside the representable calendar range.
    pub fn apply(self, value: &Value) -> Result<Value> {
        match (self, value) {
            (_, Value::Null) => Ok(Value::Null),
            (Self::Identity, v) => Ok(v.clone()),
            (Self::Day, Value::Timestamp(micros)) => Ok(Value::Long(micros.div_euclid(MICROS_PER_DAY))),
            (Self::Year | Self::Month, Value::Timestamp(micros)) => {
                let ts = DateTime::<Utc>::from_timestamp_micros(*micros).ok_or_else(|| {
                    TableError::schema_mismatch(format!("timestamp {micros} out of range"))
                })?;
                let years = i64::from(ts.year()) - 1970;
                if self == Self::Year {
                    Ok(Value::Long(years))
                } else {
                    Ok(Value::Long(years * 12 + i64::from(ts.month0())))
                }
            }
            (t, v) => Err(TableError::schema_mismatch(format!(
                "transform {t} cannot be applied to {v}"
            ))),
        }
    }

    /// Projects `source op literal` onto the partition value.
    ///
    /// Returns a comparison that every matching row's partition value also
    /// satisfies, or `None` when no such bound can be derived.
    #[must_use]
    pub fn project(self, op: CompareOp, literal: &Value) -> Option<(CompareOp, Value)> {
        if op == CompareOp::NotEq {
            return None;
        }
        if self == Self::Identity {
            return Some((op, literal.clone()));
        }
        if !matches!(literal, Value::Timestamp(_)) {
            return None;
        }
        let bound = self.apply(literal).ok()?;
        let relaxed = match op {
            CompareOp::Lt | CompareOp::LtEq => CompareOp::LtEq,
            CompareOp::Gt | CompareOp::GtEq => CompareOp::GtEq,
            other => other,
        };
        Some((relaxed, bound))
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Identity => "identity",
            Self::Year => "year",
            Self::Month => "month",
            Self::Day => "day",
        };
        f.write_str(name)
    }
}

/// One partition field: a transform over a source column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionField {
    /// Column the value is derived from.
    pub source_column: String,
    /// Partition field name, used in data paths.
    pub name: String,
    /// Transform applied to the source column.
    pub transform: Transform,
}

impl PartitionField {
    /// Creates a partition field.
    #[must_use]
    pub fn new(source_column: impl Into<String>, name: impl Into<String>, transform: Transform) -> Self {
        Self {
            source_column: source_column.into(),
            name: name.into(),
            transform,
        }
    }
}

/// Ordered partition fields. Empty means unpartitioned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSpec {
    fields: Vec<PartitionField>,
}

impl PartitionSpec {
    /// The unpartitioned spec.
    #[must_use]
    pub fn unpartitioned() -> Self {
        Self::default()
    }

    /// Creates a spec from fields. Call [`PartitionSpec::validate`] against
    /// the table schema before use.
    #[must_use]
    pub fn new(fields: Vec<PartitionField>) -> Self {
        Self { fields }
    }

    /// Returns the partition fields.
    #[must_use]
    pub fn fields(&self) -> &[PartitionField] {
        &self.fields
    }

    /// Returns true when the spec has no fields.
    #[must_use]
    pub fn is_unpartitioned(&self) -> bool {
        self.fields.is_empty()
    }

    /// Checks source columns exist and transforms fit their types.
    ///
    /// # Errors
    ///
    /// Returns `TableError::InvalidInput` on unknown columns, duplicate names
    /// or type-incompatible transforms.
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        let mut names = HashSet::new();
        for field in &self.fields {
            if !names.insert(field.name.as_str()) {
                return Err(TableError::invalid_input(format!(
                    "duplicate partition field '{}'",
                    field.name
                )));
            }
            let source = schema.field(&field.source_column).ok_or_else(|| {
                TableError::invalid_input(format!(
                    "partition source column '{}' not in schema",
                    field.source_column
                ))
            })?;
            field.transform.result_type(source.data_type)?;
        }
        Ok(())
    }

    /// Computes the partition value of a row.
    ///
    /// # Errors
    ///
    /// Returns `TableError::SchemaMismatch` if a source column is missing or
    /// the transform cannot be applied.
    pub fn partition_of(&self, schema: &Schema, row: &Row) -> Result<PartitionValue> {
        let mut values = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let value = schema
                .index_of(&field.source_column)
                .and_then(|i| row.get(i))
                .ok_or_else(|| {
                    TableError::schema_mismatch(format!(
                        "row lacks partition source column '{}'",
                        field.source_column
                    ))
                })?;
            values.push(field.transform.apply(value)?);
        }
        Ok(PartitionValue(values))
    }

    /// Renders a partition value as a relative directory, e.g.
    /// `pickup_month=650/vendor=2`. Empty for unpartitioned tables.
    #[must_use]
    pub fn path_of(&self, partition: &PartitionValue) -> String {
        self.fields
            .iter()
            .zip(partition.values())
            .map(|(field, value)| {
                let rendered = if value.is_null() {
                    "__null__".to_string()
                } else {
                    sanitize(&value.to_string())
                };
                format!("{}={rendered}", field.name)
            })
            .collect::<Vec<_>>()
            .join("/")
    }
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Tuple of partition values, one per spec field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionValue(pub Vec<Value>);

impl PartitionValue {
    /// The empty tuple of an unpartitioned table.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns the values.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// Returns the number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true for the empty tuple.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;

    // 2024-03-15T12:00:00Z
    const MARCH_2024: i64 = 1_710_504_000_000_000;

    fn schema() -> Schema {
        Schema::new(vec![
            Field::required("pickup_at", DataType::Timestamp),
            Field::required("vendor_id", DataType::Long),
        ])
        .unwrap()
    }

    #[test]
    fn time_transforms() {
        let ts = Value::Timestamp(MARCH_2024);
        assert_eq!(Transform::Year.apply(&ts).unwrap(), Value::Long(54));
        assert_eq!(Transform::Month.apply(&ts).unwrap(), Value::Long(54 * 12 + 2));
        assert_eq!(Transform::Day.apply(&ts).unwrap(), Value::Long(19_797));
        assert_eq!(Transform::Day.apply(&Value::Timestamp(-1)).unwrap(), Value::Long(-1));
        assert_eq!(Transform::Month.apply(&Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn time_transform_rejects_non_timestamps() {
        assert!(Transform::Month.apply(&Value::Long(5)).is_err());
        assert!(Transform::Month.result_type(DataType::Long).is_err());
    }

    #[test]
    fn projection_relaxes_strict_bounds() {
        let ts = Value::Timestamp(MARCH_2024);
        assert_eq!(
            Transform::Month.project(CompareOp::Lt, &ts),
            Some((CompareOp::LtEq, Value::Long(650)))
        );
        assert_eq!(
            Transform::Identity.project(CompareOp::Gt, &Value::Long(3)),
            Some((CompareOp::Gt, Value::Long(3)))
        );
        assert_eq!(Transform::Month.project(CompareOp::NotEq, &ts), None);
        assert_eq!(Transform::Month.project(CompareOp::Eq, &Value::Long(1)), None);
    }

    #[test]
    fn partition_of_row_and_path() {
        let spec = PartitionSpec::new(vec![
            PartitionField::new("pickup_at", "pickup_month", Transform::Month),
            PartitionField::new("vendor_id", "vendor", Transform::Identity),
        ]);
        let schema = schema();
        spec.validate(&schema).unwrap();

        let row = vec![Value::Timestamp(MARCH_2024), Value::Long(2)];
        let partition = spec.partition_of(&schema, &row).unwrap();
        assert_eq!(partition.values(), &[Value::Long(650), Value::Long(2)]);
        assert_eq!(spec.path_of(&partition), "pickup_month=650/vendor=2");
    }

    #[test]
    fn validate_rejects_unknown_source() {
        let spec = PartitionSpec::new(vec![PartitionField::new("nope", "p", Transform::Identity)]);
        assert!(spec.validate(&schema()).is_err());
    }
}

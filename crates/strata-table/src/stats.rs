//! Column statistics extraction.
//!
//! Stats are a sound bound: every non-null value of a column lies within
//! `[min, max]` and `null_count` is exact. A column that contains NaN gets no
//! bounds at all, so readers fall back to scanning it.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::error::Result;
use crate::schema::Schema;
use crate::value::{Row, Value};

/// Per-column statistics of one data file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    /// Smallest non-null value, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<Value>,
    /// Largest non-null value, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<Value>,
    /// Exact number of nulls.
    pub null_count: u64,
}

/// Statistics of a batch of rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchStats {
    /// Number of rows.
    pub row_count: u64,
    /// Stats keyed by column name.
    pub columns: BTreeMap<String, ColumnStats>,
}

/// Accumulates column stats over rows.
#[derive(Debug)]
pub struct StatsCollector<'a> {
    schema: &'a Schema,
    row_count: u64,
    columns: Vec<Accumulator>,
}

#[derive(Debug, Default)]
struct Accumulator {
    min: Option<Value>,
    max: Option<Value>,
    null_count: u64,
    unbounded: bool,
}

impl Accumulator {
    fn observe(&mut self, value: &Value) {
        if value.is_null() {
            self.null_count += 1;
            return;
        }
        if self.unbounded {
            return;
        }
        if value.is_nan() {
            self.unbounded = true;
            self.min = None;
            self.max = None;
            return;
        }
        self.min = match self.min.take() {
            None => Some(value.clone()),
            Some(current) => match value.compare(&current) {
                Some(Ordering::Less) => Some(value.clone()),
                Some(_) => Some(current),
                None => {
                    self.unbounded = true;
                    None
                }
            },
        };
        if self.unbounded {
            self.max = None;
            return;
        }
        self.max = match self.max.take() {
            None => Some(value.clone()),
            Some(current) => match value.compare(&current) {
                Some(Ordering::Greater) => Some(value.clone()),
                Some(_) => Some(current),
                None => {
                    self.unbounded = true;
                    self.min = None;
                    None
                }
            },
        };
    }

    fn finish(self) -> ColumnStats {
        ColumnStats {
            min: self.min,
            max: self.max,
            null_count: self.null_count,
        }
    }
}

impl<'a> StatsCollector<'a> {
    /// Creates an empty collector for a schema.
    #[must_use]
    pub fn new(schema: &'a Schema) -> Self {
        Self {
            schema,
            row_count: 0,
            columns: (0..schema.len()).map(|_| Accumulator::default()).collect(),
        }
    }

    /// Validates a row against the schema and folds it into the stats.
    ///
    /// # Errors
    ///
    /// Returns `TableError::SchemaMismatch` if the row does not conform.
    pub fn observe(&mut self, row: &Row) -> Result<()> {
        self.schema.validate_row(row)?;
        for (acc, value) in self.columns.iter_mut().zip(row) {
            acc.observe(value);
        }
        self.row_count += 1;
        Ok(())
    }

    /// Returns the collected stats.
    #[must_use]
    pub fn finish(self) -> BatchStats {
        let columns = self
            .schema
            .fields()
            .iter()
            .zip(self.columns)
            .map(|(field, acc)| (field.name.clone(), acc.finish()))
            .collect();
        BatchStats {
            row_count: self.row_count,
            columns,
        }
    }
}

/// Computes stats for a batch of rows.
///
/// # Errors
///
/// Returns `TableError::SchemaMismatch` if any row does not conform.
pub fn compute_stats(schema: &Schema, rows: &[Row]) -> Result<BatchStats> {
    let mut collector = StatsCollector::new(schema);
    for row in rows {
        collector.observe(row)?;
    }
    Ok(collector.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DataType, Field};

    fn schema() -> Schema {
        Schema::new(vec![
            Field::optional("distance", DataType::Double),
            Field::optional("zone", DataType::String),
        ])
        .unwrap()
    }

    #[test]
    fn min_max_and_nulls() {
        let rows = vec![
            vec![Value::Double(3.0), Value::from("b")],
            vec![Value::Null, Value::from("a")],
            vec![Value::Double(27.5), Value::Null],
            vec![Value::Double(-1.0), Value::Null],
        ];
        let stats = compute_stats(&schema(), &rows).unwrap();
        assert_eq!(stats.row_count, 4);

        let distance = &stats.columns["distance"];
        assert_eq!(distance.min, Some(Value::Double(-1.0)));
        assert_eq!(distance.max, Some(Value::Double(27.5)));
        assert_eq!(distance.null_count, 1);

        let zone = &stats.columns["zone"];
        assert_eq!(zone.min, Some(Value::from("a")));
        assert_eq!(zone.null_count, 2);
    }

    #[test]
    fn nan_drops_bounds() {
        let rows = vec![
            vec![Value::Double(1.0), Value::Null],
            vec![Value::Double(f64::NAN), Value::Null],
            vec![Value::Double(5.0), Value::Null],
        ];
        let stats = compute_stats(&schema(), &rows).unwrap();
        let distance = &stats.columns["distance"];
        assert!(distance.min.is_none());
        assert!(distance.max.is_none());
        assert_eq!(distance.null_count, 0);
    }

    #[test]
    fn all_null_column_has_no_bounds() {
        let rows = vec![vec![Value::Null, Value::Null]];
        let stats = compute_stats(&schema(), &rows).unwrap();
        assert_eq!(stats.columns["zone"].null_count, 1);
        assert!(stats.columns["zone"].min.is_none());
    }

    #[test]
    fn rejects_non_conforming_rows() {
        let rows = vec![vec![Value::Long(1), Value::Null]];
        assert!(compute_stats(&schema(), &rows).is_err());
    }
}

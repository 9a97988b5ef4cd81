//! Row sources.
//!
//! A row source is a lazy, finite, restartable sequence of rows conforming
//! to a schema, delivered in batches. Executors return one to describe the
//! rows they want written; [`crate::TableReader`] is one, so upstream tables
//! can be streamed batch by batch.

use futures::stream::{self, BoxStream, StreamExt};

use crate::error::Result;
use crate::schema::Schema;
use crate::value::Row;

/// A batch of rows.
pub type RowBatch = Vec<Row>;

/// A lazy, finite, restartable sequence of rows.
pub trait RowSource: Send + Sync {
    /// Schema every row conforms to.
    fn schema(&self) -> &Schema;

    /// Starts a new pass over the rows. Each call begins from the first row.
    fn batches(&self) -> BoxStream<'_, Result<RowBatch>>;
}

/// Rows held in memory, yielded in fixed-size batches.
#[derive(Debug, Clone)]
pub struct MemoryRowSource {
    schema: Schema,
    rows: Vec<Row>,
    batch_size: usize,
}

impl MemoryRowSource {
    /// Default batch size.
    pub const DEFAULT_BATCH_SIZE: usize = 1024;

    /// Creates a source over `rows`.
    #[must_use]
    pub fn new(schema: Schema, rows: Vec<Row>) -> Self {
        Self {
            schema,
            rows,
            batch_size: Self::DEFAULT_BATCH_SIZE,
        }
    }

    /// Creates a source with no rows.
    #[must_use]
    pub fn empty(schema: Schema) -> Self {
        Self::new(schema, Vec::new())
    }

    /// Sets the batch size (minimum 1).
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Returns the number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if there are no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl RowSource for MemoryRowSource {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn batches(&self) -> BoxStream<'_, Result<RowBatch>> {
        stream::iter(self.rows.chunks(self.batch_size).map(|c| Ok(c.to_vec()))).boxed()
    }
}

/// Drains a source into one vector.
///
/// # Errors
///
/// Returns the first error the source yields.
pub async fn collect_rows(source: &dyn RowSource) -> Result<Vec<Row>> {
    let mut rows = Vec::new();
    let mut batches = source.batches();
    while let Some(batch) = batches.next().await {
        rows.extend(batch?);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DataType, Field};
    use crate::value::Value;

    #[tokio::test]
    async fn batches_are_restartable() {
        let schema = Schema::new(vec![Field::required("n", DataType::Long)]).unwrap();
        let rows: Vec<Row> = (0..5).map(|i| vec![Value::Long(i)]).collect();
        let source = MemoryRowSource::new(schema, rows.clone()).with_batch_size(2);

        let sizes: Vec<usize> = source
            .batches()
            .map(|b| b.unwrap().len())
            .collect()
            .await;
        assert_eq!(sizes, vec![2, 2, 1]);

        assert_eq!(collect_rows(&source).await.unwrap(), rows);
        assert_eq!(collect_rows(&source).await.unwrap(), rows);
    }
}

//! The column-oriented, in-memory relation that profiling runs over.

use crate::error::{ProfilingError, Result};
use crate::partition::{Partition, MAX_ROWS};
use crate::vertical::RelationalSchema;
use lasso::{Rodeo, Spur};
use std::sync::Arc;
use tracing::debug;

/// An interned cell value. Nulls get their own marker so they can agree with each other.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
enum Cell {
    Value(Spur),
    Null,
}

fn check_row_count(num_rows: usize) -> Result<()> {
    if num_rows > MAX_ROWS {
        return Err(ProfilingError::TooManyRows { limit: MAX_ROWS });
    }
    Ok(())
}

/// The per-column data the profiler needs: the column's partition and the matching probing
/// table (row to class id, 0 for rows with a unique value).
#[derive(Clone, Debug)]
pub struct ColumnData {
    partition: Arc<Partition>,
    probing_table: Vec<u32>,
}

impl ColumnData {
    /// Wraps a single-column partition.
    pub fn new(partition: Partition) -> Self {
        let probing_table = partition.probing_table();
        ColumnData {
            partition: Arc::new(partition),
            probing_table,
        }
    }

    /// The partition of this column alone.
    pub fn partition(&self) -> &Arc<Partition> {
        &self.partition
    }

    /// The class id of every row; 0 marks rows that agree with no other row.
    pub fn probing_table(&self) -> &[u32] {
        &self.probing_table
    }
}

/// A relation stored column by column as partitions.
#[derive(Clone, Debug)]
pub struct ColumnLayoutRelation {
    schema: RelationalSchema,
    columns: Vec<ColumnData>,
    num_rows: usize,
    null_equals_null: bool,
}

impl ColumnLayoutRelation {
    /// Assembles a relation from one partition per schema column, as delivered by an external
    /// loader. Every partition must cover the same number of rows.
    pub fn new(
        schema: RelationalSchema,
        partitions: Vec<Partition>,
        null_equals_null: bool,
    ) -> Result<Self> {
        if partitions.len() != schema.num_columns() {
            return Err(ProfilingError::PartitionCount {
                expected: schema.num_columns(),
                found: partitions.len(),
            });
        }
        let num_rows = partitions.first().map_or(0, Partition::num_rows);
        check_row_count(num_rows)?;
        if let Some((index, p)) = partitions
            .iter()
            .enumerate()
            .find(|(_, p)| p.num_rows() != num_rows)
        {
            return Err(ProfilingError::ColumnMismatch {
                column: index,
                expected: num_rows,
                found: p.num_rows(),
            });
        }
        Ok(ColumnLayoutRelation {
            schema,
            columns: partitions.into_iter().map(ColumnData::new).collect(),
            num_rows,
            null_equals_null,
        })
    }

    /// Builds a relation from rows of optional cell values, interning the values so each
    /// column's partition can be computed from small keys instead of strings.
    ///
    /// When `null_equals_null` is set, all `None` cells of a column agree with each other;
    /// otherwise each one is distinct from every other cell.
    ///
    /// ```
    /// use pyro_profiler::ColumnLayoutRelation;
    ///
    /// let rows = vec![
    ///     vec![Some("1"), None],
    ///     vec![Some("2"), None],
    ///     vec![Some("1"), Some("x")],
    /// ];
    /// let strict =
    ///     ColumnLayoutRelation::from_rows("t", vec!["a", "b"], rows.clone(), false).unwrap();
    /// assert_eq!(strict.num_rows(), 3);
    /// assert_eq!(strict.column(0).partition().nep(), 1);
    /// assert_eq!(strict.column(1).partition().nep(), 0);
    ///
    /// let lenient = ColumnLayoutRelation::from_rows("t", vec!["a", "b"], rows, true).unwrap();
    /// assert_eq!(lenient.column(1).partition().nep(), 1);
    /// ```
    pub fn from_rows<H, R, S>(
        name: &str,
        headers: impl IntoIterator<Item = H>,
        rows: impl IntoIterator<Item = R>,
        null_equals_null: bool,
    ) -> Result<Self>
    where
        H: Into<String>,
        R: IntoIterator<Item = Option<S>>,
        S: AsRef<str>,
    {
        let schema = RelationalSchema::new(name, headers);
        let width = schema.num_columns();
        let mut rodeo: Rodeo<Spur> = Rodeo::new();
        let mut values: Vec<Vec<Option<Cell>>> = vec![Vec::new(); width];

        for (row, record) in rows.into_iter().enumerate() {
            check_row_count(row + 1)?;
            let mut found = 0;
            for cell in record {
                let column = values.get_mut(found).ok_or(ProfilingError::RaggedRow {
                    row,
                    expected: width,
                    found: found + 1,
                })?;
                column.push(match cell {
                    Some(text) => Some(Cell::Value(rodeo.get_or_intern(text.as_ref()))),
                    None if null_equals_null => Some(Cell::Null),
                    None => None,
                });
                found += 1;
            }
            if found != width {
                return Err(ProfilingError::RaggedRow {
                    row,
                    expected: width,
                    found,
                });
            }
        }

        debug!(
            relation = name,
            columns = width,
            distinct_values = rodeo.len(),
            "interned relation"
        );
        let partitions = values.into_iter().map(Partition::from_values).collect();
        ColumnLayoutRelation::new(schema, partitions, null_equals_null)
    }

    /// The relation's schema.
    pub fn schema(&self) -> &RelationalSchema {
        &self.schema
    }

    /// All column data, in schema order.
    pub fn columns(&self) -> &[ColumnData] {
        &self.columns
    }

    /// The data of the column at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not a column of the schema.
    pub fn column(&self, index: usize) -> &ColumnData {
        &self.columns[index]
    }

    /// The number of columns.
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// The number of rows.
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// The number of unordered pairs of distinct rows, `n(n-1)/2`.
    pub fn num_tuple_pairs(&self) -> u64 {
        let n = self.num_rows as u64;
        n * n.saturating_sub(1) / 2
    }

    /// Whether null cells were treated as equal to each other when partitioning.
    pub fn null_equals_null(&self) -> bool {
        self.null_equals_null
    }

    /// Returns `true` if the relation has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

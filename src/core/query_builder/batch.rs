//! Chunked multi-row writes shared by INSERT and REPLACE
//!
//! A batch is rendered as one statement per chunk:
//!
//! ```text
//! INSERT INTO `t` (`a`, `b`) VALUES
//! (:a_0, :b_0),
//! (:a_1, NOW())
//! ```
//!
//! Chunk boundaries are chosen from an estimate of each row rendered as literal SQL, against
//! the connection's statement size limit minus the header, reduced by
//! [`CHUNK_SAFETY_MARGIN`]. A chunk also never carries more bind parameters than the driver
//! accepts in one statement. Several chunks are written inside one transaction, so either
//! every row is written or none is.

use super::{insert_bind, param_stem, Statement};
use crate::core::connection::Connection;
use crate::core::debug::CallSite;
use crate::core::error::{DatabaseError, QueryErrorKind, Result};
use crate::core::expression::{ColumnValue, Record};
use crate::core::value::{Binds, DatabaseValue};
use std::ops::Range;

/// Share of the free statement size a chunk may fill; the rest absorbs placeholder overhead
pub const CHUNK_SAFETY_MARGIN: f64 = 0.95;

/// A single row does not fit into one statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error(
    "Too much data to insert in one row. Attempted to insert {} Kb in one row when a maximum of {} Kb is allowed.",
    kb(.row_len),
    kb(.allowed)
)]
pub struct OversizedRow {
    /// Position of the row in the batch
    pub index: usize,
    /// Estimated rendered length of the row
    pub row_len: usize,
    /// Payload size available per statement
    pub allowed: usize,
}

fn kb(bytes: &usize) -> f64 {
    (*bytes as f64 / 1024.0).round()
}

/// Estimated length of a row rendered as `('v1', 'v2'),\n`
pub fn estimate_row_len(row: &Record) -> usize {
    let cells: usize = row.iter().map(|(_, value)| value.text_len()).sum();
    cells + 4 * row.len() + 2
}

/// Split rows into consecutive chunks whose summed length stays below `allowed`
///
/// A chunk of several rows always sums to less than `allowed` and holds at most `max_rows`
/// rows; a row that alone reaches the length limit gets a chunk of its own. Chunks are
/// never empty.
///
/// # Errors
///
/// Returns [`OversizedRow`] for the first row longer than `allowed`.
pub fn plan_chunks(
    lengths: &[usize],
    allowed: f64,
    max_rows: usize,
) -> std::result::Result<Vec<Range<usize>>, OversizedRow> {
    let max_rows = max_rows.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut part_len = 0;

    for (i, &len) in lengths.iter().enumerate() {
        if len as f64 > allowed {
            return Err(OversizedRow {
                index: i,
                row_len: len,
                allowed: allowed as usize,
            });
        }

        part_len += len;
        if i > start && (part_len as f64 >= allowed || i - start >= max_rows) {
            chunks.push(start..i);
            start = i;
            part_len = len;
        }
    }

    if start < lengths.len() {
        chunks.push(start..lengths.len());
    }

    Ok(chunks)
}

/// One multi-row write ready to be rendered
pub(crate) struct BatchWrite<'a> {
    pub(crate) conn: &'a Connection,
    /// `INSERT`, `INSERT IGNORE`, `REPLACE`, ...
    pub(crate) verb: &'a str,
    pub(crate) table: &'a str,
    pub(crate) rows: &'a [Record],
    /// Builder binds, merged into every chunk that inlines an expression
    pub(crate) binds: &'a Binds,
}

impl BatchWrite<'_> {
    /// Columns of the first row, validated against every row
    fn columns(&self) -> Result<Vec<&str>> {
        let first = self.rows.first().ok_or_else(|| {
            DatabaseError::validation(format!(
                "Cannot perform {} query with an empty value list.",
                self.verb
            ))
        })?;

        let columns: Vec<&str> = first.columns().collect();
        for column in &columns {
            super::validate_column(column)?;
        }

        for row in self.rows {
            if let Some(missing) = columns.iter().find(|c| row.get(c).is_none()) {
                return Err(DatabaseError::validation(format!(
                    "One of the rows does not contain value for the column '{}'.",
                    missing
                )));
            }
        }

        Ok(columns)
    }

    /// Render the batch as one statement per chunk
    ///
    /// # Errors
    ///
    /// Returns a validation error for bad columns, incomplete rows or bind name collisions,
    /// and a [`QueryError`](crate::core::error::QueryError) of kind
    /// [`OversizedRow`](QueryErrorKind::OversizedRow) if a row cannot fit into one statement.
    pub(crate) fn statements(&self) -> Result<Vec<Statement>> {
        let columns = self.columns()?;
        let header = format!(
            "{} INTO {} (`{}`) VALUES\n",
            self.verb,
            self.table,
            columns.join("`, `")
        );

        let allowed =
            self.conn.max_query_length().saturating_sub(header.len()) as f64 * CHUNK_SAFETY_MARGIN;
        let lengths: Vec<usize> = self.rows.iter().map(estimate_row_len).collect();

        // Builder binds ride along with chunks that inline an expression
        let max_rows = self
            .conn
            .max_bind_params()
            .saturating_sub(self.binds.len())
            / columns.len().max(1);

        let chunks = plan_chunks(&lengths, allowed, max_rows).map_err(|oversized| {
            let row = &self.rows[oversized.index];
            let snapshot = row.iter().map(|(column, value)| {
                let value = match value {
                    ColumnValue::Value(v) => v.clone(),
                    ColumnValue::Expression(expr) => DatabaseValue::from(expr.as_str()),
                };
                (column.to_string(), value)
            });
            self.conn.report(
                self.conn
                    .error(QueryErrorKind::OversizedRow, oversized.to_string())
                    .with_query(&header, snapshot),
            )
        })?;

        chunks
            .into_iter()
            .map(|range| self.render_chunk(&header, &columns, &self.rows[range]))
            .collect()
    }

    fn render_chunk(&self, header: &str, columns: &[&str], rows: &[Record]) -> Result<Statement> {
        let mut binds = Binds::new();
        let mut inlined = false;
        let mut lines = Vec::with_capacity(rows.len());

        for (i, row) in rows.iter().enumerate() {
            let mut placeholders = Vec::with_capacity(columns.len());

            for column in columns {
                let Some(value) = row.get(column) else {
                    continue;
                };

                if value.is_null() {
                    tracing::warn!(
                        table = %self.table,
                        column = %column,
                        "missing value for column, inserting NULL; use Expression::null() to insert NULL explicitly"
                    );
                    placeholders.push("NULL".to_string());
                } else if let Some(sql) = value.inline_sql() {
                    placeholders.push(sql.to_string());
                    inlined = true;
                } else if let ColumnValue::Value(v) = value {
                    let name = format!(":{}_{}", param_stem(column), i);
                    insert_bind(&mut binds, name.clone(), v.clone())?;
                    placeholders.push(name);
                }
            }

            lines.push(format!("({})", placeholders.join(", ")));
        }

        if inlined {
            for (name, value) in self.binds {
                insert_bind(&mut binds, name.clone(), value.clone())?;
            }
        }

        Ok(Statement {
            sql: format!("{}{}", header, lines.join(",\n")),
            binds,
        })
    }

    /// Write the batch, returning the summed affected row count
    ///
    /// A single chunk is written directly. Several chunks run inside `begin`/`commit`; if any
    /// chunk fails the transaction is rolled back and the chunk's error is returned. `caller`
    /// is recorded in the transaction trace.
    pub(crate) async fn execute(&self, caller: CallSite) -> Result<u64> {
        let statements = self.statements()?;

        if let [statement] = statements.as_slice() {
            let output = self.conn.query(&statement.sql, &statement.binds).await?;
            return Ok(output.affected_rows);
        }

        tracing::debug!(
            connection = %self.conn.name(),
            table = %self.table,
            chunks = statements.len(),
            rows = self.rows.len(),
            "writing batch in chunks"
        );

        self.conn.begin_at(caller).await?;

        let mut total = 0;
        for statement in &statements {
            match self.conn.query(&statement.sql, &statement.binds).await {
                Ok(output) => total += output.affected_rows,
                Err(err) => {
                    self.conn.rollback_after_failure(caller).await;
                    return Err(err);
                }
            }
        }

        self.conn.commit_at(caller).await?;
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::expression::Expression;

    #[test]
    fn test_estimate_row_len() {
        let row = Record::new().set("a", "xyz").set("b", 12345);
        // ('xyz', '12345'),\n
        assert_eq!(estimate_row_len(&row), "('xyz', '12345'),\n".len());

        let row = Record::new().set("a", Expression::now());
        assert_eq!(estimate_row_len(&row), "('NOW()'),\n".len());
    }

    #[test]
    fn test_plan_single_chunk() {
        let chunks = plan_chunks(&[10, 10, 10], 100.0, usize::MAX).unwrap();
        assert_eq!(chunks, vec![0..3]);

        assert!(plan_chunks(&[], 100.0, usize::MAX).unwrap().is_empty());
    }

    #[test]
    fn test_plan_splits_when_limit_is_reached() {
        // 40 + 40 = 80 < 100, + 40 = 120 starts a new chunk
        let chunks = plan_chunks(&[40, 40, 40, 40, 40], 100.0, usize::MAX).unwrap();
        assert_eq!(chunks, vec![0..2, 2..4, 4..5]);

        // reaching the limit exactly also starts a new chunk
        let chunks = plan_chunks(&[50, 50, 50], 100.0, usize::MAX).unwrap();
        assert_eq!(chunks, vec![0..1, 1..2, 2..3]);
    }

    #[test]
    fn test_plan_row_at_limit_gets_own_chunk() {
        let chunks = plan_chunks(&[100, 10], 100.0, usize::MAX).unwrap();
        assert_eq!(chunks, vec![0..1, 1..2]);
    }

    #[test]
    fn test_plan_caps_rows_per_chunk() {
        // Short rows fit the length limit, the row cap splits them
        let chunks = plan_chunks(&[1; 7], 1000.0, 3).unwrap();
        assert_eq!(chunks, vec![0..3, 3..6, 6..7]);

        // 20,000 rows of 4 columns against the SQLite parameter limit
        let lengths = vec![40; 20_000];
        let max_rows = 32766 / 4;
        let chunks = plan_chunks(&lengths, 5.0 * 1024.0 * 1024.0, max_rows).unwrap();
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|chunk| chunk.len() <= max_rows));

        // A zero cap still makes progress
        assert_eq!(plan_chunks(&[1, 1], 1000.0, 0).unwrap(), vec![0..1, 1..2]);
    }

    #[test]
    fn test_plan_oversized_row() {
        let err = plan_chunks(&[10, 3000, 10], 2048.0, usize::MAX).unwrap_err();
        assert_eq!(err.index, 1);
        assert_eq!(err.row_len, 3000);
        assert_eq!(
            err.to_string(),
            "Too much data to insert in one row. Attempted to insert 3 Kb in one row when a maximum of 2 Kb is allowed."
        );
    }
}

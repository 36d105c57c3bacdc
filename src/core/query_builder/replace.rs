//! REPLACE builder

use super::batch::BatchWrite;
use super::insert::checked_row;
use super::{Statement, StatementBuilder, StatementState};
use crate::core::connection::Connection;
use crate::core::debug::CallSite;
use crate::core::error::{DatabaseError, Result};
use crate::core::expression::Record;
use std::future::Future;
use std::panic::Location;

/// Multi-row REPLACE: rows with an existing unique key replace the stored row
///
/// Chunking and transaction handling are the same as for
/// [`InsertBuilder`](super::InsertBuilder).
#[derive(Debug, Clone)]
pub struct ReplaceBuilder {
    conn: Connection,
    state: StatementState,
    rows: Vec<Record>,
}

impl ReplaceBuilder {
    pub(crate) fn new(conn: &Connection) -> Self {
        Self {
            conn: conn.clone(),
            state: StatementState::default(),
            rows: Vec::new(),
        }
    }

    /// Set the target table
    ///
    /// # Errors
    ///
    /// Returns a validation error for invalid table names.
    pub fn table(mut self, table: &str) -> Result<Self> {
        self.state.set_table(table)?;
        Ok(self)
    }

    /// Add one row
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty row or an empty column name.
    pub fn row(mut self, row: impl Into<Record>) -> Result<Self> {
        self.rows.push(checked_row(row.into())?);
        Ok(self)
    }

    /// Add several rows
    ///
    /// # Errors
    ///
    /// Same as [`row`](Self::row); no row is added if any of them is rejected.
    pub fn values<I, R>(mut self, rows: I) -> Result<Self>
    where
        I: IntoIterator<Item = R>,
        R: Into<Record>,
    {
        let rows = rows
            .into_iter()
            .map(|row| checked_row(row.into()))
            .collect::<Result<Vec<_>>>()?;
        self.rows.extend(rows);
        Ok(self)
    }

    fn batch(&self) -> Result<BatchWrite<'_>> {
        let table = self.state.table().ok_or_else(|| {
            DatabaseError::validation(
                "You are trying to perform a REPLACE query with an empty table name. Use table() for setting table name.",
            )
        })?;

        if self.rows.is_empty() {
            return Err(DatabaseError::validation(
                "Cannot perform REPLACE query with an empty value list.",
            ));
        }

        if self.state.has_arrays() {
            return Err(DatabaseError::validation(
                "Array binds are not supported in REPLACE queries",
            ));
        }

        Ok(BatchWrite {
            conn: &self.conn,
            verb: "REPLACE",
            table,
            rows: &self.rows,
            binds: self.state.binds(),
        })
    }

    /// Render the statements `execute()` would run, one per chunk
    ///
    /// # Errors
    ///
    /// Same as [`execute`](Self::execute), without touching the database.
    pub fn build(&self) -> Result<Vec<Statement>> {
        self.batch()?.statements()
    }

    /// Replace all rows, returning the affected row count reported by the driver
    ///
    /// MySQL counts a replaced row twice (delete + insert).
    ///
    /// # Errors
    ///
    /// Same as [`InsertBuilder::execute`](super::InsertBuilder::execute).
    #[track_caller]
    pub fn execute(&mut self) -> impl Future<Output = Result<u64>> + Send + '_ {
        let caller = CallSite::from(Location::caller());
        async move {
            let affected = self.batch()?.execute(caller).await?;
            self.state.clear();
            self.rows.clear();
            Ok(affected)
        }
    }
}

impl StatementBuilder for ReplaceBuilder {
    fn state_mut(&mut self) -> &mut StatementState {
        &mut self.state
    }
}

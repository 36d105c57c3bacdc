//! SELECT builder
//!
//! A select moves through three phases:
//!
//! 1. configuring: SQL text and binds are set;
//! 2. executed: `execute()` ran the statement and holds the result rows;
//! 3. draining: at least one row was fetched.
//!
//! Exhausting the rows with [`fetch`](SelectBuilder::fetch), or any of the bulk fetch
//! methods, returns the builder to configuring. The SQL text survives the reset, so the same
//! statement can be bound and executed again.

use super::{StatementBuilder, StatementState};
use crate::core::connection::Connection;
use crate::core::error::{DatabaseError, Result};
use crate::core::value::{DatabaseResult, DatabaseRow, DatabaseValue};
use indexmap::IndexMap;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
struct ResultSet {
    sql: String,
    rows: VecDeque<DatabaseRow>,
    row_count: u64,
}

#[derive(Debug, Clone)]
enum Phase {
    Configuring,
    Executed(ResultSet),
    Draining(ResultSet),
}

/// Parameterized SELECT with a fetch cursor
///
/// # Example
///
/// ```ignore
/// let mut select = conn.select("SELECT id, name FROM users WHERE status = :status");
///
/// let names = select
///     .bind("status", "active")?
///     .execute()
///     .await?
///     .fetch_column_values_keyed("name", "id")?;
/// ```
#[derive(Debug, Clone)]
pub struct SelectBuilder {
    conn: Connection,
    unbuffered: Option<Connection>,
    state: StatementState,
    query: String,
    phase: Phase,
}

impl SelectBuilder {
    pub(crate) fn new(conn: &Connection) -> Self {
        Self {
            conn: conn.clone(),
            unbuffered: None,
            state: StatementState::default(),
            query: String::new(),
            phase: Phase::Configuring,
        }
    }

    /// Set the SQL text; an executed builder is reset first
    #[must_use]
    pub fn query(mut self, sql: impl Into<String>) -> Self {
        if !matches!(self.phase, Phase::Configuring) {
            self.reset();
        }
        self.query = sql.into();
        self
    }

    /// Route this builder through the unbuffered variant of its connection
    ///
    /// The unbuffered connection is opened on first use and kept for the lifetime of the
    /// builder, across resets.
    ///
    /// # Errors
    ///
    /// Returns a protocol error after `execute()`, or the error of opening the unbuffered
    /// connection.
    pub async fn unbuffered(mut self) -> Result<Self> {
        if !matches!(self.phase, Phase::Configuring) {
            return Err(DatabaseError::protocol(
                "unbuffered() must be called before execute()",
            ));
        }

        if self.unbuffered.is_none() {
            self.unbuffered = Some(self.conn.unbuffered().await?);
        }
        Ok(self)
    }

    /// Check if the builder runs on the unbuffered connection
    pub fn is_unbuffered(&self) -> bool {
        self.unbuffered.is_some()
    }

    /// SQL text: the statement as sent (arrays expanded) once executed, the configured text
    /// before
    pub fn sql(&self) -> &str {
        match &self.phase {
            Phase::Configuring => &self.query,
            Phase::Executed(result) | Phase::Draining(result) => &result.sql,
        }
    }

    /// Run the statement
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the builder was already executed and not reset, a
    /// validation error if no SQL text is set or an array placeholder is missing, and a
    /// [`QueryError`] if the statement fails.
    ///
    /// [`QueryError`]: crate::core::error::QueryError
    pub async fn execute(&mut self) -> Result<&mut Self> {
        if !matches!(self.phase, Phase::Configuring) {
            return Err(DatabaseError::protocol(
                "Query already executed. Use fetch(), fetch_all(), fetch_column_values() or fetch_value() to retrieve the result, or reset()",
            ));
        }

        if self.query.trim().is_empty() {
            return Err(DatabaseError::validation(
                "Query string is not set. Use query() for setting query string.",
            ));
        }

        let (sql, binds) = self.state.expand(&self.query)?;
        let conn = self.unbuffered.as_ref().unwrap_or(&self.conn);
        let output = conn.query(&sql, &binds).await?;

        self.state.clear();
        self.phase = Phase::Executed(ResultSet {
            sql,
            rows: output.rows.into(),
            row_count: output.affected_rows,
        });
        Ok(self)
    }

    fn rows_mut(&mut self, operation: &str) -> Result<&mut VecDeque<DatabaseRow>> {
        match &mut self.phase {
            Phase::Configuring => Err(DatabaseError::protocol(format!(
                "The execute() method must be called before {}()",
                operation
            ))),
            Phase::Executed(result) | Phase::Draining(result) => Ok(&mut result.rows),
        }
    }

    /// Take every remaining row and reset
    fn drain(&mut self, operation: &str) -> Result<DatabaseResult> {
        let rows = std::mem::take(self.rows_mut(operation)?);
        self.reset();
        Ok(rows.into())
    }

    /// Next row, or `None` once the rows are exhausted (which resets the builder)
    ///
    /// # Errors
    ///
    /// Returns a protocol error before `execute()`.
    pub fn fetch(&mut self) -> Result<Option<DatabaseRow>> {
        let Some(row) = self.rows_mut("fetch")?.pop_front() else {
            self.reset();
            return Ok(None);
        };

        self.phase = match std::mem::replace(&mut self.phase, Phase::Configuring) {
            Phase::Executed(result) => Phase::Draining(result),
            phase => phase,
        };
        Ok(Some(row))
    }

    /// All remaining rows
    ///
    /// # Errors
    ///
    /// Returns a protocol error before `execute()`.
    pub fn fetch_all(&mut self) -> Result<DatabaseResult> {
        self.drain("fetch_all")
    }

    /// All remaining rows keyed by the text of column `key`
    ///
    /// Later rows overwrite earlier rows with the same key.
    ///
    /// # Errors
    ///
    /// Returns a protocol error before `execute()`, and a validation error if the result is
    /// not empty and has no column `key`.
    pub fn fetch_all_keyed(&mut self, key: &str) -> Result<IndexMap<String, DatabaseRow>> {
        let rows = self.drain("fetch_all")?;
        require_column(&rows, key)?;

        Ok(rows
            .into_iter()
            .map(|row| (key_text(&row, key), row))
            .collect())
    }

    /// Values of one column of all remaining rows
    ///
    /// # Errors
    ///
    /// Returns a protocol error before `execute()`, and a validation error if the result is
    /// not empty and has no such column.
    pub fn fetch_column_values(&mut self, column: &str) -> Result<Vec<DatabaseValue>> {
        let rows = self.drain("fetch_column_values")?;
        require_column(&rows, column)?;

        Ok(rows
            .into_iter()
            .filter_map(|mut row| row.swap_remove(column))
            .collect())
    }

    /// Values of one column keyed by the text of column `key`
    ///
    /// # Errors
    ///
    /// Same as [`fetch_column_values`](Self::fetch_column_values), for either column.
    pub fn fetch_column_values_keyed(
        &mut self,
        column: &str,
        key: &str,
    ) -> Result<IndexMap<String, DatabaseValue>> {
        let rows = self.drain("fetch_column_values")?;
        require_column(&rows, column)?;
        require_column(&rows, key)?;

        Ok(rows
            .into_iter()
            .map(|mut row| {
                let key = key_text(&row, key);
                let value = row.swap_remove(column).unwrap_or(DatabaseValue::Null);
                (key, value)
            })
            .collect())
    }

    /// Value of `column` (or of the first column) in the next row, then reset
    ///
    /// Returns `None` when there is no row.
    ///
    /// # Errors
    ///
    /// Returns a protocol error before `execute()`, and a validation error if the row has no
    /// column `column`.
    pub fn fetch_value(&mut self, column: Option<&str>) -> Result<Option<DatabaseValue>> {
        let row = self.rows_mut("fetch_value")?.pop_front();
        self.reset();

        let Some(mut row) = row else {
            return Ok(None);
        };

        match column {
            None => Ok(row.swap_remove_index(0).map(|(_, value)| value)),
            Some(column) => match row.swap_remove(column) {
                Some(value) => Ok(Some(value)),
                None => Err(DatabaseError::validation(format!(
                    "The column with name '{}' does not exist in resulted row.",
                    column
                ))),
            },
        }
    }

    /// Row count reported by the driver; `None` until executed and after a reset
    pub fn row_count(&self) -> Option<u64> {
        match &self.phase {
            Phase::Configuring => None,
            Phase::Executed(result) | Phase::Draining(result) => Some(result.row_count),
        }
    }

    /// Drop the result and the binds, keeping the SQL text
    pub fn reset(&mut self) {
        self.state.clear();
        self.phase = Phase::Configuring;
    }
}

impl StatementBuilder for SelectBuilder {
    fn state_mut(&mut self) -> &mut StatementState {
        &mut self.state
    }
}

fn require_column(rows: &DatabaseResult, column: &str) -> Result<()> {
    match rows.first() {
        Some(first) if !first.contains_key(column) => Err(DatabaseError::validation(format!(
            "Column '{}' does not exist in result set.",
            column
        ))),
        _ => Ok(()),
    }
}

fn key_text(row: &DatabaseRow, key: &str) -> String {
    row.get(key).map(DatabaseValue::as_string).unwrap_or_default()
}

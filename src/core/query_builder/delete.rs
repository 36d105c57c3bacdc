//! DELETE builder

use super::{Statement, StatementBuilder, StatementState};
use crate::core::connection::Connection;
use crate::core::database_types::DatabaseType;
use crate::core::error::{DatabaseError, Result};

/// DELETE with a mandatory WHERE clause
///
/// Emptying a whole table is only possible through
/// [`Connection::truncate`](crate::core::connection::Connection::truncate).
#[derive(Debug, Clone)]
pub struct DeleteBuilder {
    conn: Connection,
    state: StatementState,
    limit: Option<u64>,
}

impl DeleteBuilder {
    pub(crate) fn new(conn: &Connection) -> Self {
        Self {
            conn: conn.clone(),
            state: StatementState::default(),
            limit: None,
        }
    }

    /// Set the target table
    ///
    /// # Errors
    ///
    /// Returns a validation error for invalid table names.
    pub fn from(mut self, table: &str) -> Result<Self> {
        self.state.set_table(table)?;
        Ok(self)
    }

    /// Set the WHERE condition
    #[must_use]
    pub fn where_clause(mut self, conditions: &str) -> Self {
        self.state.set_where(conditions);
        self
    }

    /// Delete at most `limit` rows
    ///
    /// # Errors
    ///
    /// Returns a validation error if `limit` is zero.
    pub fn limit(mut self, limit: u64) -> Result<Self> {
        if limit == 0 {
            return Err(DatabaseError::validation(format!(
                "Invalid value for LIMIT: '{}'",
                limit
            )));
        }
        self.limit = Some(limit);
        Ok(self)
    }

    /// Render the statement `execute()` would run
    ///
    /// # Errors
    ///
    /// Same as [`execute`](Self::execute), without touching the database.
    pub fn build(&self) -> Result<Statement> {
        let where_text = self.state.where_text().ok_or_else(|| {
            DatabaseError::validation(
                "You are trying to perform a DELETE query without WHERE conditions. Use Connection::truncate() to empty a table; unlike DELETE it also resets auto-increment counters.",
            )
        })?;

        let table = self.state.table().ok_or_else(|| {
            DatabaseError::validation(
                "You are trying to perform a DELETE query with an empty table name. Use from() for setting table name.",
            )
        })?;

        let sql = match (self.limit, self.conn.database_type()) {
            (None, _) => format!("DELETE FROM {}\n{}", table, where_text),
            (Some(limit), DatabaseType::Mysql) => {
                format!("DELETE FROM {}\n{}\nLIMIT {}", table, where_text, limit)
            }
            // SQLite is usually built without DELETE ... LIMIT
            (Some(limit), DatabaseType::Sqlite) => format!(
                "DELETE FROM {table}\nWHERE rowid IN (SELECT rowid FROM {table}\n{where_text}\nLIMIT {limit})",
            ),
        };

        let (sql, binds) = self.state.expand(&sql)?;
        Ok(Statement { sql, binds })
    }

    /// Run the delete, returning the number of deleted rows
    ///
    /// # Errors
    ///
    /// Returns a validation error if the WHERE clause or the table is missing, and a
    /// [`QueryError`] if the statement fails.
    ///
    /// [`QueryError`]: crate::core::error::QueryError
    pub async fn execute(&mut self) -> Result<u64> {
        let statement = self.build()?;
        let output = self.conn.query(&statement.sql, &statement.binds).await?;

        self.state.clear();
        self.limit = None;
        Ok(output.affected_rows)
    }
}

impl StatementBuilder for DeleteBuilder {
    fn state_mut(&mut self) -> &mut StatementState {
        &mut self.state
    }
}

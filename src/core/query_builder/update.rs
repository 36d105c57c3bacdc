//! UPDATE builder

use super::{insert_bind, param_stem, validate_column, Statement, StatementBuilder, StatementState};
use crate::core::connection::Connection;
use crate::core::error::{DatabaseError, Result};
use crate::core::expression::{ColumnValue, Expression};
use indexmap::IndexMap;

/// Suffix of the parameters generated for SET values
const AUTO_PARAM_SUFFIX: &str = "_auto_generated";

/// UPDATE with generated parameters for the SET list
///
/// Each value `col` is bound as `:col_auto_generated`, so the WHERE clause can use its own
/// `:col` bind without a clash.
///
/// # Example
///
/// ```ignore
/// let updated = conn
///     .update("users")?
///     .value("status", "inactive")?
///     .value("updated", Expression::now())?
///     .where_clause("id IN (:ids)")
///     .bind_array("ids", [3, 5])?
///     .execute()
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct UpdateBuilder {
    conn: Connection,
    state: StatementState,
    values: IndexMap<String, ColumnValue>,
}

impl UpdateBuilder {
    pub(crate) fn new(conn: &Connection) -> Self {
        Self {
            conn: conn.clone(),
            state: StatementState::default(),
            values: IndexMap::new(),
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

    /// Set the WHERE condition; blank text leaves the statement unconditional
    #[must_use]
    pub fn where_clause(mut self, conditions: &str) -> Self {
        self.state.set_where(conditions);
        self
    }

    /// Set one column
    ///
    /// An unset value (`None`, [`DatabaseValue::Null`](crate::core::value::DatabaseValue::Null))
    /// is written as `NULL` with a warning; use [`Expression::null`] to write NULL on purpose.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the column name is empty or has characters outside
    /// `[A-Za-z0-9_-]`.
    pub fn value(mut self, column: &str, value: impl Into<ColumnValue>) -> Result<Self> {
        validate_column(column)?;

        let mut value = value.into();
        if value.is_null() {
            tracing::warn!(
                column = %column,
                "missing value for column, setting NULL; use Expression::null() to set NULL explicitly"
            );
            value = Expression::null().into();
        }

        self.values.insert(column.to_string(), value);
        Ok(self)
    }

    /// Set several columns
    ///
    /// # Errors
    ///
    /// Same as [`value`](Self::value), for the first offending column.
    pub fn values<I, K, V>(mut self, values: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<ColumnValue>,
    {
        for (column, value) in values {
            self = self.value(column.as_ref(), value)?;
        }
        Ok(self)
    }

    /// Render the statement `execute()` would run
    ///
    /// # Errors
    ///
    /// Same as [`execute`](Self::execute), without touching the database.
    pub fn build(&self) -> Result<Statement> {
        let table = self.state.table().ok_or_else(|| {
            DatabaseError::validation(
                "You are trying to perform an UPDATE query with an empty table name. Use table() for setting table name.",
            )
        })?;

        if self.values.is_empty() {
            return Err(DatabaseError::validation(
                "Cannot perform UPDATE query with an empty value list.",
            ));
        }

        let mut sql = format!("UPDATE {} SET\n", table);
        let mut assignments = Vec::with_capacity(self.values.len());
        let mut generated = Vec::new();

        for (column, value) in &self.values {
            match value.inline_sql() {
                Some(inline) => assignments.push(format!("`{}` = {}", column, inline)),
                None => {
                    let name = format!(":{}{}", param_stem(column), AUTO_PARAM_SUFFIX);
                    if self.state.binds().contains_key(&name) {
                        return Err(DatabaseError::validation(format!(
                            "The same placeholder '{}' exists in both values and binds.",
                            name
                        )));
                    }
                    assignments.push(format!("`{}` = {}", column, name));
                    if let ColumnValue::Value(v) = value {
                        generated.push((name, v.clone()));
                    }
                }
            }
        }

        sql.push_str(&assignments.join(",\n"));
        if let Some(where_text) = self.state.where_text() {
            sql.push('\n');
            sql.push_str(where_text);
        }

        let (sql, mut binds) = self.state.expand(&sql)?;
        for (name, value) in generated {
            insert_bind(&mut binds, name, value)?;
        }

        Ok(Statement { sql, binds })
    }

    /// Run the update, returning the affected row count reported by the driver
    ///
    /// # Errors
    ///
    /// Returns a validation error if the table or the values are missing, or a generated
    /// parameter name is already bound. Returns a [`QueryError`] if the statement fails.
    ///
    /// [`QueryError`]: crate::core::error::QueryError
    pub async fn execute(&mut self) -> Result<u64> {
        let statement = self.build()?;
        let output = self.conn.query(&statement.sql, &statement.binds).await?;

        self.state.clear();
        self.values.clear();
        Ok(output.affected_rows)
    }
}

impl StatementBuilder for UpdateBuilder {
    fn state_mut(&mut self) -> &mut StatementState {
        &mut self.state
    }
}

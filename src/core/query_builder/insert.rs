//! INSERT builder

use super::batch::BatchWrite;
use super::{Statement, StatementBuilder, StatementState};
use crate::core::connection::Connection;
use crate::core::debug::CallSite;
use crate::core::error::{DatabaseError, Result};
use crate::core::expression::Record;
use std::future::Future;
use std::panic::Location;
use std::str::FromStr;

/// Behavior on a duplicate key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnDuplicate {
    /// Skip rows that would violate a unique key
    Ignore,
}

impl FromStr for OnDuplicate {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "ignore" => Ok(OnDuplicate::Ignore),
            _ => Err(DatabaseError::validation(format!(
                "Unsupported on duplicate mode '{}'",
                s
            ))),
        }
    }
}

/// Multi-row INSERT
///
/// Rows accumulate across [`row`](Self::row) and [`values`](Self::values) calls; the columns
/// are those of the first row. Large row sets are split into several statements written in
/// one transaction.
///
/// # Example
///
/// ```ignore
/// let inserted = conn
///     .insert("users")?
///     .values([
///         Record::new().set("name", "Alice").set("created", Expression::now()),
///         Record::new().set("name", "Bob").set("created", Expression::now()),
///     ])?
///     .execute()
///     .await?;
/// assert_eq!(inserted, 2);
/// ```
#[derive(Debug, Clone)]
pub struct InsertBuilder {
    conn: Connection,
    state: StatementState,
    rows: Vec<Record>,
    on_duplicate: Option<OnDuplicate>,
}

impl InsertBuilder {
    pub(crate) fn new(conn: &Connection) -> Self {
        Self {
            conn: conn.clone(),
            state: StatementState::default(),
            rows: Vec::new(),
            on_duplicate: None,
        }
    }

    /// Set the target table
    ///
    /// # Errors
    ///
    /// Returns a validation error for invalid table names.
    pub fn into_table(mut self, table: &str) -> Result<Self> {
        self.state.set_table(table)?;
        Ok(self)
    }

    /// Set the duplicate key mode by name; only `"ignore"` is supported
    ///
    /// # Errors
    ///
    /// Returns a validation error for any other mode.
    pub fn on_duplicate(mut self, mode: &str) -> Result<Self> {
        self.on_duplicate = Some(mode.parse()?);
        Ok(self)
    }

    /// Skip rows that would violate a unique key (`INSERT IGNORE`)
    #[must_use]
    pub fn ignore(mut self) -> Self {
        self.on_duplicate = Some(OnDuplicate::Ignore);
        self
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

    /// Number of rows added so far
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if no rows were added
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn batch(&self) -> Result<BatchWrite<'_>> {
        let table = self.state.table().ok_or_else(|| {
            DatabaseError::validation(
                "You are trying to perform an INSERT query with an empty table name. Use into_table() for setting table name.",
            )
        })?;

        if self.rows.is_empty() {
            return Err(DatabaseError::validation(
                "Cannot perform INSERT query with an empty value list.",
            ));
        }

        if self.state.has_arrays() {
            return Err(DatabaseError::validation(
                "Array binds are not supported in INSERT queries",
            ));
        }

        let verb = match self.on_duplicate {
            Some(OnDuplicate::Ignore) => self.conn.database_type().insert_ignore(),
            None => "INSERT",
        };

        Ok(BatchWrite {
            conn: &self.conn,
            verb,
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

    /// Insert all rows, returning the number of inserted rows
    ///
    /// # Errors
    ///
    /// Returns a validation error if the table or the rows are missing, a column name is
    /// invalid or a row lacks a column of the first row. Returns a [`QueryError`] if a row
    /// is too large for one statement or a statement fails; in that case nothing is written.
    ///
    /// [`QueryError`]: crate::core::error::QueryError
    #[track_caller]
    pub fn execute(&mut self) -> impl Future<Output = Result<u64>> + Send + '_ {
        let caller = CallSite::from(Location::caller());
        async move {
            let inserted = self.batch()?.execute(caller).await?;
            self.clear();
            Ok(inserted)
        }
    }

    fn clear(&mut self) {
        self.state.clear();
        self.rows.clear();
        self.on_duplicate = None;
    }
}

impl StatementBuilder for InsertBuilder {
    fn state_mut(&mut self) -> &mut StatementState {
        &mut self.state
    }
}

/// Reject rows without columns or with an empty column name
pub(super) fn checked_row(row: Record) -> Result<Record> {
    if row.is_empty() {
        return Err(DatabaseError::validation("Cannot add an empty row"));
    }
    if row.columns().any(str::is_empty) {
        return Err(DatabaseError::validation("Empty column name passed in a row"));
    }
    Ok(row)
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::core::expression::Expression;
    use crate::core::test_support::sqlite_registry;
    use crate::core::value::{Binds, DatabaseValue};

    async fn users_table(schema: &str) -> Result<Connection> {
        let conn = sqlite_registry(schema).connect("local").await?;
        conn.query(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL UNIQUE, note TEXT)",
            &Binds::new(),
        )
        .await?;
        Ok(conn)
    }

    #[test]
    fn test_on_duplicate_modes() {
        assert_eq!("ignore".parse::<OnDuplicate>().ok(), Some(OnDuplicate::Ignore));
        assert_eq!("IGNORE".parse::<OnDuplicate>().ok(), Some(OnDuplicate::Ignore));
        assert!(matches!(
            "update".parse::<OnDuplicate>(),
            Err(DatabaseError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_build_renders_per_row_placeholders() -> Result<()> {
        let conn = users_table("insert_render").await?;

        let statements = conn
            .insert("users")?
            .values([
                Record::new().set("name", "Alice").set("note", Expression::null()),
                Record::new().set("name", "Bob").set("note", "NOW()"),
            ])?
            .build()?;

        assert_eq!(statements.len(), 1);
        assert_eq!(
            statements[0].sql,
            "INSERT INTO `users` (`name`, `note`) VALUES\n(:name_0, NULL),\n(:name_1, NOW())"
        );
        assert_eq!(statements[0].binds.len(), 2);
        assert_eq!(
            statements[0].binds.get(":name_1"),
            Some(&DatabaseValue::from("Bob"))
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_execute_inserts_rows_and_clears() -> Result<()> {
        let conn = users_table("insert_execute").await?;

        let mut builder = conn.insert("users")?.values([
            Record::new().set("name", "Alice").set("note", "first"),
            Record::new().set("name", "Bob").set("note", Option::<String>::None),
        ])?;
        assert_eq!(builder.execute().await?, 2);
        assert!(builder.is_empty());

        let rows = conn
            .query("SELECT name, note FROM users ORDER BY id", &Binds::new())
            .await?
            .rows;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["note"], DatabaseValue::from("first"));
        assert_eq!(rows[1]["note"], DatabaseValue::Null);

        // the builder was cleared, including its table
        assert!(matches!(
            builder.execute().await,
            Err(DatabaseError::Validation(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_ignore_skips_duplicates() -> Result<()> {
        let conn = users_table("insert_ignore").await?;
        conn.insert("users")?
            .row(Record::new().set("name", "Alice"))?
            .execute()
            .await?;

        let inserted = conn
            .insert("users")?
            .on_duplicate("ignore")?
            .values([
                Record::new().set("name", "Alice"),
                Record::new().set("name", "Carol"),
            ])?
            .execute()
            .await?;
        assert_eq!(inserted, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_expression_cells_use_builder_binds() -> Result<()> {
        let conn = users_table("insert_expression").await?;

        conn.insert("users")?
            .row(
                Record::new()
                    .set("name", Expression::new("UPPER(:raw)")?)
                    .set("note", "x"),
            )?
            .bind("raw", "dave")?
            .execute()
            .await?;

        let rows = conn
            .query("SELECT name FROM users", &Binds::new())
            .await?
            .rows;
        assert_eq!(rows[0]["name"], DatabaseValue::from("DAVE"));
        Ok(())
    }

    #[tokio::test]
    async fn test_validation_errors_reach_no_driver() -> Result<()> {
        let conn = users_table("insert_validation").await?;

        assert!(matches!(
            conn.insert("users")?.execute().await,
            Err(DatabaseError::Validation(_))
        ));
        assert!(matches!(
            conn.insert("users")?.row(Record::new()),
            Err(DatabaseError::Validation(_))
        ));
        assert!(matches!(
            conn.insert("users")?
                .row(Record::new().set("bad name", 1))?
                .execute()
                .await,
            Err(DatabaseError::Validation(_))
        ));

        let err = conn
            .insert("users")?
            .values([
                Record::new().set("name", "a").set("note", "x"),
                Record::new().set("name", "b"),
            ])?
            .execute()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("'note'"));

        assert!(conn.is_connected().await);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_insert_keeps_state() -> Result<()> {
        let conn = users_table("insert_failure").await?;
        let mut builder = conn
            .insert("users")?
            .row(Record::new().set("missing_column", 1))?;

        assert!(builder.execute().await.is_err());
        assert_eq!(builder.len(), 1);
        Ok(())
    }
}

//! Statement builders
//!
//! Every builder is created from a [`Connection`](super::connection::Connection), accumulates
//! a table, values, a WHERE clause and named binds, and renders parameterized SQL in
//! `execute()`. Builders are cleared after a successful `execute()` so the same value can be
//! configured again; on failure their state is kept.
//!
//! The bind bookkeeping shared by all builders lives in [`StatementState`] and is exposed
//! through the [`StatementBuilder`] trait.

mod batch;
mod delete;
mod insert;
mod replace;
mod select;
mod update;

pub use batch::{estimate_row_len, plan_chunks, OversizedRow, CHUNK_SAFETY_MARGIN};
pub use delete::DeleteBuilder;
pub use insert::{InsertBuilder, OnDuplicate};
pub use replace::ReplaceBuilder;
pub use select::SelectBuilder;
pub use update::UpdateBuilder;

use super::error::{DatabaseError, Result};
use super::value::{Binds, DatabaseValue};
use indexmap::IndexMap;
use regex::{NoExpand, Regex};
use std::sync::OnceLock;

fn table_name() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.`]+$").expect("valid regex"))
}

fn column_name() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid regex"))
}

/// Rendered statement: SQL text plus its named binds
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub binds: Binds,
}

/// Quote a table name
///
/// Only `[A-Za-z0-9_.`]` is accepted. A name that does not start with a backtick has each
/// dot-separated segment wrapped: `app.users` becomes `` `app`.`users` ``.
///
/// # Errors
///
/// Returns a validation error for empty names or names with other characters.
pub fn quote_table(name: &str) -> Result<String> {
    if !table_name().is_match(name) {
        return Err(DatabaseError::validation(format!(
            "Invalid table name '{}'",
            name
        )));
    }

    if name.starts_with('`') {
        Ok(name.to_string())
    } else {
        Ok(format!("`{}`", name.replace('.', "`.`")))
    }
}

/// Check a column name against `[A-Za-z0-9_-]+`
///
/// # Errors
///
/// Returns a validation error naming the column.
pub fn validate_column(name: &str) -> Result<()> {
    if column_name().is_match(name) {
        Ok(())
    } else {
        Err(DatabaseError::validation(format!(
            "Column name '{}' contains invalid characters or is empty",
            name
        )))
    }
}

/// Prefix a WHERE condition with `WHERE ` unless it already starts with it
///
/// Returns `None` for blank conditions.
pub fn where_clause(conditions: &str) -> Option<String> {
    let conditions = conditions.trim();
    if conditions.is_empty() {
        return None;
    }

    let has_keyword = conditions
        .get(..6)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("where "));

    if has_keyword {
        Some(conditions.to_string())
    } else {
        Some(format!("WHERE {}", conditions))
    }
}

/// Normalize a parameter name to its `:name` form
///
/// # Errors
///
/// Returns a validation error for empty names.
pub fn normalize_param(name: &str) -> Result<String> {
    let bare = name.strip_prefix(':').unwrap_or(name);
    if bare.is_empty() {
        return Err(DatabaseError::validation("Empty string passed as parameter"));
    }
    Ok(format!(":{}", bare))
}

/// Expand an array placeholder into one bound parameter per value
///
/// `IN (:ids)` with three values becomes `IN (:ids_0, :ids_1, :ids_2)` and `:ids_0`..`:ids_2`
/// are added to `binds`. The placeholder only matches as a whole word, so `:ids` does not
/// match inside `:ids_other`.
///
/// # Errors
///
/// Returns a validation error if the placeholder does not occur in `sql` or a generated name
/// is already bound.
pub fn inject_array(
    sql: &str,
    placeholder: &str,
    values: &[DatabaseValue],
    binds: &mut Binds,
) -> Result<String> {
    let pattern = Regex::new(&format!(r"{}\b", regex::escape(placeholder)))
        .map_err(|e| DatabaseError::validation(format!("Invalid placeholder '{}': {}", placeholder, e)))?;

    if !pattern.is_match(sql) {
        return Err(DatabaseError::validation(format!(
            "Error injecting array for binding. Placeholder '{}' was not found in the query.",
            placeholder
        )));
    }

    let mut names = Vec::with_capacity(values.len());
    for (i, value) in values.iter().enumerate() {
        let name = format!("{}_{}", placeholder, i);
        insert_bind(binds, name.clone(), value.clone())?;
        names.push(name);
    }

    Ok(pattern
        .replace_all(sql, NoExpand(&names.join(", ")))
        .into_owned())
}

/// Parameter name stem for a column; `-` is not valid in a parameter name
fn param_stem(column: &str) -> String {
    column.replace('-', "_")
}

fn insert_bind(binds: &mut Binds, name: String, value: DatabaseValue) -> Result<()> {
    if binds.contains_key(&name) {
        return Err(DatabaseError::validation(format!(
            "Parameter '{}' has been already bound.",
            name
        )));
    }
    binds.insert(name, value);
    Ok(())
}

/// Bookkeeping shared by all builders: table, WHERE clause, binds and array binds
#[derive(Debug, Clone, Default)]
pub struct StatementState {
    table: Option<String>,
    where_clause: Option<String>,
    binds: Binds,
    bind_arrays: IndexMap<String, Vec<DatabaseValue>>,
}

impl StatementState {
    pub(crate) fn bind(&mut self, name: &str, value: DatabaseValue) -> Result<()> {
        let name = normalize_param(name)?;
        if value.is_null() {
            return Err(DatabaseError::validation(format!(
                "Trying to bind NULL as parameter '{}'; use an expression for NULL",
                name
            )));
        }
        insert_bind(&mut self.binds, name, value)
    }

    pub(crate) fn bind_array(&mut self, name: &str, values: Vec<DatabaseValue>) -> Result<()> {
        let name = normalize_param(name)?;
        if self.bind_arrays.contains_key(&name) {
            return Err(DatabaseError::validation(format!(
                "Parameter '{}' has been already bound with bind_array.",
                name
            )));
        }
        if values.is_empty() {
            return Err(DatabaseError::validation(format!(
                "Cannot bind an empty list as parameter '{}'",
                name
            )));
        }
        self.bind_arrays.insert(name, values);
        Ok(())
    }

    pub(crate) fn set_table(&mut self, name: &str) -> Result<()> {
        self.table = Some(quote_table(name)?);
        Ok(())
    }

    pub(crate) fn set_where(&mut self, conditions: &str) {
        if let Some(clause) = where_clause(conditions) {
            self.where_clause = Some(clause);
        }
    }

    pub(crate) fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    pub(crate) fn where_text(&self) -> Option<&str> {
        self.where_clause.as_deref()
    }

    pub(crate) fn binds(&self) -> &Binds {
        &self.binds
    }

    pub(crate) fn has_arrays(&self) -> bool {
        !self.bind_arrays.is_empty()
    }

    /// Expand array binds into `sql`; returns the final text and a copy of all binds
    pub(crate) fn expand(&self, sql: &str) -> Result<(String, Binds)> {
        let mut binds = self.binds.clone();
        let mut sql = sql.to_string();

        for (placeholder, values) in &self.bind_arrays {
            sql = inject_array(&sql, placeholder, values, &mut binds)?;
        }

        Ok((sql, binds))
    }

    pub(crate) fn clear(&mut self) {
        self.table = None;
        self.where_clause = None;
        self.binds.clear();
        self.bind_arrays.clear();
    }
}

/// Bind operations common to every builder
///
/// # Example
///
/// ```ignore
/// use sql_gateway::prelude::*;
///
/// let rows = conn
///     .select("SELECT * FROM users WHERE status = :status AND id IN (:ids)")
///     .bind("status", "active")?
///     .bind_array("ids", [1, 2, 3])?
///     .execute()
///     .await?
///     .fetch_all()?;
/// ```
pub trait StatementBuilder: Sized {
    #[doc(hidden)]
    fn state_mut(&mut self) -> &mut StatementState;

    /// Bind one named parameter (the leading `:` is optional)
    ///
    /// # Errors
    ///
    /// Returns a validation error if the name is empty, the value is NULL, or the name is
    /// already bound.
    fn bind(mut self, name: &str, value: impl Into<DatabaseValue>) -> Result<Self> {
        self.state_mut().bind(name, value.into())?;
        Ok(self)
    }

    /// Bind several named parameters
    ///
    /// # Errors
    ///
    /// Same as [`bind`](Self::bind), for the first offending pair.
    fn binds<I, K, V>(mut self, binds: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<DatabaseValue>,
    {
        for (name, value) in binds {
            self.state_mut().bind(name.as_ref(), value.into())?;
        }
        Ok(self)
    }

    /// Register a list for expansion into `:name_0, :name_1, ...` at execute time
    ///
    /// # Errors
    ///
    /// Returns a validation error if the list is empty or the name is already registered.
    fn bind_array<I, V>(mut self, name: &str, values: I) -> Result<Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<DatabaseValue>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.state_mut().bind_array(name, values)?;
        Ok(self)
    }
}

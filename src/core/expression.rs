//! Raw SQL fragments and column values
//!
//! [`Expression`] is the mechanism for putting unescaped SQL (`NOW()`, `counter + 1`) into a
//! statement. [`ColumnValue`] is what insert, replace and update builders accept per column:
//! either a value that gets bound, or an expression that gets inlined.

use super::error::{DatabaseError, Result};
use super::value::DatabaseValue;
use indexmap::IndexMap;
use std::fmt;

/// Bare string values that are inlined instead of bound
///
/// Kept for callers that pass `"NOW()"` as a plain string; new code should use
/// [`Expression`].
pub const SQL_LITERALS: [&str; 4] = ["NULL", "NOW()", "UTC_TIMESTAMP()", "CURDATE()"];

/// Raw, unescaped SQL fragment
///
/// Rendering yields the text verbatim. Never build an expression from user input.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Expression(String);

impl Expression {
    /// Wrap a SQL fragment
    ///
    /// # Errors
    ///
    /// Returns a validation error if the text is empty or only whitespace.
    pub fn new(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(DatabaseError::validation("SQL expression must not be empty"));
        }
        Ok(Self(text))
    }

    /// `NULL`
    pub fn null() -> Self {
        Self("NULL".to_string())
    }

    /// `NOW()`
    pub fn now() -> Self {
        Self("NOW()".to_string())
    }

    /// `UTC_TIMESTAMP()`
    pub fn utc_timestamp() -> Self {
        Self("UTC_TIMESTAMP()".to_string())
    }

    /// `CURDATE()`
    pub fn curdate() -> Self {
        Self("CURDATE()".to_string())
    }

    /// The SQL text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Value of one column in an insert, replace or update
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    /// Bound as a statement parameter
    Value(DatabaseValue),
    /// Inlined verbatim
    Expression(Expression),
}

impl ColumnValue {
    /// SQL text to inline, or `None` if the value has to be bound
    pub fn inline_sql(&self) -> Option<&str> {
        match self {
            ColumnValue::Expression(expr) => Some(expr.as_str()),
            ColumnValue::Value(DatabaseValue::String(s)) => {
                let trimmed = s.trim();
                SQL_LITERALS.contains(&trimmed).then_some(trimmed)
            }
            ColumnValue::Value(_) => None,
        }
    }

    /// Check if this is an unset value (not the `NULL` expression)
    pub fn is_null(&self) -> bool {
        matches!(self, ColumnValue::Value(DatabaseValue::Null))
    }

    /// Byte length of the cell rendered as SQL text
    pub fn text_len(&self) -> usize {
        match self {
            ColumnValue::Value(v) => v.text_len(),
            ColumnValue::Expression(expr) => expr.as_str().len(),
        }
    }
}

impl From<Expression> for ColumnValue {
    fn from(expr: Expression) -> Self {
        ColumnValue::Expression(expr)
    }
}

impl From<DatabaseValue> for ColumnValue {
    fn from(value: DatabaseValue) -> Self {
        ColumnValue::Value(value)
    }
}

impl<T: Into<DatabaseValue>> From<Option<T>> for ColumnValue {
    fn from(value: Option<T>) -> Self {
        ColumnValue::Value(value.into())
    }
}

macro_rules! column_value_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for ColumnValue {
                fn from(value: $ty) -> Self {
                    ColumnValue::Value(value.into())
                }
            }
        )*
    };
}

column_value_from!(
    bool,
    i32,
    i64,
    u32,
    f32,
    f64,
    String,
    &str,
    Vec<u8>,
    chrono::NaiveDateTime,
);

/// One row for an insert or replace: column name -> value, in column order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    columns: IndexMap<String, ColumnValue>,
}

impl Record {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a column value (replacing an earlier value of the same column)
    #[must_use]
    pub fn set(mut self, column: impl Into<String>, value: impl Into<ColumnValue>) -> Self {
        self.columns.insert(column.into(), value.into());
        self
    }

    /// Value of a column
    pub fn get(&self, column: &str) -> Option<&ColumnValue> {
        self.columns.get(column)
    }

    /// Column names in order
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Check if the record has no columns
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Iterate over `(column, value)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ColumnValue)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K, V> FromIterator<(K, V)> for Record
where
    K: Into<String>,
    V: Into<ColumnValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            columns: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for Record
where
    K: Into<String>,
    V: Into<ColumnValue>,
{
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

impl From<IndexMap<String, ColumnValue>> for Record {
    fn from(columns: IndexMap<String, ColumnValue>) -> Self {
        Self { columns }
    }
}

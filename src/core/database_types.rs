//! Database and statement type definitions
//!
//! [`DatabaseType`] names the supported backends and carries the few dialect differences the
//! statement builders render. [`QueryType`] classifies statements by their leading keyword.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Supported database types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    /// MySQL/MariaDB database
    #[default]
    Mysql,
    /// SQLite database
    Sqlite,
}

impl DatabaseType {
    /// Convert database type to string representation
    pub fn to_str(&self) -> &'static str {
        match self {
            DatabaseType::Mysql => "mysql",
            DatabaseType::Sqlite => "sqlite",
        }
    }

    /// Leading keywords of an insert that skips duplicate-key rows
    pub fn insert_ignore(&self) -> &'static str {
        match self {
            DatabaseType::Mysql => "INSERT IGNORE",
            DatabaseType::Sqlite => "INSERT OR IGNORE",
        }
    }

    /// Statement emptying a table (already quoted)
    pub fn truncate_statement(&self, table: &str) -> String {
        match self {
            DatabaseType::Mysql => format!("TRUNCATE TABLE {}", table),
            DatabaseType::Sqlite => format!("DELETE FROM {}", table),
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_str())
    }
}

impl FromStr for DatabaseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(DatabaseType::Mysql),
            "sqlite" | "sqlite3" => Ok(DatabaseType::Sqlite),
            _ => Err(format!("Invalid database type: '{}'", s)),
        }
    }
}

/// Statement kind, decided by the first keyword
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryType {
    Select,
    Insert,
    Update,
    Delete,
    Replace,
    Other,
}

impl QueryType {
    /// Classify a statement by its first whitespace-separated keyword (case-insensitive)
    pub fn of(sql: &str) -> Self {
        let keyword = sql.split_whitespace().next().unwrap_or_default();

        match keyword.to_ascii_uppercase().as_str() {
            "SELECT" => QueryType::Select,
            "INSERT" => QueryType::Insert,
            "UPDATE" => QueryType::Update,
            "DELETE" => QueryType::Delete,
            "REPLACE" => QueryType::Replace,
            _ => QueryType::Other,
        }
    }

    /// Upper-case name (`"SELECT"`, ..., `"OTHER"`)
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Select => "SELECT",
            QueryType::Insert => "INSERT",
            QueryType::Update => "UPDATE",
            QueryType::Delete => "DELETE",
            QueryType::Replace => "REPLACE",
            QueryType::Other => "OTHER",
        }
    }

    /// INSERT and REPLACE statements, whose bind lists are trimmed in diagnostics
    pub fn is_batch_write(&self) -> bool {
        matches!(self, QueryType::Insert | QueryType::Replace)
    }
}

impl std::fmt::Display for QueryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a statement by its first keyword
pub fn query_type(sql: &str) -> QueryType {
    QueryType::of(sql)
}

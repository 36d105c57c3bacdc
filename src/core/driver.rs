//! Driver seam
//!
//! This module defines the traits every backend implements. A [`Connector`] opens a physical
//! link described by [`ConnectionSettings`]; the resulting [`Driver`] runs named-parameter
//! statements and drives the physical transaction. Nesting, error reporting and debugging are
//! handled above this layer by [`Connection`](super::connection::Connection).

use super::config::ConnectionSettings;
use super::database_types::DatabaseType;
use super::error::QueryErrorKind;
use super::value::{Binds, DatabaseRow};
use async_trait::async_trait;

/// Bind parameter limit assumed for drivers that do not report one
pub const DEFAULT_MAX_BIND_PARAMS: usize = 32766;

/// Result type of driver operations
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Failure reported by a backend
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[cfg(feature = "mysql")]
    #[error(transparent)]
    Mysql(#[from] mysql_async::Error),

    /// The physical link is closed
    #[error("Not connected to database")]
    NotConnected,

    /// The operation did not finish in time
    #[error("Operation timed out after {0} ms")]
    Timeout(u64),

    /// A blocking worker task failed
    #[error("Task join error: {0}")]
    Join(String),

    /// Any other backend failure
    #[error("{0}")]
    Other(String),
}

impl DriverError {
    /// Create an error from a message
    pub fn other<S: Into<String>>(msg: S) -> Self {
        DriverError::Other(msg.into())
    }

    /// Category of the resulting [`QueryError`](super::error::QueryError) for a statement
    pub fn kind(&self) -> QueryErrorKind {
        match self {
            DriverError::Timeout(_) => QueryErrorKind::Timeout,
            DriverError::NotConnected => QueryErrorKind::Disconnected,
            _ => QueryErrorKind::Statement,
        }
    }
}

/// Materialized outcome of one statement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    /// Result column names in select-list order (empty for statements without a result set)
    pub columns: Vec<String>,
    /// Result rows
    pub rows: Vec<DatabaseRow>,
    /// Rows affected (writes) or returned (reads) as reported by the driver
    pub affected_rows: u64,
    /// Auto-increment id generated by the statement, if any
    pub last_insert_id: Option<u64>,
}

impl QueryOutput {
    /// Output of a statement without a result set
    pub fn affected(affected_rows: u64) -> Self {
        Self {
            affected_rows,
            ..Self::default()
        }
    }

    /// Output of a statement returning rows
    pub fn rows(columns: Vec<String>, rows: Vec<DatabaseRow>) -> Self {
        Self {
            affected_rows: rows.len() as u64,
            columns,
            rows,
            last_insert_id: None,
        }
    }
}

/// One open physical link
///
/// # Thread Safety
/// Implementations use interior mutability; callers serialize operations on one link.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Get the database type
    fn database_type(&self) -> DatabaseType;

    /// Human-readable link description (e.g. `"db1 via TCP/IP"`)
    fn status(&self) -> String;

    /// Most bind parameters one statement may carry
    fn max_bind_params(&self) -> usize {
        DEFAULT_MAX_BIND_PARAMS
    }

    /// Run one statement with named `:param` binds
    ///
    /// Values are already in driver form (date/times rendered as strings).
    async fn run(&self, sql: &str, binds: &Binds) -> DriverResult<QueryOutput>;

    /// Start a physical transaction
    async fn begin(&self) -> DriverResult<()>;

    /// Commit the physical transaction
    async fn commit(&self) -> DriverResult<()>;

    /// Roll back the physical transaction
    async fn rollback(&self) -> DriverResult<()>;

    /// Check if a physical transaction is open
    fn in_transaction(&self) -> bool;

    /// Close the link; later calls fail with [`DriverError::NotConnected`]
    async fn close(&self) -> DriverResult<()>;
}

/// Opens physical links
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a link described by `settings`
    async fn open(&self, settings: &ConnectionSettings) -> DriverResult<Box<dyn Driver>>;
}

/// Connector for the backends compiled into the crate
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConnector;

#[async_trait]
impl Connector for DefaultConnector {
    async fn open(&self, settings: &ConnectionSettings) -> DriverResult<Box<dyn Driver>> {
        match settings.database_type {
            #[cfg(feature = "sqlite")]
            DatabaseType::Sqlite => {
                let driver = crate::backends::SqliteDriver::open(settings).await?;
                Ok(Box::new(driver))
            }
            #[cfg(feature = "mysql")]
            DatabaseType::Mysql => {
                let driver = crate::backends::MysqlDriver::open(settings).await?;
                Ok(Box::new(driver))
            }
            #[allow(unreachable_patterns)]
            other => Err(DriverError::other(format!(
                "Support for {} is not compiled in",
                other
            ))),
        }
    }
}

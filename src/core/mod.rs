//! Core database layer types
//!
//! This module provides the building blocks of the layer: configuration, the connection
//! registry, connections with nested transactions, statement builders, error types and the
//! driver seam implemented by the backends.

pub mod config;
pub mod connection;
pub mod database_types;
pub mod debug;
pub mod driver;
pub mod error;
pub mod expression;
pub mod query_builder;
pub mod registry;
pub mod transaction;
pub mod value;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use config::{ConfigSource, ConnectionSettings, Fallback, JsonConfig};
pub use connection::Connection;
pub use database_types::{query_type, DatabaseType, QueryType};
pub use debug::{CallSite, DebugLog, QueryTrace};
pub use driver::{Connector, DefaultConnector, Driver, DriverError, DriverResult, QueryOutput};
pub use error::{DatabaseError, QueryError, QueryErrorKind, Result};
pub use expression::{ColumnValue, Expression, Record};
pub use query_builder::{
    DeleteBuilder, InsertBuilder, OnDuplicate, ReplaceBuilder, SelectBuilder, Statement,
    StatementBuilder, UpdateBuilder,
};
pub use registry::{ConnectOptions, ConnectionRegistry};
pub use transaction::TransactionGuard;
pub use value::{Binds, DatabaseResult, DatabaseRow, DatabaseValue};

//! # SQL Gateway
//!
//! A database access layer built around named connections and parameterized statement
//! builders. Connections are resolved from configuration by name, cached in an explicit
//! [`ConnectionRegistry`], and fall back to an alternate host once if the primary cannot be
//! reached.
//!
//! ## Features
//!
//! - **Statement builders**: select, insert, replace, update and delete with named binds
//!   and array expansion (`IN (:ids)`)
//! - **Nested transactions**: `begin`/`commit` pairs nest on one connection; only the
//!   outermost pair touches the database
//! - **Chunked batch writes**: large INSERT/REPLACE row sets are split to respect the
//!   statement size limit and written atomically
//! - **Uniform errors**: programmer mistakes and runtime failures are distinct variants of
//!   one [`DatabaseError`]; runtime failures carry a [`QueryError`] report
//! - **Backends**: SQLite (bundled, default) and MySQL/MariaDB (`mysql` feature)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sql_gateway::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config: JsonConfig = r#"{
//!         "local": {
//!             "driver": "sqlite",
//!             "hostname": ":memory:",
//!             "username": "app",
//!             "password": "secret",
//!             "schema": "shop"
//!         }
//!     }"#
//!     .parse()?;
//!
//!     let registry = ConnectionRegistry::new(config);
//!     let conn = registry.connect("local").await?;
//!
//!     conn.query(
//!         "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)",
//!         &Binds::new(),
//!     )
//!     .await?;
//!
//!     conn.insert("users")?
//!         .values([
//!             Record::new().set("name", "Alice"),
//!             Record::new().set("name", "Bob"),
//!         ])?
//!         .execute()
//!         .await?;
//!
//!     let names = conn
//!         .select("SELECT name FROM users WHERE id IN (:ids)")
//!         .bind_array("ids", [1, 2])?
//!         .execute()
//!         .await?
//!         .fetch_column_values("name")?;
//!
//!     for name in names {
//!         println!("User: {}", name.as_string());
//!     }
//!
//!     registry.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ### Working with Transactions
//!
//! ```rust,no_run
//! use sql_gateway::prelude::*;
//!
//! async fn archive(conn: &Connection, id: i64) -> Result<u64> {
//!     conn.transaction(|tx| async move {
//!         tx.update("orders")?
//!             .value("archived", 1)?
//!             .where_clause("id = :id")
//!             .bind("id", id)?
//!             .execute()
//!             .await
//!     })
//!     .await
//! }
//! ```

/// Core database layer types
pub mod core;

/// Database backend implementations
pub mod backends;

/// Prelude for convenient imports
///
/// ```rust
/// use sql_gateway::prelude::*;
///
/// let update = Expression::new("counter + 1");
/// assert!(update.is_ok());
/// ```
pub mod prelude {
    pub use crate::core::{
        Binds, ColumnValue, ConnectOptions, Connection, ConnectionRegistry, DatabaseError,
        DatabaseResult, DatabaseRow, DatabaseType, DatabaseValue, Expression, JsonConfig,
        QueryError, QueryErrorKind, Record, Result, StatementBuilder, TransactionGuard,
    };
}

// Re-export at root level for convenience
pub use core::{
    Connection, ConnectionRegistry, DatabaseError, DatabaseResult, DatabaseRow, DatabaseType,
    DatabaseValue, Expression, QueryError, Record, Result, StatementBuilder, TransactionGuard,
};

#[cfg(feature = "sqlite")]
pub use backends::SqliteDriver;

#[cfg(feature = "mysql")]
pub use backends::MysqlDriver;

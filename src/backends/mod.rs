//! Database backend implementations
//!
//! This module contains concrete implementations of the [`Driver`](crate::core::Driver)
//! trait. Each backend is behind a cargo feature.

#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "mysql")]
pub use mysql::MysqlDriver;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDriver;

//! MySQL/MariaDB backend implementation
//!
//! This module provides a `mysql_async` implementation of the [`Driver`] trait. Named
//! `:param` binds are passed as [`Params::Named`]; the `init_command` attribute runs once
//! after the link is established. Result sets are always read completely, so an unbuffered
//! link differs from a buffered one only in being a separate session.

use crate::core::{
    config::ConnectionSettings,
    database_types::{DatabaseType, QueryType},
    driver::{Driver, DriverError, DriverResult, QueryOutput},
    value::{Binds, DatabaseRow, DatabaseValue, FORMAT_DATETIME},
};
use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Conn, OptsBuilder, Params};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Attribute holding a statement to run right after connecting
const ATTR_INIT_COMMAND: &str = "init_command";

/// Placeholder limit of a server-side prepared statement
pub const MYSQL_MAX_BIND_PARAMS: usize = 65535;

/// MySQL link
pub struct MysqlDriver {
    conn: Arc<Mutex<Option<Conn>>>,
    in_transaction: AtomicBool,
    hostname: String,
    timeout: Duration,
}

impl MysqlDriver {
    /// Connect to the server described by `settings`
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot be reached, rejects the credentials, or does
    /// not answer within the configured timeout.
    pub async fn open(settings: &ConnectionSettings) -> DriverResult<Self> {
        let mut opts = OptsBuilder::default()
            .ip_or_hostname(settings.hostname.clone())
            .tcp_port(settings.port)
            .user(Some(settings.username.clone()))
            .pass(Some(settings.password.clone()))
            .db_name(Some(settings.schema.clone()));

        if let Some(command) = settings.attribute(ATTR_INIT_COMMAND) {
            opts = opts.init(vec![command.to_string()]);
        }

        let conn = with_timeout(settings.timeout, Conn::new(opts)).await?;

        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            in_transaction: AtomicBool::new(false),
            hostname: settings.hostname.clone(),
            timeout: settings.timeout,
        })
    }

    async fn query_drop(&self, sql: &'static str) -> DriverResult<()> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(DriverError::NotConnected)?;
        with_timeout(self.timeout, conn.query_drop(sql)).await
    }

    /// Convert DatabaseValue to a mysql_async value
    fn value_to_param(value: &DatabaseValue) -> mysql_async::Value {
        match value {
            DatabaseValue::Null => mysql_async::Value::NULL,
            DatabaseValue::Bool(v) => mysql_async::Value::from(*v),
            DatabaseValue::Int(v) => mysql_async::Value::from(*v),
            DatabaseValue::Long(v) => mysql_async::Value::from(*v),
            DatabaseValue::Float(v) => mysql_async::Value::from(*v),
            DatabaseValue::Double(v) => mysql_async::Value::from(*v),
            DatabaseValue::String(v) => mysql_async::Value::from(v.clone()),
            DatabaseValue::Bytes(v) => mysql_async::Value::from(v.clone()),
            DatabaseValue::DateTime(v) => {
                mysql_async::Value::from(v.format(FORMAT_DATETIME).to_string())
            }
        }
    }

    /// Convert a mysql_async value to DatabaseValue; temporal values become strings
    fn value_from_mysql(value: mysql_async::Value) -> DatabaseValue {
        match value {
            mysql_async::Value::NULL => DatabaseValue::Null,
            mysql_async::Value::Bytes(b) => match String::from_utf8(b) {
                Ok(s) => DatabaseValue::String(s),
                Err(e) => DatabaseValue::Bytes(e.into_bytes()),
            },
            mysql_async::Value::Int(n) => DatabaseValue::Long(n),
            mysql_async::Value::UInt(n) => match i64::try_from(n) {
                Ok(n) => DatabaseValue::Long(n),
                Err(_) => DatabaseValue::String(n.to_string()),
            },
            mysql_async::Value::Float(f) => DatabaseValue::Float(f),
            mysql_async::Value::Double(d) => DatabaseValue::Double(d),
            mysql_async::Value::Date(year, month, day, hour, min, sec, _) => {
                DatabaseValue::String(format!(
                    "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                    year, month, day, hour, min, sec
                ))
            }
            mysql_async::Value::Time(negative, days, hour, min, sec, _) => {
                let hours = days * 24 + hour as u32;
                let sign = if negative { "-" } else { "" };
                DatabaseValue::String(format!("{}{:02}:{:02}:{:02}", sign, hours, min, sec))
            }
        }
    }

    /// Named parameters referenced by the statement, without the leading `:`
    fn named_params(sql: &str, binds: &Binds) -> Params {
        let named: HashMap<Vec<u8>, mysql_async::Value> = binds
            .iter()
            .filter(|(name, _)| sql.contains(name.as_str()))
            .map(|(name, value)| {
                (
                    name.trim_start_matches(':').as_bytes().to_vec(),
                    Self::value_to_param(value),
                )
            })
            .collect();

        if named.is_empty() {
            Params::Empty
        } else {
            Params::Named(named)
        }
    }

    fn row_to_database_row(row: mysql_async::Row) -> (Vec<String>, DatabaseRow) {
        let columns: Vec<String> = row
            .columns_ref()
            .iter()
            .map(|c| c.name_str().to_string())
            .collect();

        let db_row = columns
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let val: mysql_async::Value = row.get(i).unwrap_or(mysql_async::Value::NULL);
                (name.clone(), Self::value_from_mysql(val))
            })
            .collect();

        (columns, db_row)
    }
}

async fn with_timeout<T, F>(timeout: Duration, fut: F) -> DriverResult<T>
where
    F: Future<Output = mysql_async::Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(DriverError::Timeout(timeout.as_millis() as u64)),
    }
}

#[async_trait]
impl Driver for MysqlDriver {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Mysql
    }

    fn status(&self) -> String {
        format!("{} via TCP/IP", self.hostname)
    }

    fn max_bind_params(&self) -> usize {
        MYSQL_MAX_BIND_PARAMS
    }

    async fn run(&self, sql: &str, binds: &Binds) -> DriverResult<QueryOutput> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(DriverError::NotConnected)?;

        let rows: Vec<mysql_async::Row> = match Self::named_params(sql, binds) {
            Params::Empty => with_timeout(self.timeout, conn.query(sql)).await?,
            params => with_timeout(self.timeout, conn.exec(sql, params)).await?,
        };

        if rows.is_empty() && QueryType::of(sql) != QueryType::Select {
            let mut output = QueryOutput::affected(conn.affected_rows());
            output.last_insert_id = conn.last_insert_id();
            return Ok(output);
        }

        let mut columns = Vec::new();
        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            let (row_columns, db_row) = Self::row_to_database_row(row);
            if columns.is_empty() {
                columns = row_columns;
            }
            results.push(db_row);
        }

        Ok(QueryOutput::rows(columns, results))
    }

    async fn begin(&self) -> DriverResult<()> {
        self.query_drop("BEGIN").await?;
        self.in_transaction.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn commit(&self) -> DriverResult<()> {
        self.query_drop("COMMIT").await?;
        self.in_transaction.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self) -> DriverResult<()> {
        self.query_drop("ROLLBACK").await?;
        self.in_transaction.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::SeqCst)
    }

    async fn close(&self) -> DriverResult<()> {
        self.in_transaction.store(false, Ordering::SeqCst);
        let conn = self.conn.lock().await.take();
        if let Some(conn) = conn {
            conn.disconnect().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_params_skip_unreferenced() {
        let mut binds = Binds::new();
        binds.insert(":name".to_string(), "Alice".into());
        binds.insert(":other".to_string(), 1.into());

        match MysqlDriver::named_params("SELECT * FROM t WHERE name = :name", &binds) {
            Params::Named(named) => {
                assert_eq!(named.len(), 1);
                assert!(named.contains_key(b"name".as_slice()));
            }
            other => panic!("unexpected params: {:?}", other),
        }

        assert!(matches!(
            MysqlDriver::named_params("SELECT 1", &binds),
            Params::Empty
        ));
    }

    #[test]
    fn test_value_from_mysql() {
        assert_eq!(
            MysqlDriver::value_from_mysql(mysql_async::Value::Bytes(b"abc".to_vec())),
            DatabaseValue::from("abc")
        );
        assert_eq!(
            MysqlDriver::value_from_mysql(mysql_async::Value::Date(2024, 1, 2, 3, 4, 5, 0)),
            DatabaseValue::from("2024-01-02 03:04:05")
        );
        assert_eq!(
            MysqlDriver::value_from_mysql(mysql_async::Value::UInt(7)),
            DatabaseValue::Long(7)
        );
    }
}

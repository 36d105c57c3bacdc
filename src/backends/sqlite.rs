//! SQLite database backend implementation
//!
//! This module provides a SQLite implementation of the [`Driver`] trait.
//!
//! The configured `hostname` is a directory holding one `{schema}.db` file per schema, or
//! `:memory:` for a named shared-cache in-memory database (`file:{schema}?mode=memory&cache=shared`),
//! which lets the buffered and unbuffered links of one connection name see the same data.

use crate::core::{
    config::ConnectionSettings,
    database_types::{DatabaseType, QueryType},
    driver::{Driver, DriverError, DriverResult, QueryOutput},
    value::{Binds, DatabaseRow, DatabaseValue},
};
use async_trait::async_trait;
use regex::Regex;
use rusqlite::{Connection, Row};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Mutex;

/// Host name selecting an in-memory database
pub const MEMORY_HOST: &str = ":memory:";

/// Default `SQLITE_MAX_VARIABLE_NUMBER` of SQLite 3.32 and later
pub const SQLITE_MAX_BIND_PARAMS: usize = 32766;

/// Attribute prefix of pragmas applied on open (`pragma.journal_mode = wal`)
const PRAGMA_PREFIX: &str = "pragma.";

fn pragma_name() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_]+$").expect("valid regex"))
}

/// SQLite link
pub struct SqliteDriver {
    connection: Arc<Mutex<Option<Connection>>>,
    in_transaction: Arc<AtomicBool>,
    location: String,
    timeout: Duration,
}

impl SqliteDriver {
    /// Open the database described by `settings`
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened, a pragma attribute is invalid, or
    /// opening takes longer than the configured timeout.
    pub async fn open(settings: &ConnectionSettings) -> DriverResult<Self> {
        let location = database_location(settings);
        let pragmas = pragmas(settings)?;
        let timeout = settings.timeout;

        let path = location.clone();
        let mut task = tokio::task::spawn_blocking(move || -> DriverResult<Connection> {
            let conn = Connection::open(&path)?;
            conn.busy_timeout(timeout)?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            for (name, value) in &pragmas {
                conn.pragma_update(None, name.as_str(), value.as_str())?;
            }
            Ok(conn)
        });

        let conn = tokio::select! {
            result = &mut task => {
                result.map_err(|e| DriverError::Join(e.to_string()))??
            }
            _ = tokio::time::sleep(timeout) => {
                task.abort();
                return Err(DriverError::Timeout(timeout.as_millis() as u64));
            }
        };

        Ok(Self {
            connection: Arc::new(Mutex::new(Some(conn))),
            in_transaction: Arc::new(AtomicBool::new(false)),
            location,
            timeout,
        })
    }

    /// Run `work` against the link on the blocking pool, bounded by the operation timeout
    async fn blocking<T, F>(&self, work: F) -> DriverResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> DriverResult<T> + Send + 'static,
    {
        let connection_arc = Arc::clone(&self.connection);

        let mut task = tokio::task::spawn_blocking(move || -> DriverResult<T> {
            let connection = connection_arc.blocking_lock();
            let conn = connection.as_ref().ok_or(DriverError::NotConnected)?;
            work(conn)
        });

        // Use select! to abort task on timeout, preventing resource leaks
        tokio::select! {
            result = &mut task => {
                result.map_err(|e| DriverError::Join(e.to_string()))?
            }
            _ = tokio::time::sleep(self.timeout) => {
                task.abort();
                Err(DriverError::Timeout(self.timeout.as_millis() as u64))
            }
        }
    }

    /// Convert a rusqlite Row to a DatabaseRow
    fn row_to_database_row(row: &Row, columns: &[String]) -> rusqlite::Result<DatabaseRow> {
        let mut db_row = DatabaseRow::with_capacity(columns.len());

        for (i, column_name) in columns.iter().enumerate() {
            let value = match row.get_ref(i)? {
                rusqlite::types::ValueRef::Null => DatabaseValue::Null,
                rusqlite::types::ValueRef::Integer(v) => DatabaseValue::Long(v),
                rusqlite::types::ValueRef::Real(v) => DatabaseValue::Double(v),
                rusqlite::types::ValueRef::Text(v) => {
                    DatabaseValue::String(String::from_utf8_lossy(v).to_string())
                }
                rusqlite::types::ValueRef::Blob(v) => DatabaseValue::Bytes(v.to_vec()),
            };
            db_row.insert(column_name.clone(), value);
        }

        Ok(db_row)
    }

    /// Convert DatabaseValue to a rusqlite value
    fn value_to_param(value: &DatabaseValue) -> rusqlite::types::Value {
        use rusqlite::types::Value;

        match value {
            DatabaseValue::Null => Value::Null,
            DatabaseValue::Bool(v) => Value::Integer(*v as i64),
            DatabaseValue::Int(v) => Value::Integer(*v as i64),
            DatabaseValue::Long(v) => Value::Integer(*v),
            DatabaseValue::Float(v) => Value::Real(*v as f64),
            DatabaseValue::Double(v) => Value::Real(*v),
            DatabaseValue::String(v) => Value::Text(v.clone()),
            DatabaseValue::Bytes(v) => Value::Blob(v.clone()),
            DatabaseValue::DateTime(_) => Value::Text(value.as_string()),
        }
    }

    async fn execute_batch(&self, sql: &'static str) -> DriverResult<()> {
        self.blocking(move |conn| Ok(conn.execute_batch(sql)?)).await
    }
}

/// Database file (or shared in-memory URI) for the settings
fn database_location(settings: &ConnectionSettings) -> String {
    if settings.hostname == MEMORY_HOST {
        format!("file:{}?mode=memory&cache=shared", settings.schema)
    } else {
        format!(
            "{}/{}.db",
            settings.hostname.trim_end_matches('/'),
            settings.schema
        )
    }
}

/// Pragmas requested through `pragma.<name>` attributes
fn pragmas(settings: &ConnectionSettings) -> DriverResult<Vec<(String, String)>> {
    settings
        .attributes
        .iter()
        .filter_map(|(key, value)| {
            key.strip_prefix(PRAGMA_PREFIX)
                .map(|name| (name.to_string(), value.clone()))
        })
        .map(|(name, value)| {
            if pragma_name().is_match(&name) {
                Ok((name, value))
            } else {
                Err(DriverError::other(format!("Invalid pragma name '{}'", name)))
            }
        })
        .collect()
}

#[async_trait]
impl Driver for SqliteDriver {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Sqlite
    }

    fn status(&self) -> String {
        format!("{} via SQLite {}", self.location, rusqlite::version())
    }

    fn max_bind_params(&self) -> usize {
        SQLITE_MAX_BIND_PARAMS
    }

    async fn run(&self, sql: &str, binds: &Binds) -> DriverResult<QueryOutput> {
        let sql = sql.to_string();
        let params: Vec<(String, rusqlite::types::Value)> = binds
            .iter()
            .map(|(name, value)| (name.clone(), Self::value_to_param(value)))
            .collect();

        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&sql)?;

            // Binds the statement does not reference are skipped
            let mut bound = vec![false; stmt.parameter_count() + 1];
            for (name, value) in params {
                if let Some(index) = stmt.parameter_index(&name)? {
                    stmt.raw_bind_parameter(index, value)?;
                    bound[index] = true;
                }
            }

            // SQLite would silently bind NULL to the rest
            if let Some(index) = (1..bound.len()).find(|&i| !bound[i]) {
                let name = stmt
                    .parameter_name(index)
                    .map_or_else(|| format!("?{}", index), str::to_string);
                return Err(DriverError::other(format!(
                    "No value bound for parameter '{}'",
                    name
                )));
            }

            if stmt.column_count() > 0 {
                let columns: Vec<String> =
                    stmt.column_names().into_iter().map(String::from).collect();

                let mut rows = stmt.raw_query();
                let mut results = Vec::new();
                while let Some(row) = rows.next()? {
                    results.push(Self::row_to_database_row(row, &columns)?);
                }

                return Ok(QueryOutput::rows(columns, results));
            }

            let affected = stmt.raw_execute()?;
            let mut output = QueryOutput::affected(affected as u64);
            if QueryType::of(&sql).is_batch_write() {
                output.last_insert_id = u64::try_from(conn.last_insert_rowid()).ok();
            }

            Ok(output)
        })
        .await
    }

    async fn begin(&self) -> DriverResult<()> {
        self.execute_batch("BEGIN").await?;
        self.in_transaction.store(true, Ordering::Release);
        Ok(())
    }

    async fn commit(&self) -> DriverResult<()> {
        self.execute_batch("COMMIT").await?;
        self.in_transaction.store(false, Ordering::Release);
        Ok(())
    }

    async fn rollback(&self) -> DriverResult<()> {
        self.execute_batch("ROLLBACK").await?;
        self.in_transaction.store(false, Ordering::Release);
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::Acquire)
    }

    async fn close(&self) -> DriverResult<()> {
        self.in_transaction.store(false, Ordering::Release);
        let mut connection = self.connection.lock().await;
        *connection = None;
        Ok(())
    }
}

impl Drop for SqliteDriver {
    fn drop(&mut self) {
        // Best-effort, Drop cannot be async
        if self.in_transaction.load(Ordering::Acquire) {
            if let Ok(connection) = self.connection.try_lock() {
                if let Some(conn) = connection.as_ref() {
                    let _ = conn.execute_batch("ROLLBACK");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings(schema: &str) -> ConnectionSettings {
        let config = json!({
            "local": {
                "driver": "sqlite",
                "hostname": MEMORY_HOST,
                "username": "app",
                "password": "secret",
                "schema": schema,
                "attributes": { "pragma.cache_size": 2000 }
            }
        });
        ConnectionSettings::resolve(&config, "local", false).expect("valid settings")
    }

    fn binds(pairs: &[(&str, DatabaseValue)]) -> Binds {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_database_location() {
        let mut s = settings("shop");
        assert_eq!(
            database_location(&s),
            "file:shop?mode=memory&cache=shared"
        );

        s.hostname = "/var/lib/app/".to_string();
        assert_eq!(database_location(&s), "/var/lib/app/shop.db");
    }

    #[test]
    fn test_invalid_pragma_name() {
        let mut s = settings("pragma_check");
        s.attributes
            .insert("pragma.journal_mode; DROP".to_string(), "wal".to_string());
        assert!(pragmas(&s).is_err());
    }

    #[tokio::test]
    async fn test_sqlite_run_named_binds() -> DriverResult<()> {
        let db = SqliteDriver::open(&settings("driver_run")).await?;

        db.run(
            "CREATE TABLE test (id INTEGER PRIMARY KEY, name TEXT)",
            &Binds::new(),
        )
        .await?;

        let output = db
            .run(
                "INSERT INTO test (name) VALUES (:name)",
                &binds(&[
                    (":name", "Alice".into()),
                    (":unused", 1.into()),
                ]),
            )
            .await?;
        assert_eq!(output.affected_rows, 1);
        assert_eq!(output.last_insert_id, Some(1));

        let output = db
            .run(
                "SELECT name, id FROM test WHERE id = :id",
                &binds(&[(":id", 1.into())]),
            )
            .await?;
        assert_eq!(output.columns, vec!["name", "id"]);
        assert_eq!(output.rows.len(), 1);
        assert_eq!(output.rows[0].get("name"), Some(&DatabaseValue::from("Alice")));
        Ok(())
    }

    #[tokio::test]
    async fn test_sqlite_unbound_parameter_is_an_error() -> DriverResult<()> {
        let db = SqliteDriver::open(&settings("driver_unbound")).await?;
        db.run("CREATE TABLE test (id INTEGER PRIMARY KEY)", &Binds::new())
            .await?;
        db.run("INSERT INTO test (id) VALUES (5)", &Binds::new())
            .await?;

        let err = db
            .run(
                "DELETE FROM test WHERE id = :id",
                &binds(&[(":idd", 5.into())]),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("':id'"));

        let output = db.run("SELECT * FROM test", &Binds::new()).await?;
        assert_eq!(output.rows.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_max_bind_params() -> DriverResult<()> {
        let db = SqliteDriver::open(&settings("driver_limits")).await?;
        assert_eq!(db.max_bind_params(), SQLITE_MAX_BIND_PARAMS);
        Ok(())
    }

    #[tokio::test]
    async fn test_sqlite_transaction() -> DriverResult<()> {
        let db = SqliteDriver::open(&settings("driver_tx")).await?;
        db.run("CREATE TABLE test (id INTEGER PRIMARY KEY)", &Binds::new())
            .await?;

        db.begin().await?;
        assert!(db.in_transaction());
        db.run("INSERT INTO test (id) VALUES (1)", &Binds::new())
            .await?;
        db.rollback().await?;
        assert!(!db.in_transaction());

        let output = db.run("SELECT * FROM test", &Binds::new()).await?;
        assert!(output.rows.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_sqlite_close() -> DriverResult<()> {
        let db = SqliteDriver::open(&settings("driver_close")).await?;
        db.close().await?;

        let err = db.run("SELECT 1", &Binds::new()).await.unwrap_err();
        assert!(matches!(err, DriverError::NotConnected));
        Ok(())
    }

    #[tokio::test]
    async fn test_sqlite_open_missing_directory() {
        let mut s = settings("nowhere");
        s.hostname = "/nonexistent/sql_gateway/dir".to_string();

        assert!(SqliteDriver::open(&s).await.is_err());
    }
}

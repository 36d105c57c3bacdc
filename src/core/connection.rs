//! Connection handle
//!
//! A [`Connection`] wraps one physical link together with its settings, the transaction
//! nesting depth and an optional debug log. Handles are cheap to clone; operations on one
//! connection are serialized by an internal async mutex.
//!
//! All statements go through [`Connection::query`]. A driver failure there is fatal to the
//! connection: it is closed and evicted from its registry, and the next
//! [`ConnectionRegistry::connect`](super::registry::ConnectionRegistry::connect) opens a fresh
//! link.

use super::config::ConnectionSettings;
use super::database_types::{DatabaseType, QueryType};
use super::debug::{CallSite, DebugLog, QueryTrace};
use super::driver::{Driver, DriverError, QueryOutput};
use super::error::{DatabaseError, QueryError, QueryErrorKind, Result};
use super::query_builder::{
    quote_table, DeleteBuilder, InsertBuilder, ReplaceBuilder, SelectBuilder, UpdateBuilder,
};
use super::registry::RegistryShared;
use super::value::Binds;
use indexmap::IndexMap;
use std::future::Future;
use std::panic::Location;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::Mutex;

/// Physical link and transaction depth, guarded together
struct Link {
    driver: Option<Box<dyn Driver>>,
    depth: u32,
    last_insert_id: Option<u64>,
}

struct ConnectionInner {
    settings: ConnectionSettings,
    max_bind_params: usize,
    link: Mutex<Link>,
    debug_enabled: AtomicBool,
    track_errors: AtomicBool,
    debug_log: parking_lot::Mutex<DebugLog>,
    registry: Weak<RegistryShared>,
}

/// Named database connection
///
/// # Example
///
/// ```ignore
/// use sql_gateway::prelude::*;
///
/// let conn = registry.connect("main").await?;
///
/// conn.begin().await?;
/// conn.update("accounts")?
///     .value("balance", Expression::new("balance - 100")?)?
///     .where_clause("id = :id")
///     .bind("id", 1)?
///     .execute()
///     .await?;
/// conn.commit().await?;
/// ```
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.inner.settings.name)
            .field("host", &self.inner.settings.hostname)
            .field("unbuffered", &self.is_unbuffered())
            .finish()
    }
}

impl Connection {
    pub(crate) fn new(
        settings: ConnectionSettings,
        driver: Box<dyn Driver>,
        registry: Weak<RegistryShared>,
    ) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                settings,
                max_bind_params: driver.max_bind_params(),
                link: Mutex::new(Link {
                    driver: Some(driver),
                    depth: 0,
                    last_insert_id: None,
                }),
                debug_enabled: AtomicBool::new(false),
                track_errors: AtomicBool::new(true),
                debug_log: parking_lot::Mutex::new(DebugLog::default()),
                registry,
            }),
        }
    }

    /// Configuration name
    pub fn name(&self) -> &str {
        &self.inner.settings.name
    }

    /// Host this connection talks to (the fallback host if the primary failed)
    pub fn hostname(&self) -> &str {
        &self.inner.settings.hostname
    }

    /// Schema / database name
    pub fn schema(&self) -> &str {
        &self.inner.settings.schema
    }

    /// Backend type
    pub fn database_type(&self) -> DatabaseType {
        self.inner.settings.database_type
    }

    /// Statement size limit in bytes
    pub fn max_query_length(&self) -> usize {
        self.inner.settings.max_query_length
    }

    /// Most bind parameters one statement may carry on this link
    pub fn max_bind_params(&self) -> usize {
        self.inner.max_bind_params
    }

    /// Settings the link was opened with
    pub fn settings(&self) -> &ConnectionSettings {
        &self.inner.settings
    }

    /// Whether this is the unbuffered variant of its connection name
    pub fn is_unbuffered(&self) -> bool {
        self.inner.settings.is_unbuffered()
    }

    /// Check if the physical link is open
    pub async fn is_connected(&self) -> bool {
        self.inner.link.lock().await.driver.is_some()
    }

    /// Current transaction nesting depth (0 = no transaction)
    pub async fn transaction_depth(&self) -> u32 {
        self.inner.link.lock().await.depth
    }

    /// Check if a transaction is open
    pub async fn in_transaction(&self) -> bool {
        self.transaction_depth().await > 0
    }

    /// Run one statement with named binds
    ///
    /// Date/time binds are sent as `YYYY-MM-DD HH:MM:SS` strings. This is the single path
    /// every builder uses to reach the driver.
    ///
    /// # Errors
    ///
    /// Returns a [`QueryError`] if the driver fails. The connection is then closed and
    /// evicted from its registry, including any open transaction.
    pub async fn query(&self, sql: &str, binds: &Binds) -> Result<QueryOutput> {
        let binds: Binds = binds
            .iter()
            .map(|(name, value)| (name.clone(), value.clone().into_driver_value()))
            .collect();

        let started = Instant::now();
        let result = {
            let mut link = self.inner.link.lock().await;
            let result = match link.driver.as_ref() {
                Some(driver) => driver
                    .run(sql, &binds)
                    .await
                    .map(|output| (output, driver.status())),
                None => Err(DriverError::NotConnected),
            };
            if let Ok((output, _)) = &result {
                if output.last_insert_id.is_some() {
                    link.last_insert_id = output.last_insert_id;
                }
            }
            result
        };

        match result {
            Ok((output, status)) => {
                if self.is_debug_enabled() {
                    let elapsed = started.elapsed();
                    tracing::debug!(
                        connection = %self.name(),
                        query_type = %QueryType::of(sql),
                        elapsed_ms = elapsed.as_millis() as u64,
                        rows = output.affected_rows,
                        "statement executed"
                    );
                    self.inner
                        .debug_log
                        .lock()
                        .record_query(QueryTrace::new(elapsed, status, sql, &binds));
                }
                Ok(output)
            }
            Err(err) => {
                self.evict().await;
                Err(self.report(
                    self.error(err.kind(), err.to_string())
                        .with_query(sql, binds),
                ))
            }
        }
    }

    /// Begin a transaction, or enter one more nesting level of the open one
    ///
    /// Only the outermost `begin` starts a physical transaction.
    ///
    /// # Errors
    ///
    /// Returns a [`QueryError`] if the connection is closed or the driver cannot start the
    /// transaction.
    #[track_caller]
    pub fn begin(&self) -> impl Future<Output = Result<()>> + Send + '_ {
        let caller = CallSite::from(Location::caller());
        async move { self.begin_at(caller).await }
    }

    /// Leave one nesting level; the level that brings the depth to zero commits
    ///
    /// # Errors
    ///
    /// Returns a protocol error without an open transaction, or a [`QueryError`] if the
    /// physical commit fails; the transaction is then rolled back.
    #[track_caller]
    pub fn commit(&self) -> impl Future<Output = Result<()>> + Send + '_ {
        let caller = CallSite::from(Location::caller());
        async move { self.commit_at(caller).await }
    }

    /// Roll back the whole transaction, whatever the nesting depth
    ///
    /// # Errors
    ///
    /// Returns a protocol error without an open transaction, or a [`QueryError`] if the
    /// physical rollback fails.
    #[track_caller]
    pub fn rollback(&self) -> impl Future<Output = Result<()>> + Send + '_ {
        let caller = CallSite::from(Location::caller());
        async move { self.rollback_at(caller).await }
    }

    /// Run `work` inside `begin`/`commit`, rolling back if it fails
    ///
    /// Nested calls join the enclosing transaction.
    ///
    /// # Errors
    ///
    /// Returns the error of `work` unchanged (after the rollback), or the error of
    /// `begin`/`commit`.
    #[track_caller]
    pub fn transaction<'a, T, F, Fut>(&'a self, work: F) -> impl Future<Output = Result<T>> + 'a
    where
        T: 'a,
        F: FnOnce(Connection) -> Fut + 'a,
        Fut: Future<Output = Result<T>> + 'a,
    {
        let caller = CallSite::from(Location::caller());
        async move {
            self.begin_at(caller).await?;
            match work(self.clone()).await {
                Ok(value) => {
                    self.commit_at(caller).await?;
                    Ok(value)
                }
                Err(err) => {
                    self.rollback_after_failure(caller).await;
                    Err(err)
                }
            }
        }
    }

    pub(crate) async fn begin_at(&self, caller: CallSite) -> Result<()> {
        let mut link = self.inner.link.lock().await;
        let driver = link
            .driver
            .as_ref()
            .ok_or_else(|| self.report(self.disconnected()))?;

        if link.depth == 0 {
            if let Err(err) = driver.begin().await {
                return Err(self.report(self.error(
                    QueryErrorKind::Transaction,
                    format!("Failed to start a transaction: {}", err),
                )));
            }
        }

        link.depth += 1;
        self.trace_transaction(format!("begin_{}", link.depth), caller);
        Ok(())
    }

    pub(crate) async fn commit_at(&self, caller: CallSite) -> Result<()> {
        let mut link = self.inner.link.lock().await;
        if link.depth == 0 {
            return Err(DatabaseError::protocol(
                "Commit called without active transaction.",
            ));
        }

        self.trace_transaction(format!("commit_{}", link.depth), caller);
        link.depth -= 1;

        if link.depth == 0 {
            let driver = link
                .driver
                .as_ref()
                .ok_or_else(|| self.report(self.disconnected()))?;

            if let Err(err) = driver.commit().await {
                // The depth is already zero; leave no physical transaction behind
                if driver.in_transaction() {
                    if let Err(rollback_err) = driver.rollback().await {
                        tracing::warn!(
                            connection = %self.name(),
                            error = %rollback_err,
                            "rollback after failed commit did not succeed"
                        );
                    }
                }
                return Err(self.report(self.error(
                    QueryErrorKind::Transaction,
                    format!("Failed to commit a transaction: {}", err),
                )));
            }
        }

        Ok(())
    }

    pub(crate) async fn rollback_at(&self, caller: CallSite) -> Result<()> {
        let mut link = self.inner.link.lock().await;
        if link.depth == 0 {
            return Err(DatabaseError::protocol(
                "Rollback called without active transaction.",
            ));
        }

        self.trace_transaction("rollback".to_string(), caller);
        link.depth = 0;

        // A closed link already dropped its transaction
        if let Some(driver) = link.driver.as_ref() {
            if let Err(err) = driver.rollback().await {
                return Err(self.report(self.error(
                    QueryErrorKind::Transaction,
                    format!("Failed to rollback a transaction: {}", err),
                )));
            }
        }

        Ok(())
    }

    /// Roll back after a failed unit of work, keeping the original error for the caller
    pub(crate) async fn rollback_after_failure(&self, caller: CallSite) {
        if !self.in_transaction().await {
            return;
        }
        if let Err(err) = self.rollback_at(caller).await {
            tracing::warn!(
                connection = %self.name(),
                error = %err,
                "rollback after failed operation did not succeed"
            );
        }
    }

    /// Empty a table, resetting its auto-increment counter where the backend supports it
    ///
    /// Backticks are stripped and every dot-separated segment is re-quoted.
    ///
    /// # Errors
    ///
    /// Returns a validation error for invalid table names, or a [`QueryError`] if the
    /// statement fails.
    pub async fn truncate(&self, table: &str) -> Result<()> {
        let table = quote_table(&table.replace('`', ""))?;
        let sql = self.database_type().truncate_statement(&table);
        self.query(&sql, &Binds::new()).await?;
        Ok(())
    }

    /// Check the link with `SELECT 1`
    ///
    /// Returns `false` if the link is closed or the ping fails; a failed ping does not
    /// close the connection.
    pub async fn ping(&self) -> bool {
        let link = self.inner.link.lock().await;
        match link.driver.as_ref() {
            Some(driver) => driver.run("SELECT 1", &Binds::new()).await.is_ok(),
            None => false,
        }
    }

    /// Auto-increment id generated by the most recent insert on this connection
    pub async fn last_insert_id(&self) -> Option<u64> {
        self.inner.link.lock().await.last_insert_id
    }

    /// Start recording statements and transaction call sites
    pub fn debug_enable(&self) -> &Self {
        self.inner.debug_enabled.store(true, Ordering::Release);
        self
    }

    /// Stop recording and discard the log
    pub fn debug_disable(&self) -> &Self {
        self.inner.debug_enabled.store(false, Ordering::Release);
        self.inner.debug_log.lock().clear();
        self
    }

    /// Check if debug mode is on
    pub fn is_debug_enabled(&self) -> bool {
        self.inner.debug_enabled.load(Ordering::Acquire)
    }

    /// Snapshot of the debug log, `None` unless debug mode is on
    pub fn debug_info(&self) -> Option<DebugLog> {
        self.is_debug_enabled()
            .then(|| self.inner.debug_log.lock().clone())
    }

    /// Call sites of `begin_N`/`commit_N`/`rollback`, `None` unless debug mode is on
    pub fn transaction_trace(&self) -> Option<IndexMap<String, CallSite>> {
        self.is_debug_enabled()
            .then(|| self.inner.debug_log.lock().transactions.clone())
    }

    /// Log every runtime error of this connection with `tracing::error!`
    pub fn track_errors_enable(&self) -> &Self {
        self.inner.track_errors.store(true, Ordering::Release);
        self
    }

    /// Stop logging runtime errors
    pub fn track_errors_disable(&self) -> &Self {
        self.inner.track_errors.store(false, Ordering::Release);
        self
    }

    /// Check if runtime errors are logged
    pub fn is_tracking_errors(&self) -> bool {
        self.inner.track_errors.load(Ordering::Acquire)
    }

    /// SELECT builder for `sql`
    pub fn select(&self, sql: impl Into<String>) -> SelectBuilder {
        SelectBuilder::new(self).query(sql)
    }

    /// INSERT builder for `table`
    ///
    /// # Errors
    ///
    /// Returns a validation error for invalid table names.
    pub fn insert(&self, table: &str) -> Result<InsertBuilder> {
        InsertBuilder::new(self).into_table(table)
    }

    /// REPLACE builder for `table`
    ///
    /// # Errors
    ///
    /// Returns a validation error for invalid table names.
    pub fn replace(&self, table: &str) -> Result<ReplaceBuilder> {
        ReplaceBuilder::new(self).table(table)
    }

    /// UPDATE builder for `table`
    ///
    /// # Errors
    ///
    /// Returns a validation error for invalid table names.
    pub fn update(&self, table: &str) -> Result<UpdateBuilder> {
        UpdateBuilder::new(self).table(table)
    }

    /// DELETE builder for `table`
    ///
    /// # Errors
    ///
    /// Returns a validation error for invalid table names.
    pub fn delete(&self, table: &str) -> Result<DeleteBuilder> {
        DeleteBuilder::new(self).from(table)
    }

    /// The unbuffered variant of this connection, opened on first use
    pub(crate) async fn unbuffered(&self) -> Result<Connection> {
        let registry = self.inner.registry.upgrade().ok_or_else(|| {
            DatabaseError::protocol("The registry of this connection has been dropped")
        })?;

        registry
            .connect(
                self.name(),
                super::registry::ConnectOptions::default()
                    .debug(self.is_debug_enabled())
                    .track_errors(self.is_tracking_errors())
                    .unbuffered(true),
            )
            .await
    }

    /// Runtime error report carrying this connection's identity
    pub(crate) fn error(&self, kind: QueryErrorKind, message: impl Into<String>) -> QueryError {
        QueryError::new(kind, self.hostname(), self.name(), message)
            .with_attributes(self.inner.settings.attributes.clone())
    }

    /// Log the error if error tracking is on, and turn it into a [`DatabaseError`]
    pub(crate) fn report(&self, err: QueryError) -> DatabaseError {
        if self.is_tracking_errors() {
            tracing::error!(
                connection = %err.connection_name(),
                host = %err.host(),
                kind = %err.kind(),
                query = %err.query(),
                "{}",
                err.message()
            );
        }
        err.into()
    }

    fn disconnected(&self) -> QueryError {
        self.error(QueryErrorKind::Disconnected, "Connection is closed")
    }

    fn trace_transaction(&self, key: String, caller: CallSite) {
        if self.is_debug_enabled() {
            self.inner.debug_log.lock().record_transaction(key, caller);
        }
    }

    /// Close this connection and drop it from its registry
    async fn evict(&self) {
        match self.inner.registry.upgrade() {
            Some(registry) => registry.disconnect_connection(self).await,
            None => self.close().await,
        }
    }

    /// Roll back an open physical transaction and close the link
    ///
    /// The nesting depth is left as is, so a pending `rollback()` of the caller still
    /// succeeds.
    pub(crate) async fn close(&self) {
        let mut link = self.inner.link.lock().await;
        if let Some(driver) = link.driver.take() {
            if driver.in_transaction() {
                if let Err(err) = driver.rollback().await {
                    tracing::warn!(connection = %self.name(), error = %err, "rollback on disconnect failed");
                }
            }
            if let Err(err) = driver.close().await {
                tracing::warn!(connection = %self.name(), error = %err, "closing link failed");
            }
            tracing::info!(connection = %self.name(), host = %self.hostname(), "disconnected");
        }
    }

    /// Apply the per-call flags of a registry lookup
    pub(crate) fn apply_flags(&self, debug: bool, track_errors: bool) {
        if debug {
            self.debug_enable();
        } else {
            self.debug_disable();
        }
        self.inner.track_errors.store(track_errors, Ordering::Release);
    }

    /// Check if both handles refer to the same connection
    pub fn same_as(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::core::test_support::sqlite_registry;

    #[tokio::test]
    async fn test_nested_transaction_depth() -> Result<()> {
        let conn = sqlite_registry("conn_nested").connect("local").await?;

        conn.begin().await?;
        conn.begin().await?;
        conn.commit().await?;
        assert_eq!(conn.transaction_depth().await, 1);

        conn.commit().await?;
        assert_eq!(conn.transaction_depth().await, 0);

        conn.begin().await?;
        conn.begin().await?;
        conn.begin().await?;
        conn.rollback().await?;
        assert!(!conn.in_transaction().await);
        Ok(())
    }

    #[tokio::test]
    async fn test_commit_without_transaction() -> Result<()> {
        let conn = sqlite_registry("conn_no_tx").connect("local").await?;

        assert!(matches!(
            conn.commit().await,
            Err(DatabaseError::Protocol(_))
        ));
        assert!(matches!(
            conn.rollback().await,
            Err(DatabaseError::Protocol(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_transaction_trace_records_call_sites() -> Result<()> {
        let conn = sqlite_registry("conn_trace").connect("local").await?;
        assert!(conn.transaction_trace().is_none());

        conn.debug_enable();
        conn.begin().await?;
        conn.begin().await?;
        conn.commit().await?;
        conn.rollback().await?;

        let trace = conn.transaction_trace().expect("debug enabled");
        let keys: Vec<&str> = trace.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["begin_1", "begin_2", "commit_2", "rollback"]);
        assert!(trace["begin_1"].file.ends_with("connection.rs"));

        conn.debug_disable();
        assert!(conn.debug_info().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_query_closes_connection() -> Result<()> {
        let registry = sqlite_registry("conn_failure");
        let conn = registry.connect("local").await?;

        let err = conn
            .query("SELECT * FROM missing_table", &Binds::new())
            .await
            .unwrap_err();
        let report = err.as_query_error().expect("runtime error");
        assert_eq!(report.kind(), QueryErrorKind::Statement);
        assert_eq!(report.connection_name(), "local");
        assert_eq!(report.query(), "SELECT * FROM missing_table");

        assert!(!conn.is_connected().await);
        assert!(!conn.ping().await);

        let fresh = registry.connect("local").await?;
        assert!(!fresh.same_as(&conn));
        assert!(fresh.ping().await);
        Ok(())
    }

    #[tokio::test]
    async fn test_debug_log_records_queries() -> Result<()> {
        let conn = sqlite_registry("conn_debug").connect("local").await?;
        conn.debug_enable();

        conn.query("CREATE TABLE t (id INTEGER PRIMARY KEY)", &Binds::new())
            .await?;
        let mut binds = Binds::new();
        binds.insert(":id".to_string(), 5.into());
        conn.query("INSERT INTO t (id) VALUES (:id)", &binds).await?;
        assert_eq!(conn.last_insert_id().await, Some(5));

        let log = conn.debug_info().expect("debug enabled");
        assert_eq!(log.queries.len(), 2);
        assert_eq!(log.queries[1].binds.len(), 1);
        assert!(log.queries[1].connection.contains("SQLite"));
        Ok(())
    }

    #[tokio::test]
    async fn test_truncate() -> Result<()> {
        let conn = sqlite_registry("conn_truncate").connect("local").await?;
        conn.query("CREATE TABLE t (id INTEGER PRIMARY KEY)", &Binds::new())
            .await?;
        conn.query("INSERT INTO t (id) VALUES (1), (2)", &Binds::new())
            .await?;

        conn.truncate("`t`").await?;
        let output = conn.query("SELECT * FROM t", &Binds::new()).await?;
        assert!(output.rows.is_empty());

        assert!(matches!(
            conn.truncate("t; DROP TABLE t").await,
            Err(DatabaseError::Validation(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_transaction_helper_rolls_back() -> Result<()> {
        let conn = sqlite_registry("conn_tx_helper").connect("local").await?;
        conn.query("CREATE TABLE t (id INTEGER PRIMARY KEY)", &Binds::new())
            .await?;

        let result: Result<()> = conn
            .transaction(|tx| async move {
                tx.query("INSERT INTO t (id) VALUES (1)", &Binds::new())
                    .await?;
                Err(DatabaseError::validation("abort"))
            })
            .await;
        assert!(matches!(result, Err(DatabaseError::Validation(_))));
        assert_eq!(conn.transaction_depth().await, 0);

        let output = conn.query("SELECT * FROM t", &Binds::new()).await?;
        assert!(output.rows.is_empty());
        Ok(())
    }
}

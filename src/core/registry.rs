//! Connection registry
//!
//! The registry is the process-wide entry point: it resolves connection settings from a
//! [`ConfigSource`], opens links through a [`Connector`] and caches one live connection per
//! (name, buffered/unbuffered) pair. If the primary host cannot be reached and a fallback is
//! configured, exactly one attempt is made against the fallback.

use super::config::{ConfigSource, ConnectionSettings};
use super::connection::Connection;
use super::driver::{Connector, DefaultConnector};
use super::error::{QueryError, QueryErrorKind, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Per-call options of [`ConnectionRegistry::connect_with`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectOptions {
    debug: bool,
    track_errors: bool,
    unbuffered: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            debug: false,
            track_errors: true,
            unbuffered: false,
        }
    }
}

impl ConnectOptions {
    /// Record statements and transaction call sites
    #[must_use]
    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    /// Log runtime errors with `tracing::error!` (on by default)
    #[must_use]
    pub fn track_errors(mut self, enabled: bool) -> Self {
        self.track_errors = enabled;
        self
    }

    /// Open the separate unbuffered variant of the connection
    #[must_use]
    pub fn unbuffered(mut self, enabled: bool) -> Self {
        self.unbuffered = enabled;
        self
    }
}

type CacheKey = (String, bool);

pub(crate) struct RegistryShared {
    config: Arc<dyn ConfigSource>,
    connector: Arc<dyn Connector>,
    connections: Mutex<HashMap<CacheKey, Connection>>,
}

impl RegistryShared {
    pub(crate) async fn connect(
        self: &Arc<Self>,
        name: &str,
        options: ConnectOptions,
    ) -> Result<Connection> {
        let mut connections = self.connections.lock().await;
        let key = (name.to_string(), options.unbuffered);

        if let Some(conn) = connections.get(&key) {
            conn.apply_flags(options.debug, options.track_errors);
            return Ok(conn.clone());
        }

        let settings = ConnectionSettings::resolve(self.config.as_ref(), name, options.unbuffered)?;
        let conn = self.open(settings).await?;
        conn.apply_flags(options.debug, options.track_errors);

        connections.insert(key, conn.clone());
        Ok(conn)
    }

    async fn open(self: &Arc<Self>, settings: ConnectionSettings) -> Result<Connection> {
        let primary_error = match self.connector.open(&settings).await {
            Ok(driver) => {
                tracing::info!(
                    connection = %settings.name,
                    host = %settings.hostname,
                    database_type = %settings.database_type,
                    "connected"
                );
                return Ok(Connection::new(settings, driver, Arc::downgrade(self)));
            }
            Err(err) => err,
        };

        let Some(fallback) = settings.fallback_settings() else {
            return Err(QueryError::new(
                QueryErrorKind::Connection,
                &settings.hostname,
                &settings.name,
                primary_error.to_string(),
            )
            .with_attributes(settings.attributes.clone())
            .into());
        };

        tracing::info!(
            connection = %settings.name,
            host = %settings.hostname,
            fallback = %fallback.hostname,
            error = %primary_error,
            "primary host unreachable, trying fallback"
        );

        match self.connector.open(&fallback).await {
            Ok(driver) => Ok(Connection::new(fallback, driver, Arc::downgrade(self))),
            Err(err) => Err(QueryError::new(
                QueryErrorKind::Connection,
                &fallback.hostname,
                &fallback.name,
                err.to_string(),
            )
            .with_attributes(fallback.attributes.clone())
            .into()),
        }
    }

    /// Close and evict every variant of `name`
    async fn disconnect(&self, name: &str) {
        let evicted: Vec<Connection> = {
            let mut connections = self.connections.lock().await;
            [false, true]
                .into_iter()
                .filter_map(|unbuffered| connections.remove(&(name.to_string(), unbuffered)))
                .collect()
        };

        for conn in evicted {
            conn.close().await;
        }
    }

    /// Close `conn`; if it is the cached connection of its name, evict the whole name
    pub(crate) async fn disconnect_connection(&self, conn: &Connection) {
        let cached = {
            let connections = self.connections.lock().await;
            connections
                .get(&(conn.name().to_string(), conn.is_unbuffered()))
                .is_some_and(|cached| cached.same_as(conn))
        };

        if cached {
            self.disconnect(conn.name()).await;
        } else {
            conn.close().await;
        }
    }
}

/// Cache of named connections
///
/// # Example
///
/// ```ignore
/// use sql_gateway::prelude::*;
///
/// let config: JsonConfig = r#"{
///     "main": {
///         "hostname": "db1.internal",
///         "username": "app",
///         "password": "secret",
///         "schema": "shop",
///         "fallback": "db2.internal"
///     }
/// }"#.parse()?;
///
/// let registry = ConnectionRegistry::new(config);
/// let conn = registry.connect("main").await?;
/// ```
#[derive(Clone)]
pub struct ConnectionRegistry {
    shared: Arc<RegistryShared>,
}

impl ConnectionRegistry {
    /// Registry opening links with the backends compiled into the crate
    pub fn new(config: impl ConfigSource + 'static) -> Self {
        Self::with_connector(config, DefaultConnector)
    }

    /// Registry opening links with a custom connector
    pub fn with_connector(
        config: impl ConfigSource + 'static,
        connector: impl Connector + 'static,
    ) -> Self {
        Self {
            shared: Arc::new(RegistryShared {
                config: Arc::new(config),
                connector: Arc::new(connector),
                connections: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Get the cached connection `name`, opening it on first use
    ///
    /// # Errors
    ///
    /// Returns a configuration error for missing or invalid settings, or a [`QueryError`]
    /// of kind [`Connection`](QueryErrorKind::Connection) if neither the primary host nor the
    /// fallback can be opened.
    pub async fn connect(&self, name: &str) -> Result<Connection> {
        self.shared.connect(name, ConnectOptions::default()).await
    }

    /// Like [`connect`](Self::connect), applying `options`
    ///
    /// On a cached connection the debug and error tracking flags are switched to the
    /// requested values; turning debug off discards the recorded log.
    ///
    /// # Errors
    ///
    /// Same as [`connect`](Self::connect).
    pub async fn connect_with(&self, name: &str, options: ConnectOptions) -> Result<Connection> {
        self.shared.connect(name, options).await
    }

    /// Close both variants of `name` and drop them from the cache
    ///
    /// Open transactions are rolled back. Unknown names are ignored.
    pub async fn disconnect(&self, name: &str) {
        self.shared.disconnect(name).await;
    }

    /// Close every cached connection
    pub async fn close(&self) {
        let evicted: Vec<Connection> = {
            let mut connections = self.shared.connections.lock().await;
            connections.drain().map(|(_, conn)| conn).collect()
        };

        for conn in evicted {
            conn.close().await;
        }
    }

    /// Check if a connection `name` (buffered or unbuffered) is cached
    pub async fn is_cached(&self, name: &str, unbuffered: bool) -> bool {
        self.shared
            .connections
            .lock()
            .await
            .contains_key(&(name.to_string(), unbuffered))
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::*;
    use crate::core::error::DatabaseError;
    use crate::core::test_support::{sqlite_config, sqlite_registry};

    #[tokio::test]
    async fn test_connect_reuses_connection() -> Result<()> {
        let registry = sqlite_registry("registry_reuse");
        let first = registry.connect("local").await?;
        let second = registry.connect("local").await?;
        assert!(first.same_as(&second));

        let unbuffered = registry
            .connect_with("local", ConnectOptions::default().unbuffered(true))
            .await?;
        assert!(!unbuffered.same_as(&first));
        assert!(unbuffered.is_unbuffered());
        assert!(registry.is_cached("local", true).await);
        Ok(())
    }

    #[tokio::test]
    async fn test_connect_toggles_flags() -> Result<()> {
        let registry = sqlite_registry("registry_flags");
        let conn = registry
            .connect_with("local", ConnectOptions::default().debug(true))
            .await?;
        assert!(conn.is_debug_enabled());
        assert!(conn.is_tracking_errors());

        registry
            .connect_with("local", ConnectOptions::default().track_errors(false))
            .await?;
        assert!(!conn.is_debug_enabled());
        assert!(!conn.is_tracking_errors());
        Ok(())
    }

    #[tokio::test]
    async fn test_disconnect_evicts_both_variants() -> Result<()> {
        let registry = sqlite_registry("registry_disconnect");
        let conn = registry.connect("local").await?;
        registry
            .connect_with("local", ConnectOptions::default().unbuffered(true))
            .await?;

        registry.disconnect("local").await;
        assert!(!registry.is_cached("local", false).await);
        assert!(!registry.is_cached("local", true).await);
        assert!(!conn.is_connected().await);

        let fresh = registry.connect("local").await?;
        assert!(!fresh.same_as(&conn));
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_connection_is_config_error() {
        let registry = ConnectionRegistry::new(sqlite_config("registry_unknown"));
        let err = registry.connect("missing").await.unwrap_err();
        assert!(matches!(err, DatabaseError::Config(_)));
    }
}

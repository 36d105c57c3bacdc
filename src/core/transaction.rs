//! Transaction guard for automatic rollback on drop
//!
//! This module provides RAII-style transaction management on top of the nested
//! `begin`/`commit`/`rollback` of a [`Connection`].

use super::connection::Connection;
use super::debug::CallSite;
use super::error::Result;
use std::future::Future;
use std::ops::Deref;
use std::panic::Location;

/// Transaction guard that rolls back on drop if not committed
///
/// The guard takes one nesting level of its connection. Dropping it without `commit()` or
/// `rollback()` schedules a rollback of the whole transaction, like an explicit
/// [`Connection::rollback`].
///
/// # Example
///
/// ```ignore
/// use sql_gateway::prelude::*;
///
/// async fn transfer(conn: &Connection) -> Result<()> {
///     let tx = TransactionGuard::begin(conn).await?;
///
///     tx.update("accounts")?
///         .value("balance", Expression::new("balance - 100")?)?
///         .where_clause("id = 1")
///         .execute()
///         .await?;
///     tx.update("accounts")?
///         .value("balance", Expression::new("balance + 100")?)?
///         .where_clause("id = 2")
///         .execute()
///         .await?;
///
///     tx.commit().await
/// }
/// ```
pub struct TransactionGuard {
    conn: Connection,
    site: CallSite,
    finished: bool,
}

impl TransactionGuard {
    /// Begin a transaction (or enter one more level of the open one)
    ///
    /// # Errors
    ///
    /// Returns a [`QueryError`](super::error::QueryError) if the connection is closed or the
    /// transaction cannot be started.
    #[track_caller]
    pub fn begin(conn: &Connection) -> impl Future<Output = Result<Self>> + Send + '_ {
        let site = CallSite::from(Location::caller());
        async move {
            conn.begin_at(site).await?;
            Ok(Self {
                conn: conn.clone(),
                site,
                finished: false,
            })
        }
    }

    /// Leave the nesting level taken by `begin`, committing if it is the outermost one
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails; the guard does not roll back afterwards.
    pub async fn commit(mut self) -> Result<()> {
        self.finished = true;
        self.conn.commit_at(self.site).await
    }

    /// Roll back the whole transaction
    ///
    /// # Errors
    ///
    /// Returns an error if the rollback fails.
    pub async fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.conn.rollback_at(self.site).await
    }

    /// The connection the transaction runs on
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl Deref for TransactionGuard {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl Drop for TransactionGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!(
                    connection = %self.conn.name(),
                    begin = %self.site,
                    "transaction guard dropped without commit or rollback, rolling back"
                );
                let conn = self.conn.clone();
                let site = self.site;
                handle.spawn(async move {
                    conn.rollback_after_failure(site).await;
                });
            }
            Err(_) => {
                // The link rolls the transaction back when it is closed
                tracing::warn!(
                    connection = %self.conn.name(),
                    begin = %self.site,
                    "transaction guard dropped outside a tokio runtime, rollback skipped"
                );
            }
        }
    }
}

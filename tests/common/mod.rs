//! Scripted driver shared by the integration tests
//!
//! `RecordingConnector` hands out `RecordingDriver` links that log every call into a shared
//! [`Script`] and fail on demand.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use sql_gateway::core::driver::DEFAULT_MAX_BIND_PARAMS;
use sql_gateway::core::{
    ConnectionSettings, Connector, DatabaseType, Driver, DriverError, DriverResult, QueryOutput,
};
use sql_gateway::prelude::*;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Everything the drivers of one connector did, plus the failures to inject
#[derive(Default)]
pub struct Script {
    events: Mutex<Vec<String>>,
    opened: Mutex<Vec<String>>,
    unreachable: Mutex<HashSet<String>>,
    fail_on_run: Mutex<Option<usize>>,
    fail_commit: AtomicBool,
    max_bind_params: Mutex<Option<usize>>,
    runs: Mutex<usize>,
}

impl Script {
    /// Calls in order: `BEGIN`, `COMMIT`, `ROLLBACK` or the statement text
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    /// Statements only
    pub fn statements(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|event| !matches!(event.as_str(), "BEGIN" | "COMMIT" | "ROLLBACK"))
            .collect()
    }

    /// Hosts of every successful open
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().clone()
    }

    /// Refuse connections to `host`
    pub fn refuse(&self, host: &str) {
        self.unreachable.lock().insert(host.to_string());
    }

    /// Fail the statement with this zero-based index
    pub fn fail_run(&self, index: usize) {
        *self.fail_on_run.lock() = Some(index);
    }

    /// Reject the next physical COMMIT
    pub fn fail_commit(&self) {
        self.fail_commit.store(true, Ordering::SeqCst);
    }

    /// Parameter limit reported by links opened from now on
    pub fn limit_bind_params(&self, limit: usize) {
        *self.max_bind_params.lock() = Some(limit);
    }

    fn record(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }
}

/// Connector whose links record into one [`Script`]
#[derive(Clone, Default)]
pub struct RecordingConnector {
    pub script: Arc<Script>,
}

#[async_trait]
impl Connector for RecordingConnector {
    async fn open(&self, settings: &ConnectionSettings) -> DriverResult<Box<dyn Driver>> {
        if self.script.unreachable.lock().contains(&settings.hostname) {
            return Err(DriverError::other(format!(
                "Connection refused by {}",
                settings.hostname
            )));
        }

        self.script.opened.lock().push(settings.hostname.clone());
        Ok(Box::new(RecordingDriver {
            script: Arc::clone(&self.script),
            host: settings.hostname.clone(),
            in_transaction: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct RecordingDriver {
    script: Arc<Script>,
    host: String,
    in_transaction: AtomicBool,
    closed: AtomicBool,
}

impl RecordingDriver {
    fn ensure_open(&self) -> DriverResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(DriverError::NotConnected)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Driver for RecordingDriver {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::Mysql
    }

    fn status(&self) -> String {
        format!("{} via TCP/IP", self.host)
    }

    fn max_bind_params(&self) -> usize {
        self.script
            .max_bind_params
            .lock()
            .unwrap_or(DEFAULT_MAX_BIND_PARAMS)
    }

    async fn run(&self, sql: &str, _binds: &Binds) -> DriverResult<QueryOutput> {
        self.ensure_open()?;
        self.script.record(sql);

        let index = {
            let mut runs = self.script.runs.lock();
            let index = *runs;
            *runs += 1;
            index
        };
        if *self.script.fail_on_run.lock() == Some(index) {
            return Err(DriverError::other("Deadlock found when trying to get lock"));
        }

        let rows = sql.lines().filter(|line| line.starts_with('(')).count();
        Ok(QueryOutput::affected(rows as u64))
    }

    async fn begin(&self) -> DriverResult<()> {
        self.ensure_open()?;
        self.script.record("BEGIN");
        self.in_transaction.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn commit(&self) -> DriverResult<()> {
        self.ensure_open()?;
        self.script.record("COMMIT");
        if self.script.fail_commit.swap(false, Ordering::SeqCst) {
            return Err(DriverError::other("Lock wait timeout exceeded"));
        }
        self.in_transaction.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self) -> DriverResult<()> {
        self.ensure_open()?;
        self.script.record("ROLLBACK");
        self.in_transaction.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::SeqCst)
    }

    async fn close(&self) -> DriverResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Configuration of connection `main` on `db-primary`, with extra keys merged in
pub fn mysql_config(extra: Value) -> JsonConfig {
    let mut main = json!({
        "driver": "mysql",
        "hostname": "db-primary",
        "username": "app",
        "password": "secret",
        "schema": "shop",
    });
    if let (Some(main), Some(extra)) = (main.as_object_mut(), extra.as_object()) {
        main.extend(extra.clone());
    }
    JsonConfig::new(json!({ "main": main }))
}

/// Registry over [`mysql_config`] backed by a fresh recording connector
pub fn recording_registry(extra: Value) -> (ConnectionRegistry, Arc<Script>) {
    let connector = RecordingConnector::default();
    let script = Arc::clone(&connector.script);
    (
        ConnectionRegistry::with_connector(mysql_config(extra), connector),
        script,
    )
}

/// `count` rows of roughly `payload` bytes each
pub fn payload_rows(count: usize, payload: usize) -> Vec<Record> {
    (0..count)
        .map(|i| {
            Record::new()
                .set("id", i as i64 + 1)
                .set("body", "x".repeat(payload))
        })
        .collect()
}

//! Debug log of a connection
//!
//! When debug mode is on, every statement is recorded with its elapsed time, and every
//! `begin`/`commit`/`rollback` records the call site that issued it. The transaction trace is
//! the quickest way to find an unbalanced `begin` in code composed of helpers that each open
//! their own transaction.

use super::database_types::QueryType;
use super::value::{Binds, DatabaseValue};
use indexmap::IndexMap;
use serde::Serialize;
use std::panic::Location;
use std::time::Duration;

/// INSERT/REPLACE statements keep at most this many binds in the log
pub const DEBUG_BINDS_MAX_COUNT: usize = 20;

/// One executed statement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryTrace {
    /// Wall time spent in the driver
    pub execution_time: Duration,
    /// Link description reported by the driver
    pub connection: String,
    pub query: String,
    pub binds: Vec<(String, DatabaseValue)>,
}

impl QueryTrace {
    pub(crate) fn new(execution_time: Duration, connection: String, query: &str, binds: &Binds) -> Self {
        let limit = if QueryType::of(query).is_batch_write() {
            DEBUG_BINDS_MAX_COUNT
        } else {
            usize::MAX
        };

        Self {
            execution_time,
            connection,
            query: query.to_string(),
            binds: binds
                .iter()
                .take(limit)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

/// Source location of a transaction call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CallSite {
    pub file: &'static str,
    pub line: u32,
    pub column: u32,
}

impl From<&'static Location<'static>> for CallSite {
    fn from(location: &'static Location<'static>) -> Self {
        Self {
            file: location.file(),
            line: location.line(),
            column: location.column(),
        }
    }
}

impl std::fmt::Display for CallSite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Everything recorded while debug mode was on
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DebugLog {
    /// Executed statements, oldest first
    pub queries: Vec<QueryTrace>,
    /// Transaction calls keyed `begin_N`, `commit_N` (N = depth at the call) and `rollback`
    pub transactions: IndexMap<String, CallSite>,
}

impl DebugLog {
    pub(crate) fn record_query(&mut self, trace: QueryTrace) {
        self.queries.push(trace);
    }

    pub(crate) fn record_transaction(&mut self, key: String, site: CallSite) {
        self.transactions.insert(key, site);
    }

    pub(crate) fn clear(&mut self) {
        self.queries.clear();
        self.transactions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_binds_are_capped() {
        let binds: Binds = (0..50)
            .map(|i| (format!(":v_{}", i), DatabaseValue::Int(i)))
            .collect();

        let trace = QueryTrace::new(
            Duration::from_millis(3),
            "local".to_string(),
            "INSERT INTO t (v) VALUES (:v_0)",
            &binds,
        );
        assert_eq!(trace.binds.len(), DEBUG_BINDS_MAX_COUNT);

        let trace = QueryTrace::new(
            Duration::from_millis(3),
            "local".to_string(),
            "SELECT * FROM t",
            &binds,
        );
        assert_eq!(trace.binds.len(), 50);
    }

    #[test]
    fn test_call_site_from_location() {
        let site = CallSite::from(Location::caller());
        assert!(site.file.ends_with("debug.rs"));
        assert!(site.to_string().contains("debug.rs:"));
    }
}

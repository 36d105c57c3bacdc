//! Error types for the database layer
//!
//! Failures fall into two groups:
//!
//! - programmer errors (`Config`, `Validation`, `Protocol`) are detectable without touching
//!   the database and indicate a bug at the call site;
//! - runtime errors (`Query`) carry a [`QueryError`] with the diagnostics needed to
//!   investigate a failed connection or statement.

use super::database_types::QueryType;
use super::value::DatabaseValue;
use std::collections::BTreeMap;
use std::fmt;

/// Result type alias for database operations
pub type Result<T> = std::result::Result<T, DatabaseError>;

/// Query text longer than this is truncated in error reports
pub const QUERY_TEXT_MAX_BYTES: usize = 2048;

/// INSERT/REPLACE error reports keep at most this many binds
pub const INSERT_REPLACE_BINDS_MAX_COUNT: usize = 5;

/// Error types for database operations
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// Connection configuration is missing, malformed or forbidden
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input detected before anything reaches the database
    #[error("Validation error: {0}")]
    Validation(String),

    /// Operation called in the wrong order (execute twice, fetch before execute, ...)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Runtime failure of a connection or a statement
    #[error(transparent)]
    Query(Box<QueryError>),
}

impl DatabaseError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        DatabaseError::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        DatabaseError::Validation(msg.into())
    }

    /// Create a protocol error
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        DatabaseError::Protocol(msg.into())
    }

    /// True for mistakes of the calling code, false for runtime/environment failures
    pub fn is_programmer_error(&self) -> bool {
        !matches!(self, DatabaseError::Query(_))
    }

    /// The runtime error details, if this is a runtime failure
    pub fn as_query_error(&self) -> Option<&QueryError> {
        match self {
            DatabaseError::Query(err) => Some(err),
            _ => None,
        }
    }
}

impl From<QueryError> for DatabaseError {
    fn from(err: QueryError) -> Self {
        DatabaseError::Query(Box::new(err))
    }
}

/// Category of a runtime failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryErrorKind {
    /// Opening the physical connection failed
    Connection,
    /// The driver rejected or failed to run a statement
    Statement,
    /// A single batch row is larger than one statement may carry
    OversizedRow,
    /// The driver failed to begin, commit or roll back
    Transaction,
    /// The driver did not answer within the operation timeout
    Timeout,
    /// The connection was closed (explicitly or after an earlier failure)
    Disconnected,
}

impl QueryErrorKind {
    fn as_str(&self) -> &'static str {
        match self {
            QueryErrorKind::Connection => "connection",
            QueryErrorKind::Statement => "statement",
            QueryErrorKind::OversizedRow => "oversized row",
            QueryErrorKind::Transaction => "transaction",
            QueryErrorKind::Timeout => "timeout",
            QueryErrorKind::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for QueryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime failure report
///
/// Identity fields (host, connection name) are copied at construction so the report
/// outlives the connection that produced it. Query text and binds are trimmed for
/// reporting only; trimming never changes the kind.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryError {
    kind: QueryErrorKind,
    connection_name: String,
    host: String,
    message: String,
    query: String,
    binds: Vec<(String, DatabaseValue)>,
    attributes: BTreeMap<String, String>,
}

impl QueryError {
    /// Create a report without statement context
    ///
    /// Driver messages may quote the whole statement, so the message is cut with the same
    /// [`QUERY_TEXT_MAX_BYTES`] rule as the query text.
    pub fn new(
        kind: QueryErrorKind,
        host: impl Into<String>,
        connection_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            connection_name: connection_name.into(),
            host: host.into(),
            message: truncate_text(&message.into(), "message"),
            query: String::new(),
            binds: Vec::new(),
            attributes: BTreeMap::new(),
        }
    }

    /// Attach the failed statement and its binds
    ///
    /// INSERT and REPLACE statements can be huge, so their bind snapshot is cut to
    /// [`INSERT_REPLACE_BINDS_MAX_COUNT`] entries.
    #[must_use]
    pub fn with_query<I, K>(mut self, query: &str, binds: I) -> Self
    where
        I: IntoIterator<Item = (K, DatabaseValue)>,
        K: Into<String>,
    {
        let mut binds: Vec<(String, DatabaseValue)> =
            binds.into_iter().map(|(k, v)| (k.into(), v)).collect();

        if QueryType::of(query).is_batch_write() {
            binds.truncate(INSERT_REPLACE_BINDS_MAX_COUNT);
        }

        self.query = truncate_text(query, "query");
        self.binds = binds;
        self
    }

    /// Attach the connection attributes in effect when the failure happened
    #[must_use]
    pub fn with_attributes(mut self, attributes: BTreeMap<String, String>) -> Self {
        self.attributes = attributes;
        self
    }

    /// Failure category
    pub fn kind(&self) -> QueryErrorKind {
        self.kind
    }

    /// Configuration name of the connection
    pub fn connection_name(&self) -> &str {
        &self.connection_name
    }

    /// Host the connection was talking to
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Driver or layer message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Failed statement (empty for connection and transaction failures)
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Binds of the failed statement
    pub fn binds(&self) -> &[(String, DatabaseValue)] {
        &self.binds
    }

    /// Connection attributes
    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Host: '{}'; Connection name: '{}'; Error: {}",
            self.host, self.connection_name, self.message
        )
    }
}

impl std::error::Error for QueryError {}

/// Cut text to [`QUERY_TEXT_MAX_BYTES`] on a char boundary, noting the real length
fn truncate_text(text: &str, label: &str) -> String {
    if text.len() <= QUERY_TEXT_MAX_BYTES {
        return text.to_string();
    }

    let mut end = QUERY_TEXT_MAX_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }

    format!("{}... ({} length {} bytes)", &text[..end], label, text.len())
}

//! Helpers shared by the unit tests

use super::config::JsonConfig;
use super::registry::ConnectionRegistry;
use serde_json::json;

/// Configuration with one SQLite connection `local` on a private in-memory database
pub(crate) fn sqlite_config(schema: &str) -> JsonConfig {
    JsonConfig::new(json!({
        "local": {
            "driver": "sqlite",
            "hostname": ":memory:",
            "username": "app",
            "password": "secret",
            "schema": schema,
        }
    }))
}

/// Registry over [`sqlite_config`]; use a schema name unique to the test
pub(crate) fn sqlite_registry(schema: &str) -> ConnectionRegistry {
    ConnectionRegistry::new(sqlite_config(schema))
}

//! Connection configuration
//!
//! Configuration is read through [`ConfigSource`], which resolves dot-separated paths such as
//! `main.hostname` into JSON values. [`ConnectionSettings::resolve`] turns the entries of one
//! connection name into validated, typed settings.
//!
//! Recognized keys under `{name}`:
//!
//! | Key | Required | Default |
//! |---|---|---|
//! | `hostname`, `username`, `password`, `schema` | yes | |
//! | `port` | no | 3306 |
//! | `max_query_length` (MB) | no | 5 |
//! | `driver` (`mysql`, `sqlite`) | no | `mysql` |
//! | `timeout` (seconds) | no | 30 |
//! | `attributes` (mapping) | no | `errmode=exception`, `fetch_mode=assoc`, `persistent=false` |
//! | `fallback` (host or mapping) | no | |

use super::database_types::DatabaseType;
use super::error::{DatabaseError, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

/// Default server port
pub const DEFAULT_PORT: u16 = 3306;

/// Default statement size limit in megabytes
pub const DEFAULT_MAX_QUERY_LENGTH_MB: u64 = 5;

/// Default per-operation timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Attribute controlling buffered result retrieval
pub const ATTR_BUFFERED_QUERY: &str = "buffered_query";

/// Attribute controlling error reporting; always `exception`
pub const ATTR_ERRMODE: &str = "errmode";

const REQUIRED_KEYS: [&str; 4] = ["hostname", "username", "password", "schema"];

/// Resolves `{connection_name}.{property}` paths into configuration values
pub trait ConfigSource: Send + Sync {
    /// Value at a dot-separated path, `None` if absent
    fn get(&self, path: &str) -> Option<Value>;
}

/// Walk a JSON tree along a dot-separated path
fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(root, |node, segment| node.as_object()?.get(segment))
}

impl ConfigSource for Value {
    fn get(&self, path: &str) -> Option<Value> {
        lookup(self, path).cloned()
    }
}

/// Configuration held in a JSON document
///
/// # Example
///
/// ```
/// use sql_gateway::core::config::{ConfigSource, JsonConfig};
///
/// let config: JsonConfig = r#"{"main": {"hostname": "db1", "port": 3307}}"#.parse().unwrap();
/// assert_eq!(config.get("main.port"), Some(serde_json::json!(3307)));
/// ```
#[derive(Debug, Clone, Default)]
pub struct JsonConfig {
    root: Value,
}

impl JsonConfig {
    /// Wrap a JSON tree
    pub fn new(root: Value) -> Self {
        Self { root }
    }
}

impl FromStr for JsonConfig {
    type Err = DatabaseError;

    fn from_str(text: &str) -> Result<Self> {
        let root = serde_json::from_str(text)
            .map_err(|e| DatabaseError::config(format!("Invalid JSON configuration: {}", e)))?;
        Ok(Self::new(root))
    }
}

impl ConfigSource for JsonConfig {
    fn get(&self, path: &str) -> Option<Value> {
        lookup(&self.root, path).cloned()
    }
}

/// Alternate connection target used once when the primary host cannot be opened
#[derive(Debug, Clone, PartialEq)]
pub enum Fallback {
    /// Another host; every other parameter comes from the primary
    Host(String),
    /// Overridden parameters; unset fields come from the primary, the schema always does
    Settings {
        hostname: String,
        username: Option<String>,
        password: Option<String>,
        port: Option<u16>,
        max_query_length: Option<usize>,
    },
}

/// Validated parameters of one connection
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSettings {
    /// Configuration name
    pub name: String,
    /// Backend to open
    pub database_type: DatabaseType,
    /// Host name (a directory or `:memory:` for SQLite)
    pub hostname: String,
    pub username: String,
    pub password: String,
    /// Database / schema name
    pub schema: String,
    pub port: u16,
    /// Statement size limit in bytes
    pub max_query_length: usize,
    /// Per-operation timeout
    pub timeout: Duration,
    /// Driver attributes rendered as strings, frozen once the connection is open
    pub attributes: BTreeMap<String, String>,
    /// Alternate target
    pub fallback: Option<Fallback>,
}

impl ConnectionSettings {
    /// Resolve the settings of connection `name`
    ///
    /// # Errors
    ///
    /// Returns a configuration error if:
    /// - `name` is empty
    /// - a required key is missing or empty
    /// - a value has the wrong type, or `max_query_length` is below 1
    /// - the attributes disable buffered queries
    /// - the fallback is neither a host name nor a mapping with a `hostname`
    pub fn resolve(source: &dyn ConfigSource, name: &str, unbuffered: bool) -> Result<Self> {
        if name.is_empty() {
            return Err(DatabaseError::config("Connection name must not be empty"));
        }

        let mut required = BTreeMap::new();
        for key in REQUIRED_KEYS {
            match string_at(source, &format!("{}.{}", name, key))? {
                Some(value) if !value.is_empty() => {
                    required.insert(key, value);
                }
                _ => {
                    return Err(DatabaseError::config(format!(
                        "Required connection parameter \"{}\" is not set or empty for database configuration: {}",
                        key, name
                    )))
                }
            }
        }

        let database_type = match string_at(source, &format!("{}.driver", name))? {
            Some(driver) => driver.parse().map_err(DatabaseError::Config)?,
            None => DatabaseType::default(),
        };

        let port = match integer_at(source, &format!("{}.port", name))? {
            Some(port) => to_port(port, name)?,
            None => DEFAULT_PORT,
        };

        let max_query_length = to_max_query_length(
            integer_at(source, &format!("{}.max_query_length", name))?
                .unwrap_or(DEFAULT_MAX_QUERY_LENGTH_MB as i64),
            name,
        )?;

        let timeout = match integer_at(source, &format!("{}.timeout", name))? {
            Some(secs) if secs > 0 => Duration::from_secs(secs as u64),
            Some(_) => {
                return Err(DatabaseError::config(format!(
                    "Parameter \"timeout\" must be a positive number of seconds for database connection: {}",
                    name
                )))
            }
            None => DEFAULT_TIMEOUT,
        };

        let attributes = resolve_attributes(source, name, unbuffered)?;
        let fallback = resolve_fallback(source, name)?;

        let mut take = |key: &str| required.remove(key).unwrap_or_default();

        Ok(Self {
            name: name.to_string(),
            database_type,
            hostname: take("hostname"),
            username: take("username"),
            password: take("password"),
            schema: take("schema"),
            port,
            max_query_length,
            timeout,
            attributes,
            fallback,
        })
    }

    /// Settings for the fallback attempt, if a fallback is configured
    ///
    /// Fields the fallback does not override keep the primary values; the schema is always
    /// the primary one.
    pub fn fallback_settings(&self) -> Option<ConnectionSettings> {
        let fallback = self.fallback.as_ref()?;
        let mut settings = self.clone();
        settings.fallback = None;

        match fallback {
            Fallback::Host(host) => settings.hostname = host.clone(),
            Fallback::Settings {
                hostname,
                username,
                password,
                port,
                max_query_length,
            } => {
                settings.hostname = hostname.clone();
                if let Some(username) = username {
                    settings.username = username.clone();
                }
                if let Some(password) = password {
                    settings.password = password.clone();
                }
                if let Some(port) = port {
                    settings.port = *port;
                }
                if let Some(max_query_length) = max_query_length {
                    settings.max_query_length = *max_query_length;
                }
            }
        }

        Some(settings)
    }

    /// Whether the connection was opened by the unbuffered factory flag
    pub fn is_unbuffered(&self) -> bool {
        self.attribute(ATTR_BUFFERED_QUERY) == Some("false")
    }

    /// Value of a driver attribute
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

fn resolve_attributes(
    source: &dyn ConfigSource,
    name: &str,
    unbuffered: bool,
) -> Result<BTreeMap<String, String>> {
    let mut attributes: BTreeMap<String, String> = [
        (ATTR_ERRMODE, "exception"),
        ("fetch_mode", "assoc"),
        ("persistent", "false"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    match source.get(&format!("{}.attributes", name)) {
        None | Some(Value::Null) => {}
        Some(Value::Object(configured)) => {
            for (key, value) in configured {
                let rendered = scalar_to_string(&value).ok_or_else(|| {
                    DatabaseError::config(format!(
                        "Attribute \"{}\" of database connection \"{}\" must be a scalar",
                        key, name
                    ))
                })?;
                attributes.insert(key.to_lowercase(), rendered);
            }
        }
        Some(_) => {
            return Err(DatabaseError::config(format!(
                "Attributes of database connection \"{}\" must be a mapping",
                name
            )))
        }
    }

    attributes.insert(ATTR_ERRMODE.to_string(), "exception".to_string());

    if attributes
        .get(ATTR_BUFFERED_QUERY)
        .is_some_and(|v| is_false(v))
    {
        return Err(DatabaseError::config(format!(
            "Setting \"{}\" in configuration is forbidden (connection \"{}\"); use unbuffered selects instead",
            ATTR_BUFFERED_QUERY, name
        )));
    }

    if unbuffered {
        attributes.insert(ATTR_BUFFERED_QUERY.to_string(), "false".to_string());
    }

    Ok(attributes)
}

fn resolve_fallback(source: &dyn ConfigSource, name: &str) -> Result<Option<Fallback>> {
    let invalid = || {
        DatabaseError::config(format!(
            "Fallback property for database connection \"{}\" is invalid, it must be a hostname or a mapping of connection settings",
            name
        ))
    };

    match source.get(&format!("{}.fallback", name)) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(host)) if host.is_empty() => Ok(None),
        Some(Value::String(host)) => Ok(Some(Fallback::Host(host))),
        Some(Value::Object(_)) => {
            let path = |key: &str| format!("{}.fallback.{}", name, key);

            let hostname = string_at(source, &path("hostname"))?
                .filter(|h| !h.is_empty())
                .ok_or_else(invalid)?;
            let port = integer_at(source, &path("port"))?
                .map(|p| to_port(p, name))
                .transpose()?;
            let max_query_length = integer_at(source, &path("max_query_length"))?
                .map(|mb| to_max_query_length(mb, name))
                .transpose()?;

            Ok(Some(Fallback::Settings {
                hostname,
                username: string_at(source, &path("username"))?,
                password: string_at(source, &path("password"))?,
                port,
                max_query_length,
            }))
        }
        Some(_) => Err(invalid()),
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn is_false(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "false" | "0" | "off" | "no" | "")
}

fn string_at(source: &dyn ConfigSource, path: &str) -> Result<Option<String>> {
    match source.get(path) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => scalar_to_string(&value)
            .map(Some)
            .ok_or_else(|| DatabaseError::config(format!("\"{}\" must be a string", path))),
    }
}

fn integer_at(source: &dyn ConfigSource, path: &str) -> Result<Option<i64>> {
    let not_integer = || DatabaseError::config(format!("\"{}\" must be an integer", path));

    match source.get(path) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_i64().map(Some).ok_or_else(not_integer),
        Some(Value::String(s)) => s.trim().parse().map(Some).map_err(|_| not_integer()),
        Some(_) => Err(not_integer()),
    }
}

fn to_port(port: i64, name: &str) -> Result<u16> {
    u16::try_from(port).map_err(|_| {
        DatabaseError::config(format!(
            "Parameter \"port\" is out of range for database connection: {}",
            name
        ))
    })
}

fn to_max_query_length(megabytes: i64, name: &str) -> Result<usize> {
    if megabytes < 1 {
        return Err(DatabaseError::config(format!(
            "Parameter \"max_query_length\" must be a positive integer for database connection: {}",
            name
        )));
    }
    usize::try_from(megabytes)
        .ok()
        .and_then(|mb| mb.checked_mul(1024 * 1024))
        .ok_or_else(|| {
            DatabaseError::config(format!(
                "Parameter \"max_query_length\" is too large for database connection: {}",
                name
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base() -> Value {
        json!({
            "main": {
                "hostname": "db1.internal",
                "username": "app",
                "password": "secret",
                "schema": "shop"
            }
        })
    }

    #[test]
    fn test_defaults() -> Result<()> {
        let settings = ConnectionSettings::resolve(&base(), "main", false)?;

        assert_eq!(settings.database_type, DatabaseType::Mysql);
        assert_eq!(settings.port, DEFAULT_PORT);
        assert_eq!(settings.max_query_length, 5 * 1024 * 1024);
        assert_eq!(settings.timeout, DEFAULT_TIMEOUT);
        assert_eq!(settings.attribute("errmode"), Some("exception"));
        assert_eq!(settings.attribute("fetch_mode"), Some("assoc"));
        assert_eq!(settings.attribute("persistent"), Some("false"));
        assert!(!settings.is_unbuffered());
        assert!(settings.fallback_settings().is_none());
        Ok(())
    }

    #[test]
    fn test_missing_required_key() {
        let mut config = base();
        config["main"]["schema"] = json!("");

        let err = ConnectionSettings::resolve(&config, "main", false).unwrap_err();
        assert!(matches!(err, DatabaseError::Config(ref msg) if msg.contains("\"schema\"")));

        let err = ConnectionSettings::resolve(&config, "", false).unwrap_err();
        assert!(matches!(err, DatabaseError::Config(_)));

        let err = ConnectionSettings::resolve(&config, "missing", false).unwrap_err();
        assert!(matches!(err, DatabaseError::Config(_)));
    }

    #[test]
    fn test_attributes_are_merged_and_errmode_forced() -> Result<()> {
        let mut config = base();
        config["main"]["attributes"] = json!({
            "errmode": "silent",
            "persistent": true,
            "init_command": "SET NAMES utf8mb4"
        });

        let settings = ConnectionSettings::resolve(&config, "main", true)?;
        assert_eq!(settings.attribute("errmode"), Some("exception"));
        assert_eq!(settings.attribute("persistent"), Some("true"));
        assert_eq!(settings.attribute("init_command"), Some("SET NAMES utf8mb4"));
        assert!(settings.is_unbuffered());
        Ok(())
    }

    #[test]
    fn test_configuring_unbuffered_is_forbidden() {
        let mut config = base();
        config["main"]["attributes"] = json!({ "buffered_query": false });

        let err = ConnectionSettings::resolve(&config, "main", false).unwrap_err();
        assert!(matches!(err, DatabaseError::Config(_)));
    }

    #[test]
    fn test_max_query_length_must_be_positive() {
        let mut config = base();
        config["main"]["max_query_length"] = json!(0);

        let err = ConnectionSettings::resolve(&config, "main", false).unwrap_err();
        assert!(matches!(err, DatabaseError::Config(_)));
    }

    #[test]
    fn test_fallback_host() -> Result<()> {
        let mut config = base();
        config["main"]["fallback"] = json!("db2.internal");

        let settings = ConnectionSettings::resolve(&config, "main", false)?;
        let fallback = settings.fallback_settings().expect("fallback configured");
        assert_eq!(fallback.hostname, "db2.internal");
        assert_eq!(fallback.username, "app");
        assert_eq!(fallback.schema, "shop");
        Ok(())
    }

    #[test]
    fn test_fallback_mapping_keeps_primary_schema() -> Result<()> {
        let mut config = base();
        config["main"]["fallback"] = json!({
            "hostname": "db3.internal",
            "password": "other",
            "port": "3310",
            "schema": "ignored"
        });

        let settings = ConnectionSettings::resolve(&config, "main", false)?;
        let fallback = settings.fallback_settings().expect("fallback configured");
        assert_eq!(fallback.hostname, "db3.internal");
        assert_eq!(fallback.username, "app");
        assert_eq!(fallback.password, "other");
        assert_eq!(fallback.port, 3310);
        assert_eq!(fallback.schema, "shop");
        assert_eq!(fallback.max_query_length, settings.max_query_length);
        Ok(())
    }

    #[test]
    fn test_invalid_fallback() {
        let mut config = base();
        config["main"]["fallback"] = json!(["db2", "db3"]);
        assert!(matches!(
            ConnectionSettings::resolve(&config, "main", false),
            Err(DatabaseError::Config(_))
        ));

        config["main"]["fallback"] = json!({ "username": "other" });
        assert!(matches!(
            ConnectionSettings::resolve(&config, "main", false),
            Err(DatabaseError::Config(_))
        ));
    }

    #[test]
    fn test_json_config_source() -> Result<()> {
        let config: JsonConfig = r#"{"main": {"hostname": "h", "port": 1}}"#.parse()?;
        assert_eq!(config.get("main.hostname"), Some(json!("h")));
        assert_eq!(config.get("main.nope"), None);
        assert_eq!(config.get("main.hostname.deeper"), None);

        assert!("{not json".parse::<JsonConfig>().is_err());
        Ok(())
    }
}

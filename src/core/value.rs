//! Database value types
//!
//! This module defines the types that can be bound to statements and retrieved from result sets.

use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// `chrono` format of a date value (`YYYY-MM-DD`)
pub const FORMAT_DATE: &str = "%Y-%m-%d";

/// `chrono` format of a time value (`HH:MM:SS`)
pub const FORMAT_TIME: &str = "%H:%M:%S";

/// `chrono` format of a date/time value (`YYYY-MM-DD HH:MM:SS`)
pub const FORMAT_DATETIME: &str = "%Y-%m-%d %H:%M:%S";

/// Database value that can hold different types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DatabaseValue {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// 32-bit integer
    Int(i32),
    /// 64-bit integer
    Long(i64),
    /// 32-bit floating point
    Float(f32),
    /// 64-bit floating point
    Double(f64),
    /// String value
    String(String),
    /// Binary data
    Bytes(Vec<u8>),
    /// Date and time without zone; sent to the driver as `YYYY-MM-DD HH:MM:SS`
    DateTime(NaiveDateTime),
}

impl DatabaseValue {
    /// Get the value as a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DatabaseValue::Bool(v) => Some(*v),
            DatabaseValue::Int(v) => Some(*v != 0),
            DatabaseValue::Long(v) => Some(*v != 0),
            DatabaseValue::String(s) => match s.to_lowercase().as_str() {
                "true" | "1" | "yes" => Some(true),
                "false" | "0" | "no" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Get the value as an i32
    pub fn as_int(&self) -> Option<i32> {
        match self {
            DatabaseValue::Int(v) => Some(*v),
            DatabaseValue::Long(v) => i32::try_from(*v).ok(),
            DatabaseValue::String(s) => s.parse().ok(),
            DatabaseValue::Bool(v) => Some(*v as i32),
            _ => None,
        }
    }

    /// Get the value as an i64
    pub fn as_long(&self) -> Option<i64> {
        match self {
            DatabaseValue::Long(v) => Some(*v),
            DatabaseValue::Int(v) => Some(*v as i64),
            DatabaseValue::String(s) => s.parse().ok(),
            DatabaseValue::Bool(v) => Some(*v as i64),
            _ => None,
        }
    }

    /// Get the value as an f64
    pub fn as_double(&self) -> Option<f64> {
        match self {
            DatabaseValue::Double(v) => Some(*v),
            DatabaseValue::Float(v) => Some(*v as f64),
            DatabaseValue::Int(v) => Some(*v as f64),
            DatabaseValue::Long(v) => Some(*v as f64),
            DatabaseValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Get the value as a string (zero-copy for String values)
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DatabaseValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Get the value as a date/time, parsing `YYYY-MM-DD HH:MM:SS` strings
    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            DatabaseValue::DateTime(v) => Some(*v),
            DatabaseValue::String(s) => NaiveDateTime::parse_from_str(s, FORMAT_DATETIME).ok(),
            _ => None,
        }
    }

    /// Get the value as a string (with conversion)
    ///
    /// `Null` renders as an empty string, so it can serve as a map key.
    pub fn as_string(&self) -> String {
        match self {
            DatabaseValue::Null => String::new(),
            DatabaseValue::Bool(v) => if *v { "1" } else { "0" }.to_string(),
            DatabaseValue::Int(v) => v.to_string(),
            DatabaseValue::Long(v) => v.to_string(),
            DatabaseValue::Float(v) => v.to_string(),
            DatabaseValue::Double(v) => v.to_string(),
            DatabaseValue::String(s) => s.clone(),
            DatabaseValue::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            DatabaseValue::DateTime(v) => v.format(FORMAT_DATETIME).to_string(),
        }
    }

    /// Get the value as bytes (zero-copy)
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            DatabaseValue::Bytes(b) => Some(b),
            DatabaseValue::String(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Byte length of the value rendered as SQL text
    pub fn text_len(&self) -> usize {
        match self {
            DatabaseValue::Null => 0,
            DatabaseValue::Bool(_) => 1,
            DatabaseValue::String(s) => s.len(),
            DatabaseValue::Bytes(b) => b.len(),
            DatabaseValue::DateTime(_) => 19,
            other => other.as_string().len(),
        }
    }

    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    /// Get the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            DatabaseValue::Null => "null",
            DatabaseValue::Bool(_) => "bool",
            DatabaseValue::Int(_) => "int",
            DatabaseValue::Long(_) => "long",
            DatabaseValue::Float(_) => "float",
            DatabaseValue::Double(_) => "double",
            DatabaseValue::String(_) => "string",
            DatabaseValue::Bytes(_) => "bytes",
            DatabaseValue::DateTime(_) => "datetime",
        }
    }

    /// Form handed to drivers: date/times become `YYYY-MM-DD HH:MM:SS` strings
    pub(crate) fn into_driver_value(self) -> DatabaseValue {
        match self {
            DatabaseValue::DateTime(v) => {
                DatabaseValue::String(v.format(FORMAT_DATETIME).to_string())
            }
            other => other,
        }
    }
}

impl From<bool> for DatabaseValue {
    fn from(v: bool) -> Self {
        DatabaseValue::Bool(v)
    }
}

impl From<i32> for DatabaseValue {
    fn from(v: i32) -> Self {
        DatabaseValue::Int(v)
    }
}

impl From<i64> for DatabaseValue {
    fn from(v: i64) -> Self {
        DatabaseValue::Long(v)
    }
}

impl From<u32> for DatabaseValue {
    fn from(v: u32) -> Self {
        DatabaseValue::Long(v as i64)
    }
}

impl From<f32> for DatabaseValue {
    fn from(v: f32) -> Self {
        DatabaseValue::Float(v)
    }
}

impl From<f64> for DatabaseValue {
    fn from(v: f64) -> Self {
        DatabaseValue::Double(v)
    }
}

impl From<String> for DatabaseValue {
    fn from(v: String) -> Self {
        DatabaseValue::String(v)
    }
}

impl From<&str> for DatabaseValue {
    fn from(v: &str) -> Self {
        DatabaseValue::String(v.to_string())
    }
}

impl From<Vec<u8>> for DatabaseValue {
    fn from(v: Vec<u8>) -> Self {
        DatabaseValue::Bytes(v)
    }
}

impl From<NaiveDateTime> for DatabaseValue {
    fn from(v: NaiveDateTime) -> Self {
        DatabaseValue::DateTime(v)
    }
}

impl<T: Into<DatabaseValue>> From<Option<T>> for DatabaseValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => DatabaseValue::Null,
        }
    }
}

/// A row of database results (column name -> value mapping, in select-list order)
pub type DatabaseRow = IndexMap<String, DatabaseValue>;

/// Multiple rows returned from a query
pub type DatabaseResult = Vec<DatabaseRow>;

/// Named statement parameters (`:name` -> value), in bind order
pub type Binds = IndexMap<String, DatabaseValue>;

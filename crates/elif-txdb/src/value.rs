//! Parameter and column values
//!
//! [`DatabaseValue`] is the value type exchanged with backends, both for bound
//! parameters and for buffered result columns. [`NamedValue`] carries a
//! parameter together with its ordinal position and optional name.

use serde_json::Value as JsonValue;

/// Database value enumeration for type-safe parameter binding
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Uuid(uuid::Uuid),
    DateTime(chrono::DateTime<chrono::Utc>),
    Date(chrono::NaiveDate),
    Time(chrono::NaiveTime),
    Json(JsonValue),
    /// Output parameter marker for stored procedure calls
    Out(OutParam),
}

/// Output parameter marker, passed through to the backend unconverted
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OutParam {
    /// Input half of an INOUT parameter
    pub input: Option<Box<DatabaseValue>>,
    /// Whether the parameter is INOUT rather than OUT only
    pub in_out: bool,
}

impl DatabaseValue {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    /// Check if the value is an output parameter marker
    pub fn is_out(&self) -> bool {
        matches!(self, DatabaseValue::Out(_))
    }

    /// Integer view of the value, widening 32-bit integers
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DatabaseValue::Int32(i) => Some(*i as i64),
            DatabaseValue::Int64(i) => Some(*i),
            _ => None,
        }
    }

    /// Float view of the value, widening 32-bit floats
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DatabaseValue::Float32(f) => Some(*f as f64),
            DatabaseValue::Float64(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DatabaseValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DatabaseValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Apply the default parameter conversion.
    ///
    /// Integers and floats are widened to their 64-bit forms; every other value,
    /// including output markers, is returned unchanged.
    pub fn default_converted(self) -> Self {
        match self {
            DatabaseValue::Int32(i) => DatabaseValue::Int64(i as i64),
            DatabaseValue::Float32(f) => DatabaseValue::Float64(f as f64),
            other => other,
        }
    }
}

impl From<bool> for DatabaseValue {
    fn from(value: bool) -> Self {
        DatabaseValue::Bool(value)
    }
}

impl From<i32> for DatabaseValue {
    fn from(value: i32) -> Self {
        DatabaseValue::Int32(value)
    }
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<f32> for DatabaseValue {
    fn from(value: f32) -> Self {
        DatabaseValue::Float32(value)
    }
}

impl From<f64> for DatabaseValue {
    fn from(value: f64) -> Self {
        DatabaseValue::Float64(value)
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl From<Vec<u8>> for DatabaseValue {
    fn from(value: Vec<u8>) -> Self {
        DatabaseValue::Bytes(value)
    }
}

impl From<uuid::Uuid> for DatabaseValue {
    fn from(value: uuid::Uuid) -> Self {
        DatabaseValue::Uuid(value)
    }
}

impl From<chrono::DateTime<chrono::Utc>> for DatabaseValue {
    fn from(value: chrono::DateTime<chrono::Utc>) -> Self {
        DatabaseValue::DateTime(value)
    }
}

impl From<chrono::NaiveDate> for DatabaseValue {
    fn from(value: chrono::NaiveDate) -> Self {
        DatabaseValue::Date(value)
    }
}

impl From<chrono::NaiveTime> for DatabaseValue {
    fn from(value: chrono::NaiveTime) -> Self {
        DatabaseValue::Time(value)
    }
}

impl From<JsonValue> for DatabaseValue {
    fn from(value: JsonValue) -> Self {
        DatabaseValue::Json(value)
    }
}

impl From<OutParam> for DatabaseValue {
    fn from(value: OutParam) -> Self {
        DatabaseValue::Out(value)
    }
}

impl<T> From<Option<T>> for DatabaseValue
where
    T: Into<DatabaseValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => DatabaseValue::Null,
        }
    }
}

/// A bound parameter: ordinal position (starting at 1), optional name and value
#[derive(Debug, Clone, PartialEq)]
pub struct NamedValue {
    pub name: Option<String>,
    pub ordinal: usize,
    pub value: DatabaseValue,
}

impl NamedValue {
    pub fn positional(ordinal: usize, value: impl Into<DatabaseValue>) -> Self {
        Self {
            name: None,
            ordinal,
            value: value.into(),
        }
    }

    pub fn named(ordinal: usize, name: impl Into<String>, value: impl Into<DatabaseValue>) -> Self {
        Self {
            name: Some(name.into()),
            ordinal,
            value: value.into(),
        }
    }

    /// Whether the parameter is bound by name; an empty name counts as positional
    pub fn is_named(&self) -> bool {
        self.name.as_deref().map_or(false, |n| !n.is_empty())
    }
}

/// Build positional parameters numbered from 1
pub fn positional<I, V>(values: I) -> Vec<NamedValue>
where
    I: IntoIterator<Item = V>,
    V: Into<DatabaseValue>,
{
    values
        .into_iter()
        .enumerate()
        .map(|(i, v)| NamedValue::positional(i + 1, v))
        .collect()
}

/// Outcome of checking a parameter before it is sent to the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueCheck {
    /// The value is passed through as is
    Accepted,
    /// The value is left to the default conversion
    Skip,
}

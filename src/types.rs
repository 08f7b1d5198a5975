use std::{cmp::Ordering, collections::BTreeMap, fmt::Display};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A field value inside a record
///
/// Stored through [`StoredValue`], so encoded keys sort null, booleans,
/// numbers, then strings, with integers and floats interleaved numerically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "StoredValue", try_from = "StoredValue")]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl Value {
    /// Name of the value's type, for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean(_) => "boolean",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::String(_) => "string",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Compares by natural ordering, failing on values of incompatible types
    pub fn compare(&self, other: &Value) -> Result<Ordering> {
        self.partial_cmp(other).ok_or_else(|| {
            Error::ConstraintViolation(format!(
                "cannot compare {} {} with {} {}",
                self.type_name(),
                self,
                other.type_name(),
                other
            ))
        })
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{:?}", v),
        }
    }
}

/// Natural ordering: numbers compare numerically across integer and float,
/// strings lexicographically. Mixed types are incomparable.
impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Boolean(a), Value::Boolean(b)) => a.partial_cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.partial_cmp(b),
            (Value::Integer(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Integer(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) => a.partial_cmp(b),
            (_, _) => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

/// A record maps field names to values
pub type Record = BTreeMap<String, Value>;

/// Serialized form of a [`Value`]
///
/// A number is written as the nearest float, the integer's distance from that
/// float, then its kind. Numerically equal integers and floats share
/// everything but the kind byte.
#[derive(Serialize, Deserialize)]
pub enum StoredValue {
    Null,
    Boolean(bool),
    Number(f64, i64, NumberKind),
    String(String),
}

#[derive(Serialize, Deserialize)]
pub enum NumberKind {
    Integer,
    Float,
}

impl From<Value> for StoredValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Boolean(b) => Self::Boolean(b),
            Value::Integer(i) => {
                let nearest = i as f64;
                let offset = (i as i128 - nearest as i128) as i64;
                Self::Number(nearest, offset, NumberKind::Integer)
            }
            // -0.0 is stored as 0.0 so that it sorts with 0
            Value::Float(f) if f == 0.0 => Self::Number(0.0, 0, NumberKind::Float),
            Value::Float(f) => Self::Number(f, 0, NumberKind::Float),
            Value::String(s) => Self::String(s),
        }
    }
}

impl TryFrom<StoredValue> for Value {
    type Error = Error;

    fn try_from(value: StoredValue) -> Result<Self> {
        Ok(match value {
            StoredValue::Null => Self::Null,
            StoredValue::Boolean(b) => Self::Boolean(b),
            StoredValue::Number(nearest, offset, NumberKind::Integer) => {
                let i = nearest as i128 + offset as i128;
                Self::Integer(i64::try_from(i).map_err(|_| {
                    Error::Internal(format!("stored integer {} out of range", i))
                })?)
            }
            StoredValue::Number(f, _, NumberKind::Float) => Self::Float(f),
            StoredValue::String(s) => Self::String(s),
        })
    }
}

/// Builds a [`Record`] from `field => value` pairs
#[macro_export]
macro_rules! record {
    ($($field:expr => $value:expr),* $(,)?) => {{
        let mut record = $crate::types::Record::new();
        $(record.insert($field.to_string(), $crate::types::Value::from($value));)*
        record
    }};
}

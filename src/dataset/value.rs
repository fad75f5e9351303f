//! Cell values and column types

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

/// Declared type of a dataset column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    Boolean,
    Integer,
    Float,
    Text,
    Date,
    Timestamp,
    /// Sequence of values, as found in raw JSON sources
    List,
    /// Nested object with ordered fields, as found in raw JSON sources
    Record,
}

impl ScalarType {
    /// Whether values of this type can be written to a warehouse column
    pub fn is_loadable(&self) -> bool {
        !matches!(self, ScalarType::List | ScalarType::Record)
    }

    /// Common type of two column types, if one exists without going through text
    pub fn unify(self, other: ScalarType) -> Option<ScalarType> {
        match (self, other) {
            (a, b) if a == b => Some(a),
            (ScalarType::Integer, ScalarType::Float) | (ScalarType::Float, ScalarType::Integer) => {
                Some(ScalarType::Float)
            }
            (ScalarType::Date, ScalarType::Timestamp) | (ScalarType::Timestamp, ScalarType::Date) => {
                Some(ScalarType::Timestamp)
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for ScalarType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ScalarType::Boolean => "boolean",
            ScalarType::Integer => "integer",
            ScalarType::Float => "float",
            ScalarType::Text => "text",
            ScalarType::Date => "date",
            ScalarType::Timestamp => "timestamp",
            ScalarType::List => "list",
            ScalarType::Record => "record",
        };
        write!(f, "{}", name)
    }
}

/// A single cell
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    List(Vec<Value>),
    Record(Vec<(String, Value)>),
}

impl Value {
    /// Type of this value, `None` for null
    pub fn scalar_type(&self) -> Option<ScalarType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(ScalarType::Boolean),
            Value::Integer(_) => Some(ScalarType::Integer),
            Value::Float(_) => Some(ScalarType::Float),
            Value::Text(_) => Some(ScalarType::Text),
            Value::Date(_) => Some(ScalarType::Date),
            Value::Timestamp(_) => Some(ScalarType::Timestamp),
            Value::List(_) => Some(ScalarType::List),
            Value::Record(_) => Some(ScalarType::Record),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Convert this value so it fits a column of type `target`
    ///
    /// Only widening conversions are performed: integer to float, date to
    /// timestamp, and anything to text.
    pub fn cast_to(self, target: ScalarType) -> Option<Value> {
        match (self, target) {
            (Value::Null, _) => Some(Value::Null),
            (Value::Integer(i), ScalarType::Float) => Some(Value::Float(i as f64)),
            (Value::Date(d), ScalarType::Timestamp) => d.and_hms_opt(0, 0, 0).map(Value::Timestamp),
            (Value::Text(s), ScalarType::Text) => Some(Value::Text(s)),
            (v, ScalarType::Text) => Some(Value::Text(v.to_string())),
            (v, t) if v.scalar_type() == Some(t) => Some(v),
            _ => None,
        }
    }

    /// Convert a parsed JSON value, keeping nested arrays and objects as-is
    pub fn from_json(value: serde_json::Value) -> Value {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Boolean(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::Text(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Record(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Render as a JSON value (for reports and query output)
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(v) if v.is_finite() && v.fract() == 0.0 => write!(f, "{:.1}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => write!(f, "{}", s),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S%.f")),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Value::Record(fields) => {
                let parts: Vec<String> = fields
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v))
                    .collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

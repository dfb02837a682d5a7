use serde::{Deserialize, Serialize};
use std::fmt;

/// A scalar bound into a statement or stored in a primary-key column.
///
/// Absent foreign keys and nullable key columns use [`Value::Null`] instead
/// of a type-specific zero value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::UInt(u) => serde_json::Value::from(*u),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(b) => serde_json::Value::Array(
                b.iter().map(|byte| serde_json::Value::from(*byte)).collect(),
            ),
        }
    }
}

/// SQL-literal rendering, used when fingerprinting bound arguments.
/// Text is single-quoted with embedded quotes doubled so that argument
/// boundaries stay unambiguous.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::UInt(u) => write!(f, "{}", u),
            Value::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Value::Bytes(b) => write!(f, "x'{}'", hex::encode(b)),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt(u64::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
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

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// A primary key; composite keys carry one value per key column, in column order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pk(Vec<Value>);

impl Pk {
    /// Create a key from its column values
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// Create a single-column key
    pub fn single(value: impl Into<Value>) -> Self {
        Self(vec![value.into()])
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_composite(&self) -> bool {
        self.0.len() > 1
    }

    /// Whether any key column is NULL, which means the row cannot be addressed by this key
    pub fn has_null(&self) -> bool {
        self.0.iter().any(Value::is_null)
    }

    /// Render the key as the bean id used by the cache, e.g. `[1]` or `[7,"eu"]`.
    pub fn cache_id(&self) -> String {
        serde_json::Value::Array(self.0.iter().map(Value::to_json).collect()).to_string()
    }

    pub fn into_values(self) -> Vec<Value> {
        self.0
    }
}

impl From<Value> for Pk {
    fn from(v: Value) -> Self {
        Pk(vec![v])
    }
}

impl From<i32> for Pk {
    fn from(v: i32) -> Self {
        Pk::single(v)
    }
}

impl From<i64> for Pk {
    fn from(v: i64) -> Self {
        Pk::single(v)
    }
}

impl From<&str> for Pk {
    fn from(v: &str) -> Self {
        Pk::single(v)
    }
}

impl From<Vec<Value>> for Pk {
    fn from(values: Vec<Value>) -> Self {
        Pk(values)
    }
}

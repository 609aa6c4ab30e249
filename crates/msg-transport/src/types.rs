use crate::{Result, TransportError};
use core::fmt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

/// Where a device listens for commands.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub name: String,
    pub topic: String,
}

impl Address {
    pub fn new(name: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            topic: topic.into(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.topic)
    }
}

/// A flat key/value document as carried on the wire.
///
/// Values are kept as JSON so numbers sent by devices survive untouched; [`Message::get_str`]
/// flattens scalars to their textual form.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message {
    fields: Map<String, Value>,
}

impl Message {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Scalar value of `key` as text. Objects, arrays and null read as absent.
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.fields.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Scalar value of `key` as received. JSON numbers stay distinct from text so
    /// a reading of `100` is not mistaken for the hex register `"100"`.
    pub fn get_raw(&self, key: &str) -> Option<RawValue> {
        match self.fields.get(key)? {
            Value::String(s) => Some(RawValue::Text(s.clone())),
            Value::Number(n) => Some(RawValue::Number(n.to_string())),
            Value::Bool(b) => Some(RawValue::Text(b.to_string())),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn from_slice(payload: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| TransportError::InvalidMessage(e.to_string()))?;
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(TransportError::InvalidMessage(format!(
                "expected a JSON object, got {other}"
            ))),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.fields).map_err(|e| TransportError::InvalidMessage(e.to_string()))
    }
}

/// A scalar field value: device text (hex registers, strings) or a JSON number.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RawValue {
    Text(String),
    Number(String),
}

impl RawValue {
    pub fn as_str(&self) -> &str {
        match self {
            RawValue::Text(s) | RawValue::Number(s) => s,
        }
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Timestamp(pub OffsetDateTime);

impl Timestamp {
    pub fn now() -> Self {
        Self(OffsetDateTime::now_utc())
    }
}

#[derive(Clone, Debug)]
pub struct BusInfo {
    pub name: String,
    pub driver: String,
}

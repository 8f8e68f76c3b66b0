use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use indexmap::IndexMap;
use serde_json::Value;

/// Prefix the widget protocol uses for references to other widgets.
pub const WIDGET_REF_PREFIX: &str = "IPY_MODEL_";

pub type StateMap = IndexMap<String, StateValue>;

/// A trait value as held on the server, before it is encoded for the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum StateValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    /// Decimal text, sent as a float.
    Decimal(String),
    Str(String),
    Bytes(Vec<u8>),
    DateTime(DateTime<FixedOffset>),
    /// Interpreted as local time when encoded.
    NaiveDateTime(NaiveDateTime),
    List(Vec<StateValue>),
    Tuple(Vec<StateValue>),
    Set(Vec<StateValue>),
    Map(StateMap),
    /// Reference to another widget by model id.
    Widget(String),
    /// A value with no wire representation.
    Opaque { type_name: String, repr: String },
}

impl StateValue {
    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        StateValue::Bytes(data.into())
    }

    pub fn map<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, StateValue)>,
        K: Into<String>,
    {
        StateValue::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn type_name(&self) -> &str {
        match self {
            StateValue::Null => "null",
            StateValue::Bool(_) => "bool",
            StateValue::Int(_) | StateValue::UInt(_) => "int",
            StateValue::Float(_) => "float",
            StateValue::Decimal(_) => "decimal",
            StateValue::Str(_) => "str",
            StateValue::Bytes(_) => "bytes",
            StateValue::DateTime(_) => "datetime",
            StateValue::NaiveDateTime(_) => "naive datetime",
            StateValue::List(_) => "list",
            StateValue::Tuple(_) => "tuple",
            StateValue::Set(_) => "set",
            StateValue::Map(_) => "map",
            StateValue::Widget(_) => "widget",
            StateValue::Opaque { type_name, .. } => type_name,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, StateValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            StateValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            StateValue::Int(n) => Some(*n),
            StateValue::UInt(n) => i64::try_from(*n).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StateValue::Float(f) => Some(*f),
            StateValue::Int(n) => Some(*n as f64),
            StateValue::UInt(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&StateMap> {
        match self {
            StateValue::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut StateMap> {
        match self {
            StateValue::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Plain JSON data, no buffers or special leaves.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => StateValue::Null,
            Value::Bool(b) => StateValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    StateValue::Int(i)
                } else if let Some(u) = n.as_u64() {
                    StateValue::UInt(u)
                } else {
                    StateValue::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => StateValue::Str(s.clone()),
            Value::Array(items) => StateValue::List(items.iter().map(StateValue::from_json).collect()),
            Value::Object(map) => StateValue::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), StateValue::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// The shape this value takes after a trip over the wire: collections
    /// become lists, decimals floats, datetimes UTC text, widget refs text.
    pub fn normalized(&self) -> StateValue {
        match self {
            StateValue::UInt(n) => match i64::try_from(*n) {
                Ok(i) => StateValue::Int(i),
                Err(_) => StateValue::UInt(*n),
            },
            StateValue::Decimal(text) => text
                .trim()
                .parse::<f64>()
                .map(StateValue::Float)
                .unwrap_or_else(|_| self.clone()),
            StateValue::DateTime(dt) => StateValue::Str(utc_iso8601(&dt.with_timezone(&Utc))),
            StateValue::List(items) | StateValue::Tuple(items) | StateValue::Set(items) => {
                StateValue::List(items.iter().map(StateValue::normalized).collect())
            }
            StateValue::Map(map) => StateValue::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.normalized()))
                    .collect(),
            ),
            StateValue::Widget(id) => StateValue::Str(format!("{WIDGET_REF_PREFIX}{id}")),
            other => other.clone(),
        }
    }
}

pub(crate) fn utc_iso8601(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true)
}

impl From<bool> for StateValue {
    fn from(value: bool) -> Self {
        StateValue::Bool(value)
    }
}

impl From<i32> for StateValue {
    fn from(value: i32) -> Self {
        StateValue::Int(value.into())
    }
}

impl From<i64> for StateValue {
    fn from(value: i64) -> Self {
        StateValue::Int(value)
    }
}

impl From<u64> for StateValue {
    fn from(value: u64) -> Self {
        StateValue::UInt(value)
    }
}

impl From<f64> for StateValue {
    fn from(value: f64) -> Self {
        StateValue::Float(value)
    }
}

impl From<&str> for StateValue {
    fn from(value: &str) -> Self {
        StateValue::Str(value.to_string())
    }
}

impl From<String> for StateValue {
    fn from(value: String) -> Self {
        StateValue::Str(value)
    }
}

impl From<DateTime<Utc>> for StateValue {
    fn from(value: DateTime<Utc>) -> Self {
        StateValue::DateTime(value.fixed_offset())
    }
}

impl From<DateTime<FixedOffset>> for StateValue {
    fn from(value: DateTime<FixedOffset>) -> Self {
        StateValue::DateTime(value)
    }
}

impl From<NaiveDateTime> for StateValue {
    fn from(value: NaiveDateTime) -> Self {
        StateValue::NaiveDateTime(value)
    }
}

impl From<Vec<StateValue>> for StateValue {
    fn from(value: Vec<StateValue>) -> Self {
        StateValue::List(value)
    }
}

impl From<StateMap> for StateValue {
    fn from(value: StateMap) -> Self {
        StateValue::Map(value)
    }
}

impl<T: Into<StateValue>> From<Option<T>> for StateValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(StateValue::Null)
    }
}

//! Session value model and its byte encoding.
//!
//! A session is a string-keyed map of [`Value`]s. Application types beyond the built-in scalars
//! implement [`SessionType`] and must be registered on the [`Codec`] at startup; encoding or
//! decoding a value of an unregistered kind fails the whole map.
//!
//! The byte format is a versioned JSON envelope. It is an implementation detail and may evolve.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use time::OffsetDateTime;

use crate::error::{Error, Result};

const VERSION: u8 = 1;

pub type SessionMap = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Time(#[serde(with = "timestamp")] OffsetDateTime),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Custom(Custom),
}

/// A value of a registered application type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Custom {
    pub kind: String,
    pub data: serde_json::Value,
}

/// An application type that can be stored in a session once registered with [`Codec::register`].
pub trait SessionType: Serialize + DeserializeOwned {
    const KIND: &'static str;
}

impl Value {
    pub fn custom<T: SessionType>(value: &T) -> Result<Self> {
        let data = serde_json::to_value(value).map_err(|err| Error::Encode(err.to_string()))?;
        Ok(Value::Custom(Custom {
            kind: T::KIND.to_string(),
            data,
        }))
    }

    pub fn to_custom<T: SessionType>(&self) -> Option<T> {
        match self {
            Value::Custom(custom) if custom.kind == T::KIND => {
                serde_json::from_value(custom.data.clone()).ok()
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(n) => Some(*n),
            Value::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<OffsetDateTime> {
        match self {
            Value::Time(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Converts into the plain JSON shape handed to template renderers.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => (*b).into(),
            Value::Int(n) => (*n).into(),
            Value::Float(n) => (*n).into(),
            Value::String(s) => s.clone().into(),
            Value::Time(t) => t
                .format(&time::format_description::well_known::Rfc3339)
                .map(serde_json::Value::String)
                .unwrap_or(serde_json::Value::Null),
            Value::List(items) => items.iter().map(Value::to_json).collect(),
            Value::Map(map) => map
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect::<serde_json::Map<_, _>>()
                .into(),
            Value::Custom(custom) => custom.data.clone(),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value.into())
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<OffsetDateTime> for Value {
    fn from(value: OffsetDateTime) -> Self {
        Value::Time(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

/// Times travel as their local calendar fields plus the offset in seconds, so every
/// representable `OffsetDateTime` survives, including negative years and offsets with a seconds
/// part that RFC 3339 cannot carry.
mod timestamp {
    use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error};
    use time::{Date, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

    type Fields = (i32, u16, u8, u8, u8, u32, i32);

    pub(super) fn serialize<S: Serializer>(
        value: &OffsetDateTime,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let fields: Fields = (
            value.year(),
            value.ordinal(),
            value.hour(),
            value.minute(),
            value.second(),
            value.nanosecond(),
            value.offset().whole_seconds(),
        );
        fields.serialize(serializer)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<OffsetDateTime, D::Error> {
        let (year, ordinal, hour, minute, second, nanosecond, offset) =
            Fields::deserialize(deserializer)?;

        let date = Date::from_ordinal_date(year, ordinal).map_err(Error::custom)?;
        let time_of_day =
            Time::from_hms_nano(hour, minute, second, nanosecond).map_err(Error::custom)?;
        let offset = UtcOffset::from_whole_seconds(offset).map_err(Error::custom)?;
        Ok(PrimitiveDateTime::new(date, time_of_day).assume_offset(offset))
    }
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    v: u8,
    values: &'a SessionMap,
}

#[derive(Deserialize)]
struct Envelope {
    v: u8,
    values: SessionMap,
}

/// Encodes and decodes session maps, rejecting value kinds that were never registered.
#[derive(Debug, Clone, Default)]
pub struct Codec {
    kinds: Arc<BTreeSet<&'static str>>,
}

impl Codec {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn register<T: SessionType>(mut self) -> Self {
        Arc::make_mut(&mut self.kinds).insert(T::KIND);
        self
    }

    pub fn is_registered(&self, kind: &str) -> bool {
        self.kinds.contains(kind)
    }

    pub fn encode(&self, values: &SessionMap) -> Result<Vec<u8>> {
        for value in values.values() {
            self.check(value).map_err(Error::Encode)?;
        }

        let envelope = EnvelopeRef { v: VERSION, values };
        serde_json::to_vec(&envelope).map_err(|err| Error::Encode(err.to_string()))
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<SessionMap> {
        let envelope: Envelope =
            serde_json::from_slice(bytes).map_err(|err| Error::Decode(err.to_string()))?;

        if envelope.v != VERSION {
            return Err(Error::Decode(format!(
                "unsupported session version: {}",
                envelope.v
            )));
        }

        for value in envelope.values.values() {
            self.check(value).map_err(Error::Decode)?;
        }

        Ok(envelope.values)
    }

    fn check(&self, value: &Value) -> std::result::Result<(), String> {
        match value {
            Value::Float(n) if !n.is_finite() => Err(format!("non-finite float: {n}")),
            Value::Custom(custom) if !self.is_registered(&custom.kind) => {
                Err(format!("unregistered session type: {}", custom.kind))
            }
            Value::List(items) => items.iter().try_for_each(|item| self.check(item)),
            Value::Map(map) => map.values().try_for_each(|item| self.check(item)),
            _ => Ok(()),
        }
    }
}

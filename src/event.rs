//! Input side of the automaton: a decoded kernel trace event.
//!
//! The trace reader lives outside this crate. Anything that can hand out a
//! timestamp, a name and named-field lookup implements [`TraceEvent`] and can be
//! fed to [`crate::Automaton::process`]. Field sets vary between tracer
//! versions, so every lookup returns an `Option` and the providers treat a
//! missing or mistyped field as "ignore this event".
//!
//! [`Event`] is an owned implementation with a small builder, used by callers
//! that decode into memory and by the tests.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

/// A single payload or context field value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    UInt(u64),
    Str(String),
    Seq(Vec<FieldValue>),
}

impl FieldValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            FieldValue::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            FieldValue::Int(v) => u64::try_from(*v).ok(),
            FieldValue::UInt(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&[FieldValue]> {
        match self {
            FieldValue::Seq(values) => Some(values),
            _ => None,
        }
    }

    /// Decode an IPv4 address field.
    ///
    /// Depending on the lttng-modules version `v4addr` is either a sequence of
    /// four octets or a single integer in network byte order.
    pub fn as_ipv4(&self) -> Option<Ipv4Addr> {
        match self {
            FieldValue::Seq(octets) => {
                if octets.len() != 4 {
                    return None;
                }
                let mut bytes = [0u8; 4];
                for (slot, value) in bytes.iter_mut().zip(octets) {
                    *slot = u8::try_from(value.as_u64()?).ok()?;
                }
                Some(Ipv4Addr::from(bytes))
            }
            other => other
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .map(Ipv4Addr::from),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Int(v.into())
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::UInt(v)
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        FieldValue::UInt(v.into())
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Str(v)
    }
}

impl From<[u8; 4]> for FieldValue {
    fn from(octets: [u8; 4]) -> Self {
        FieldValue::Seq(octets.iter().map(|b| FieldValue::from(u64::from(*b))).collect())
    }
}

/// A timestamped, named kernel event with schema-agnostic field access.
pub trait TraceEvent {
    /// Timestamp in nanoseconds. Non-decreasing across the stream.
    fn timestamp(&self) -> i64;

    fn name(&self) -> &str;

    /// Look up an event payload field.
    fn field(&self, name: &str) -> Option<&FieldValue>;

    /// Look up a stream/packet context field (`cpu_id`, `pid`, `procname`...).
    fn context_field(&self, _name: &str) -> Option<&FieldValue> {
        None
    }

    /// CPU the event was recorded on, from the payload or the stream context.
    fn cpu_id(&self) -> Option<u32> {
        self.field("cpu_id")
            .or_else(|| self.context_field("cpu_id"))
            .and_then(FieldValue::as_u64)
            .and_then(|v| u32::try_from(v).ok())
    }

    fn get_i64(&self, name: &str) -> Option<i64> {
        self.field(name).and_then(FieldValue::as_i64)
    }

    fn get_u64(&self, name: &str) -> Option<u64> {
        self.field(name).and_then(FieldValue::as_u64)
    }

    fn get_str(&self, name: &str) -> Option<&str> {
        self.field(name).and_then(FieldValue::as_str)
    }
}

impl<T: TraceEvent + ?Sized> TraceEvent for &T {
    fn timestamp(&self) -> i64 {
        (**self).timestamp()
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn field(&self, name: &str) -> Option<&FieldValue> {
        (**self).field(name)
    }

    fn context_field(&self, name: &str) -> Option<&FieldValue> {
        (**self).context_field(name)
    }
}

/// Owned event record.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: i64,
    pub name: String,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
    #[serde(default)]
    pub context: BTreeMap<String, FieldValue>,
}

impl Event {
    pub fn new(timestamp: i64, name: impl Into<String>) -> Self {
        Self {
            timestamp,
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_field(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn with_context(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.context.insert(name.to_string(), value.into());
        self
    }

    /// Set the `cpu_id` stream context.
    pub fn on_cpu(self, cpu: u32) -> Self {
        self.with_context("cpu_id", cpu)
    }
}

impl TraceEvent for Event {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    fn context_field(&self, name: &str) -> Option<&FieldValue> {
        self.context.get(name)
    }
}

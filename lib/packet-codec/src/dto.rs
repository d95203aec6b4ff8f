//! Wire-boundary DTOs for class messages.
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::collections::BTreeMap;

/// A class-parameter value as it travels the wire: typed on the way out as a
/// `Descriptor`, untyped (string or number) on the way back in as a
/// `DecodedMessage`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    String(String),
    Number(f64),
}

impl ParamValue {
    /// Numeric ≡ numeric-string equality: the device mixes both
    /// representations for the same parameter across messages.
    pub fn numeric_eq(&self, other: &ParamValue) -> bool {
        match (self, other) {
            (ParamValue::String(a), ParamValue::String(b)) => a == b,
            (ParamValue::Number(a), ParamValue::Number(b)) => a == b,
            (ParamValue::String(s), ParamValue::Number(n))
            | (ParamValue::Number(n), ParamValue::String(s)) => {
                s.parse::<f64>().map(|parsed| parsed == *n).unwrap_or(false)
            }
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::String(s) => Some(s),
            ParamValue::Number(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Number(n) => Some(*n),
            ParamValue::String(s) => s.parse::<f64>().ok(),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::String(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::String(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Number(value as f64)
    }
}

/// Instruction carried by every class message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    Execute,
    Fetch,
    Report,
    Acknowledge,
}

/// An outbound request, addressed by broadcast-header `(dx, dy)`.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Descriptor {
    pub dx: i8,
    pub dy: i8,
    pub class: String,
    pub instruction: Instruction,
    pub params: BTreeMap<String, ParamValue>,
}

impl Descriptor {
    pub fn new(dx: i8, dy: i8, class: impl Into<String>, instruction: Instruction) -> Self {
        Self {
            dx,
            dy,
            class: class.into(),
            instruction,
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// A decoded inbound message, addressed by source `(sx, sy)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedMessage {
    pub sx: i8,
    pub sy: i8,
    pub class: String,
    pub instruction: Instruction,
    pub params: BTreeMap<String, ParamValue>,
}

impl DecodedMessage {
    pub fn param(&self, key: &str) -> Option<&ParamValue> {
        self.params.get(key)
    }
}

//! Runtime values exchanged between bindings, routines, and events.
//!
//! A [`Value`] wraps an arbitrary JSON datum together with a `sensitive` flag.
//! The flag is sticky: every externally visible rendering of a sensitive value
//! (serialization, `Debug`, `Display`) produces [`SENSITIVE_VALUE_MASK`]
//! instead of the underlying content. Code that genuinely needs the real datum
//! must go through [`Value::content`].

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;

/// Fixed token rendered in place of sensitive content.
pub const SENSITIVE_VALUE_MASK: &str = "********";

/// Immutable runtime value with a sensitivity marker.
#[derive(Clone, PartialEq, Default)]
pub struct Value {
    content: JsonValue,
    sensitive: bool,
}

/// Runtime classification of a [`Value`]'s content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Null,
    Boolean,
    Number,
    String,
    List,
    Map,
}

impl ValueType {
    /// Lower-case label used in error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            ValueType::Null => "null",
            ValueType::Boolean => "boolean",
            ValueType::Number => "number",
            ValueType::String => "string",
            ValueType::List => "list",
            ValueType::Map => "map",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Value {
    /// Creates a non-sensitive value.
    pub fn new(content: impl Into<JsonValue>) -> Self {
        Self {
            content: content.into(),
            sensitive: false,
        }
    }

    /// Creates a sensitive value.
    pub fn sensitive(content: impl Into<JsonValue>) -> Self {
        Self {
            content: content.into(),
            sensitive: true,
        }
    }

    /// The null value.
    pub fn null() -> Self {
        Self::default()
    }

    /// Returns a copy flagged sensitive when either this value already is or `sensitive` is set.
    ///
    /// Sensitivity is never cleared by rebinding.
    pub fn with_sensitivity(mut self, sensitive: bool) -> Self {
        self.sensitive |= sensitive;
        self
    }

    /// Borrow the unmasked content.
    pub fn content(&self) -> &JsonValue {
        &self.content
    }

    /// Consume the value, returning the unmasked content.
    pub fn into_content(self) -> JsonValue {
        self.content
    }

    pub fn is_sensitive(&self) -> bool {
        self.sensitive
    }

    pub fn is_null(&self) -> bool {
        self.content.is_null()
    }

    /// Whether the value counts as "no value" for required-input checks.
    ///
    /// Null and the empty string are empty; every other datum, including
    /// `false`, `0` and empty collections, is a value.
    pub fn is_empty(&self) -> bool {
        match &self.content {
            JsonValue::Null => true,
            JsonValue::String(text) => text.is_empty(),
            _ => false,
        }
    }

    pub fn value_type(&self) -> ValueType {
        match &self.content {
            JsonValue::Null => ValueType::Null,
            JsonValue::Bool(_) => ValueType::Boolean,
            JsonValue::Number(_) => ValueType::Number,
            JsonValue::String(_) => ValueType::String,
            JsonValue::Array(_) => ValueType::List,
            JsonValue::Object(_) => ValueType::Map,
        }
    }

    /// JSON rendering used in event payloads and logs.
    pub fn masked(&self) -> JsonValue {
        if self.sensitive {
            JsonValue::String(SENSITIVE_VALUE_MASK.to_string())
        } else {
            self.content.clone()
        }
    }
}

impl From<JsonValue> for Value {
    fn from(content: JsonValue) -> Self {
        Value::new(content)
    }
}

impl From<&str> for Value {
    fn from(content: &str) -> Self {
        Value::new(content)
    }
}

impl From<String> for Value {
    fn from(content: String) -> Self {
        Value::new(content)
    }
}

impl From<i64> for Value {
    fn from(content: i64) -> Self {
        Value::new(content)
    }
}

impl From<bool> for Value {
    fn from(content: bool) -> Self {
        Value::new(content)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.sensitive {
            serializer.serialize_str(SENSITIVE_VALUE_MASK)
        } else {
            self.content.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        JsonValue::deserialize(deserializer).map(Value::new)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.sensitive {
            write!(f, "Value({SENSITIVE_VALUE_MASK})")
        } else {
            write!(f, "Value({})", self.content)
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.content {
            _ if self.sensitive => f.write_str(SENSITIVE_VALUE_MASK),
            JsonValue::String(text) => f.write_str(text),
            JsonValue::Null => f.write_str("None"),
            other => write!(f, "{other}"),
        }
    }
}

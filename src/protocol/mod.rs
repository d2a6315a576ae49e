//! Line-protocol envelopes exchanged with the worker.
//!
//! Every line on the wire is one JSON object whose `type` field names its
//! kind. [`Envelope`] keeps the object untyped; [`classifier`] turns inbound
//! envelopes into typed events and [`outbound`] builds the envelopes the
//! engine writes.

pub mod classifier;
pub mod outbound;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{AppError, Result};

/// One decoded line-protocol unit: a JSON object tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Envelope(Map<String, Value>);

impl Envelope {
    /// Parse one raw line.
    ///
    /// Returns `Ok(None)` for blank lines.
    ///
    /// # Errors
    ///
    /// - `AppError::Protocol("malformed json: …")` — not valid JSON.
    /// - `AppError::Protocol("envelope is not a json object")` — valid JSON
    ///   of another shape.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        let value: Value = serde_json::from_str(trimmed)
            .map_err(|e| AppError::Protocol(format!("malformed json: {e}")))?;
        Self::from_value(value).map(Some)
    }

    /// Wrap an already-decoded JSON value.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` unless `value` is an object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            _ => Err(AppError::Protocol("envelope is not a json object".into())),
        }
    }

    /// Wrap a `json!` object literal built by this crate.
    pub(crate) fn object(value: Value) -> Self {
        debug_assert!(value.is_object(), "outbound envelopes are objects");
        match value {
            Value::Object(map) => Self(map),
            other => {
                let mut map = Map::new();
                map.insert("value".into(), other);
                Self(map)
            }
        }
    }

    /// The top-level `type` discriminant.
    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        self.str_field("type")
    }

    /// Raw access to a top-level field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// A top-level field, when it is a string.
    #[must_use]
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// The underlying object.
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consume into a JSON value.
    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Serialise to a single NDJSON line, without the newline.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if serialisation fails.
    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.0)?)
    }
}

//! Partial state updates returned by stages and supplied on resume.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// How a single field of an update is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "snake_case")]
pub enum FieldWrite {
    /// Combine with the existing value using the field's reducer.
    Reduce(Value),
    /// Replace the whole field, ignoring the reducer.
    Overwrite(Value),
}

impl FieldWrite {
    /// Returns the written value.
    #[must_use]
    pub fn value(&self) -> &Value {
        match self {
            Self::Reduce(v) | Self::Overwrite(v) => v,
        }
    }
}

/// A partial update to a session's state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateUpdate {
    writes: BTreeMap<String, FieldWrite>,
}

impl StateUpdate {
    /// Creates an empty update.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a field through its reducer.
    #[must_use]
    pub fn set(mut self, key: impl Into<String>, value: Value) -> Self {
        self.writes.insert(key.into(), FieldWrite::Reduce(value));
        self
    }

    /// Replaces a field outright.
    #[must_use]
    pub fn overwrite(mut self, key: impl Into<String>, value: Value) -> Self {
        self.writes.insert(key.into(), FieldWrite::Overwrite(value));
        self
    }

    /// Builds an update from a JSON object; each key is written through its reducer.
    ///
    /// Returns `None` for non-object values.
    #[must_use]
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self {
                writes: map
                    .into_iter()
                    .map(|(k, v)| (k, FieldWrite::Reduce(v)))
                    .collect(),
            }),
            _ => None,
        }
    }

    /// Flattens the update into a JSON object of written values.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.writes
                .iter()
                .map(|(k, w)| (k.clone(), w.value().clone()))
                .collect(),
        )
    }

    /// Iterates over writes in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldWrite)> {
        self.writes.iter()
    }

    /// Returns the write for a field, if any.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&FieldWrite> {
        self.writes.get(key)
    }

    /// Returns the number of written fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Returns true if nothing is written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

impl From<serde_json::Map<String, Value>> for StateUpdate {
    fn from(map: serde_json::Map<String, Value>) -> Self {
        Self {
            writes: map
                .into_iter()
                .map(|(k, v)| (k, FieldWrite::Reduce(v)))
                .collect(),
        }
    }
}

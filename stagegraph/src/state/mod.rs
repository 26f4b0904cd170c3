//! The shared record threaded through a session.
//!
//! [`State`] is an ordered mapping from field name to JSON value. Stages never
//! mutate it directly; they return a [`StateUpdate`] which the engine merges
//! using the per-field [`Reducer`]s declared on the graph.

mod reducer;
mod update;

pub use reducer::{Reducer, Reducers};
pub use update::{FieldWrite, StateUpdate};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Ordered mapping from field key to value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State {
    fields: BTreeMap<String, Value>,
}

impl State {
    /// Creates an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a state from a JSON object. Non-object values yield `None`.
    #[must_use]
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self {
                fields: map.into_iter().collect(),
            }),
            _ => None,
        }
    }

    /// Returns the state as a JSON object.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Returns a field value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Returns a field as `f64` if it is numeric.
    #[must_use]
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.fields.get(key).and_then(Value::as_f64)
    }

    /// Returns a field as `bool` if it is a boolean.
    #[must_use]
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.fields.get(key).and_then(Value::as_bool)
    }

    /// Returns a field as `&str` if it is a string.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Returns true if the field is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Sets a field, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.fields.insert(key.into(), value);
    }

    /// Iterates over field names in order.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    /// Iterates over fields in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    /// Returns the number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if there are no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Merges a partial update into this state.
    pub fn apply(&mut self, update: &StateUpdate, reducers: &Reducers) {
        for (key, write) in update.iter() {
            match write {
                FieldWrite::Overwrite(value) => {
                    self.fields.insert(key.clone(), value.clone());
                }
                FieldWrite::Reduce(value) => {
                    let reducer = reducers.for_field(key);
                    match self.fields.get_mut(key) {
                        Some(existing) => reducer.reduce(existing, value.clone()),
                        None => {
                            self.fields.insert(key.clone(), reducer.initial(value.clone()));
                        }
                    }
                }
            }
        }
    }

    /// SHA-256 digest over the canonical JSON encoding of the state.
    ///
    /// Keys are ordered at every level, so equal states always share a digest.
    #[must_use]
    pub fn digest(&self) -> String {
        let bytes = serde_json::to_vec(&self.fields).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }
}

impl FromIterator<(String, Value)> for State {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

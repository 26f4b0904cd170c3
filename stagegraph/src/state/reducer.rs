//! Per-field merge strategies.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// How an incoming value is combined with a field's existing value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reducer {
    /// Objects merge recursively key by key; any other value replaces.
    #[default]
    Merge,
    /// The incoming value always replaces.
    Replace,
    /// Arrays concatenate; a non-array incoming value is pushed as one element.
    Append,
}

impl Reducer {
    /// Value stored when the field did not exist yet.
    #[must_use]
    pub fn initial(self, incoming: Value) -> Value {
        match (self, incoming) {
            (Self::Append, Value::Array(items)) => Value::Array(items),
            (Self::Append, other) => Value::Array(vec![other]),
            (_, other) => other,
        }
    }

    /// Folds `incoming` into `existing` in place.
    pub fn reduce(self, existing: &mut Value, incoming: Value) {
        match self {
            Self::Replace => *existing = incoming,
            Self::Merge => merge_values(existing, incoming),
            Self::Append => match existing {
                Value::Array(items) => match incoming {
                    Value::Array(more) => items.extend(more),
                    other => items.push(other),
                },
                _ => {
                    let previous = existing.take();
                    let mut items = vec![previous];
                    match incoming {
                        Value::Array(more) => items.extend(more),
                        other => items.push(other),
                    }
                    *existing = Value::Array(items);
                }
            },
        }
    }
}

fn merge_values(existing: &mut Value, incoming: Value) {
    match (existing, incoming) {
        (Value::Object(current), Value::Object(next)) => {
            for (key, value) in next {
                match current.get_mut(&key) {
                    Some(slot) => merge_values(slot, value),
                    None => {
                        current.insert(key, value);
                    }
                }
            }
        }
        (slot, other) => *slot = other,
    }
}

/// Reducer table for a graph; fields without an entry use [`Reducer::Merge`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reducers {
    fields: HashMap<String, Reducer>,
}

impl Reducers {
    /// Declares the reducer for a field.
    pub fn set(&mut self, field: impl Into<String>, reducer: Reducer) {
        self.fields.insert(field.into(), reducer);
    }

    /// Returns the reducer for a field.
    #[must_use]
    pub fn for_field(&self, field: &str) -> Reducer {
        self.fields.get(field).copied().unwrap_or_default()
    }

    /// Returns the number of explicitly declared reducers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if no reducers were declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_merge_is_recursive() {
        let mut existing = json!({"a": {"x": 1, "y": {"deep": 1}}, "b": 1});
        Reducer::Merge.reduce(&mut existing, json!({"a": {"y": {"other": 2}}, "b": 5}));
        assert_eq!(
            existing,
            json!({"a": {"x": 1, "y": {"deep": 1, "other": 2}}, "b": 5})
        );
    }

    #[test]
    fn test_merge_scalar_replaces() {
        let mut existing = json!(0.5);
        Reducer::Merge.reduce(&mut existing, json!(0.9));
        assert_eq!(existing, json!(0.9));
    }

    #[test]
    fn test_replace() {
        let mut existing = json!({"a": 1});
        Reducer::Replace.reduce(&mut existing, json!({"b": 2}));
        assert_eq!(existing, json!({"b": 2}));
    }

    #[test]
    fn test_append_variants() {
        let mut existing = json!([1]);
        Reducer::Append.reduce(&mut existing, json!([2, 3]));
        Reducer::Append.reduce(&mut existing, json!(4));
        assert_eq!(existing, json!([1, 2, 3, 4]));

        let mut scalar = json!("first");
        Reducer::Append.reduce(&mut scalar, json!("second"));
        assert_eq!(scalar, json!(["first", "second"]));

        assert_eq!(Reducer::Append.initial(json!("x")), json!(["x"]));
    }

    #[test]
    fn test_default_reducer_is_merge() {
        let reducers = Reducers::default();
        assert_eq!(reducers.for_field("anything"), Reducer::Merge);
    }
}

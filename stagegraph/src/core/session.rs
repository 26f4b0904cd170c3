//! Session identifiers.

use crate::utils::{generate_uuid, is_valid_identifier};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier binding one state and one cursor to a session (a thread or case id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wraps a string without validating it.
    ///
    /// The engine validates ids on `start`; stores accept whatever they are given.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random session id.
    #[must_use]
    pub fn generate() -> Self {
        Self(generate_uuid().to_string())
    }

    /// Returns true if the id is usable as a session key.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        is_valid_identifier(&self.0)
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

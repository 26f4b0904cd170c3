//! Utility functions for identifiers, timestamps and graph validation.

pub mod timestamps;
mod ids;
mod validation;

pub use ids::generate_uuid;
pub use timestamps::{format_iso8601, iso_timestamp, Timestamp};
pub use validation::{find_cycle, is_valid_identifier, RESERVED_NAMES};

//! Typed-attribute wire format shared by every storage backend.
//!
//! Items are flat maps from attribute name to a tagged value. The encoding
//! mirrors DynamoDB JSON: numbers travel as base-10 decimal strings under the
//! `N` tag, strings under the `S` tag.
//!
//! ```
//! use metroid_store::{Item, WireValue};
//!
//! let mut item = Item::new();
//! item.insert("subject_id".to_string(), WireValue::number(123));
//! item.insert("plan".to_string(), WireValue::string("Full"));
//!
//! let json = serde_json::to_string(&item["subject_id"]).unwrap();
//! assert_eq!(json, r#"{"N":"123"}"#);
//! ```

use std::collections::HashMap;
use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// A single attribute as stored by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WireValue {
    /// Numeric attribute, carried as its decimal string representation.
    #[serde(rename = "N")]
    N(String),
    /// String attribute.
    #[serde(rename = "S")]
    S(String),
}

/// A stored item: attribute name to tagged value.
pub type Item = HashMap<String, WireValue>;

impl WireValue {
    /// Builds a numeric value from anything with a decimal `Display`.
    pub fn number(value: impl Display) -> Self {
        WireValue::N(value.to_string())
    }

    /// Builds a string value.
    pub fn string(value: impl Into<String>) -> Self {
        WireValue::S(value.into())
    }

    /// Returns the raw decimal text if this is a numeric value.
    pub fn as_number(&self) -> Option<&str> {
        match self {
            WireValue::N(n) => Some(n),
            WireValue::S(_) => None,
        }
    }

    /// Parses a numeric value as an integer.
    pub fn as_i64(&self) -> Option<i64> {
        self.as_number().and_then(|n| n.parse().ok())
    }

    /// Returns the string if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            WireValue::S(s) => Some(s),
            WireValue::N(_) => None,
        }
    }
}

/// Reads an integer key attribute out of an item.
pub fn key_value(item: &Item, attribute: &str) -> Option<i64> {
    item.get(attribute).and_then(WireValue::as_i64)
}

//! The Metroid record: one timestamped, trackable event.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, SubsecRound, TimeZone, Utc};
use metroid_store::storage::table_manager::{SUBJECT_ID_KEY, TIMESTAMP_KEY};
use metroid_store::{Item, WireValue};

use crate::error::{MetroidError, Result};

/// Attribute holding the record's category.
pub const CATEGORY_KEY: &str = "category";

/// Value stored in a record's attribute bag.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Number(f64),
    Text(String),
}

impl AttributeValue {
    /// Compares across types the way loosely typed callers expect:
    /// `Number(129.99)` equals `Text("129.99")`.
    pub fn loosely_equals(&self, other: &AttributeValue) -> bool {
        match (self, other) {
            (AttributeValue::Number(a), AttributeValue::Number(b)) => a == b,
            (AttributeValue::Text(a), AttributeValue::Text(b)) => a == b,
            (AttributeValue::Number(n), AttributeValue::Text(s))
            | (AttributeValue::Text(s), AttributeValue::Number(n)) => {
                s.trim().parse::<f64>().is_ok_and(|parsed| parsed == *n)
            }
        }
    }

    fn to_wire(&self) -> WireValue {
        match self {
            AttributeValue::Number(n) => WireValue::number(n),
            AttributeValue::Text(s) => WireValue::string(s.clone()),
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Number(n) => write!(f, "{}", n),
            AttributeValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Number(value)
    }
}

impl From<i32> for AttributeValue {
    fn from(value: i32) -> Self {
        AttributeValue::Number(f64::from(value))
    }
}

impl From<u32> for AttributeValue {
    fn from(value: u32) -> Self {
        AttributeValue::Number(f64::from(value))
    }
}

impl From<i64> for AttributeValue {
    #[allow(clippy::cast_precision_loss)]
    fn from(value: i64) -> Self {
        AttributeValue::Number(value as f64)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Text(value)
    }
}

/// A trackable event.
///
/// `subject_id`, `category` and `timestamp` are fixed at construction; only the
/// attribute bag can change afterwards. Timestamps are kept at millisecond
/// precision, matching what the wire format can carry.
#[derive(Debug, Clone)]
pub struct Metroid {
    subject_id: i64,
    category: i64,
    timestamp: DateTime<Utc>,
    attributes: HashMap<String, AttributeValue>,
}

impl Metroid {
    /// Creates a record stamped with the current time.
    pub fn new(subject_id: i64, category: i64) -> Self {
        Self::with_timestamp(subject_id, category, Utc::now())
    }

    /// Creates a record with an explicit timestamp, e.g. when backfilling.
    pub fn with_timestamp(subject_id: i64, category: i64, timestamp: DateTime<Utc>) -> Self {
        Self {
            subject_id,
            category,
            timestamp: timestamp.trunc_subsecs(3),
            attributes: HashMap::new(),
        }
    }

    pub fn subject_id(&self) -> i64 {
        self.subject_id
    }

    pub fn category(&self) -> i64 {
        self.category
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn attributes(&self) -> &HashMap<String, AttributeValue> {
        &self.attributes
    }

    /// Sets an attribute. Names are not checked against the reserved key
    /// fields; reserved fields win when the record is serialized.
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<AttributeValue>) {
        self.attributes.insert(name.into(), value.into());
    }

    pub fn get_attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    /// Serializes to the backend's typed-attribute format.
    pub fn to_wire(&self) -> Item {
        let mut item: Item = self
            .attributes
            .iter()
            .map(|(name, value)| (name.clone(), value.to_wire()))
            .collect();
        item.insert(SUBJECT_ID_KEY.to_string(), WireValue::number(self.subject_id));
        item.insert(
            TIMESTAMP_KEY.to_string(),
            WireValue::number(self.timestamp.timestamp_millis()),
        );
        item.insert(CATEGORY_KEY.to_string(), WireValue::number(self.category));
        item
    }

    /// Rebuilds a record from a stored item.
    ///
    /// # Errors
    ///
    /// Returns `MalformedRecord` if a reserved field is missing or not an
    /// integer, or a numeric attribute does not parse.
    pub fn from_wire(item: &Item) -> Result<Self> {
        let subject_id = reserved_field(item, SUBJECT_ID_KEY)?;
        let category = reserved_field(item, CATEGORY_KEY)?;
        let millis = reserved_field(item, TIMESTAMP_KEY)?;
        let timestamp = Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| MetroidError::malformed(format!("timestamp {} is out of range", millis)))?;

        let mut attributes = HashMap::new();
        for (name, value) in item {
            if is_reserved(name) {
                continue;
            }
            let value = match value {
                WireValue::N(raw) => AttributeValue::Number(raw.parse().map_err(|_| {
                    MetroidError::malformed(format!("attribute '{}' is not a number: '{}'", name, raw))
                })?),
                WireValue::S(text) => AttributeValue::Text(text.clone()),
            };
            attributes.insert(name.clone(), value);
        }

        Ok(Self {
            subject_id,
            category,
            timestamp,
            attributes,
        })
    }

    /// Value equality: same key fields and loosely equal attribute bags.
    pub fn equals(&self, other: &Metroid) -> bool {
        self.subject_id == other.subject_id
            && self.category == other.category
            && self.timestamp == other.timestamp
            && self.attributes.len() == other.attributes.len()
            && self.attributes.iter().all(|(name, expected)| {
                other
                    .get_attribute(name)
                    .is_some_and(|actual| expected.loosely_equals(actual))
            })
    }
}

impl fmt::Display for Metroid {
    /// Renders the wire representation as JSON with sorted keys.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sorted: BTreeMap<String, WireValue> = self.to_wire().into_iter().collect();
        let json = serde_json::to_string(&sorted).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

fn is_reserved(name: &str) -> bool {
    name == SUBJECT_ID_KEY || name == TIMESTAMP_KEY || name == CATEGORY_KEY
}

fn reserved_field(item: &Item, name: &str) -> Result<i64> {
    match item.get(name) {
        None => Err(MetroidError::malformed(format!("missing field '{}'", name))),
        Some(WireValue::S(_)) => Err(MetroidError::malformed(format!("field '{}' is not numeric", name))),
        Some(value) => value.as_i64().ok_or_else(|| {
            MetroidError::malformed(format!("field '{}' is not an integer", name))
        }),
    }
}

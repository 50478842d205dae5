//! The save value tree.
//!
//! A player save is an arbitrarily deep record that old versions of the game
//! shaped in many different ways, so it is held as a dynamic tree rather than
//! a fixed struct. Two properties matter for persistence:
//!
//!   - Records are ordered maps, so serialization is deterministic and the
//!     integrity fingerprint of an encoded save is stable.
//!   - A non-finite number cannot be written as JSON. It is written as the
//!     text `"NaN"` / `"Infinity"` / `"-Infinity"` instead, which is exactly
//!     the form the validator looks for on import. Decoding does not map it
//!     back: a non-finite number comes back as `Text`, which `to_number`
//!     still reads as the same value. Text fields that happen to read
//!     `"Infinity"` stay text.

use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub type Record = BTreeMap<String, SaveValue>;

/// Largest integer an f64 holds exactly (2^53).
const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum SaveValue {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<SaveValue>),
    Record(Record),
}

impl SaveValue {
    pub fn record() -> Self {
        Self::Record(Record::new())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric value, also accepting numbers carried as text (big-number
    /// fields are stored as strings like `"1.5e308"`).
    pub fn to_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Self::Record(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_record_mut(&mut self) -> Option<&mut Record> {
        match self {
            Self::Record(r) => Some(r),
            _ => None,
        }
    }

    /// Follow a dotted path (`"options.news.enabled"`) through nested records.
    pub fn pointer(&self, path: &str) -> Option<&SaveValue> {
        path.split('.')
            .try_fold(self, |node, key| node.as_record()?.get(key))
    }

    pub fn pointer_mut(&mut self, path: &str) -> Option<&mut SaveValue> {
        path.split('.')
            .try_fold(self, |node, key| node.as_record_mut()?.get_mut(key))
    }
}

impl From<bool> for SaveValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for SaveValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i64> for SaveValue {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<u32> for SaveValue {
    fn from(n: u32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<&str> for SaveValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for SaveValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Record> for SaveValue {
    fn from(r: Record) -> Self {
        Self::Record(r)
    }
}

fn non_finite_text(n: f64) -> &'static str {
    if n.is_nan() {
        "NaN"
    } else if n.is_sign_positive() {
        "Infinity"
    } else {
        "-Infinity"
    }
}

impl Serialize for SaveValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Number(n) if !n.is_finite() => serializer.serialize_str(non_finite_text(*n)),
            // Whole numbers stay integers on the wire so counters and
            // timestamps read back exactly as they were written.
            Self::Number(n) if n.fract() == 0.0 && n.abs() < MAX_EXACT_INT => {
                serializer.serialize_i64(*n as i64)
            }
            Self::Number(n) => serializer.serialize_f64(*n),
            Self::Text(s) => serializer.serialize_str(s),
            Self::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Record(record) => serializer.collect_map(record),
        }
    }
}

struct SaveValueVisitor;

impl<'de> Visitor<'de> for SaveValueVisitor {
    type Value = SaveValue;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("any save value")
    }

    fn visit_unit<E: de::Error>(self) -> Result<SaveValue, E> {
        Ok(SaveValue::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<SaveValue, E> {
        Ok(SaveValue::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<SaveValue, D::Error> {
        SaveValue::deserialize(d)
    }

    fn visit_bool<E: de::Error>(self, b: bool) -> Result<SaveValue, E> {
        Ok(SaveValue::Bool(b))
    }

    fn visit_i64<E: de::Error>(self, n: i64) -> Result<SaveValue, E> {
        Ok(SaveValue::Number(n as f64))
    }

    fn visit_u64<E: de::Error>(self, n: u64) -> Result<SaveValue, E> {
        Ok(SaveValue::Number(n as f64))
    }

    fn visit_f64<E: de::Error>(self, n: f64) -> Result<SaveValue, E> {
        Ok(SaveValue::Number(n))
    }

    fn visit_str<E: de::Error>(self, s: &str) -> Result<SaveValue, E> {
        Ok(SaveValue::Text(s.to_string()))
    }

    fn visit_string<E: de::Error>(self, s: String) -> Result<SaveValue, E> {
        Ok(SaveValue::Text(s))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<SaveValue, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(SaveValue::List(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<SaveValue, A::Error> {
        let mut record = Record::new();
        while let Some((key, value)) = map.next_entry::<String, SaveValue>()? {
            record.insert(key, value);
        }
        Ok(SaveValue::Record(record))
    }
}

impl<'de> Deserialize<'de> for SaveValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(SaveValueVisitor)
    }
}

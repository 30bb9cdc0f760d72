use std::collections::BTreeMap;
use std::fmt;

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

/// A single decoded signal value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl FieldValue {
    /// Numeric view of the value. Booleans read as `0.0` / `1.0`.
    pub fn as_f64(self) -> f64 {
        match self {
            FieldValue::Int(v) => v as f64,
            FieldValue::Float(v) => v,
            FieldValue::Bool(v) => f64::from(u8::from(v)),
        }
    }

    /// Truthiness of the value. Numbers are true when non-zero.
    pub fn as_bool(self) -> bool {
        match self {
            FieldValue::Int(v) => v != 0,
            FieldValue::Float(v) => v != 0.0,
            FieldValue::Bool(v) => v,
        }
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

/// Text form used by CSV rows and terminal output; non-finite floats use
/// the same spellings as JSON.
impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            FieldValue::Int(v) => write!(f, "{v}"),
            FieldValue::Float(v) if v.is_nan() => f.write_str("NaN"),
            FieldValue::Float(v) if v == f64::INFINITY => f.write_str("Infinity"),
            FieldValue::Float(v) if v == f64::NEG_INFINITY => f.write_str("-Infinity"),
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::Bool(v) => write!(f, "{v}"),
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match *self {
            FieldValue::Int(v) => serializer.serialize_i64(v),
            FieldValue::Float(v) => serialize_finite(&v, serializer),
            FieldValue::Bool(v) => serializer.serialize_bool(v),
        }
    }
}

/// Serialize a float, writing non-finite values as the strings
/// `"Infinity"`, `"-Infinity"` and `"NaN"`.
///
/// JSON has no encoding for these, and the dashboards parse the strings
/// back with `Number(...)`.
pub fn serialize_finite<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    let v = *value;
    if v.is_nan() {
        serializer.serialize_str("NaN")
    } else if v == f64::INFINITY {
        serializer.serialize_str("Infinity")
    } else if v == f64::NEG_INFINITY {
        serializer.serialize_str("-Infinity")
    } else {
        serializer.serialize_f64(v)
    }
}

/// Name → value mapping that keeps decode order.
///
/// Inserting an existing name replaces its value in place, so a flag that
/// shares a name with a scalar field behaves like a dictionary update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields {
    entries: Vec<(String, FieldValue)>,
    /// Position of each name in `entries`.
    index: BTreeMap<String, usize>,
}

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            index: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        let name = name.into();
        let value = value.into();
        match self.index.get(&name) {
            Some(&position) => self.entries[position].1 = value,
            None => {
                self.index.insert(name.clone(), self.entries.len());
                self.entries.push((name, value));
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<FieldValue> {
        self.index
            .get(name)
            .map(|&position| self.entries[position].1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, FieldValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), *value))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<FieldValue>> FromIterator<(K, V)> for Fields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut fields = Fields::new();
        for (key, value) in iter {
            fields.insert(key, value);
        }
        fields
    }
}

impl<K: Into<String>, V: Into<FieldValue>> Extend<(K, V)> for Fields {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

impl Serialize for Fields {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// One unpacked payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedPacket {
    #[serde(serialize_with = "serialize_variant")]
    pub variant: u8,
    pub fields: Fields,
}

impl DecodedPacket {
    pub fn new(variant: u8, fields: Fields) -> Self {
        Self { variant, fields }
    }

    pub fn variant_char(&self) -> char {
        char::from(self.variant)
    }
}

fn serialize_variant<S: Serializer>(variant: &u8, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_char(char::from(*variant))
}

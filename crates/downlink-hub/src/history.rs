use std::collections::{BTreeMap, VecDeque};

use serde::Serialize;

use crate::reading::Reading;

/// One entry of a history series.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum HistoryValue {
    Number(Reading),
    Label(String),
}

impl From<f64> for HistoryValue {
    fn from(value: f64) -> Self {
        HistoryValue::Number(Reading(value))
    }
}

impl From<Reading> for HistoryValue {
    fn from(value: Reading) -> Self {
        HistoryValue::Number(value)
    }
}

impl From<String> for HistoryValue {
    fn from(value: String) -> Self {
        HistoryValue::Label(value)
    }
}

/// Named time series, each a ring buffer of at most `capacity` entries.
///
/// Appending to a full series evicts its oldest entry.
#[derive(Debug, Clone, PartialEq)]
pub struct History {
    capacity: usize,
    series: BTreeMap<&'static str, VecDeque<HistoryValue>>,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            series: BTreeMap::new(),
        }
    }

    /// Ensure a series exists, so it is published even before its first
    /// sample arrives.
    pub fn register(&mut self, name: &'static str) {
        self.series.entry(name).or_default();
    }

    pub fn push(&mut self, name: &'static str, value: impl Into<HistoryValue>) {
        let series = self.series.entry(name).or_default();
        if series.len() == self.capacity {
            series.pop_front();
        }
        series.push_back(value.into());
    }

    /// Append every value of a cycle's point.
    pub fn extend(&mut self, point: &HistoryPoint) {
        for (name, value) in point.iter() {
            self.push(name, value.clone());
        }
    }

    pub fn series(&self, name: &str) -> Option<&VecDeque<HistoryValue>> {
        self.series.get(name)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.series.keys().copied()
    }
}

impl Serialize for History {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.series.serialize(serializer)
    }
}

/// The values one aggregation cycle appends, keyed by series name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct HistoryPoint(BTreeMap<&'static str, HistoryValue>);

impl HistoryPoint {
    pub fn insert(&mut self, name: &'static str, value: impl Into<HistoryValue>) {
        self.0.insert(name, value.into());
    }

    pub fn get(&self, name: &str) -> Option<&HistoryValue> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &HistoryValue)> {
        self.0.iter().map(|(name, value)| (*name, value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

//! Core series types: definitions, measurements, categories and points

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

use super::distance::{truncate_to_second, MeasurementDistance};
use crate::error::SeriesError;

/// Characters that may not appear in owners or series names, since both are
/// embedded verbatim in partition ids
const FORBIDDEN_ID_CHARS: [char; 2] = ['@', '/'];

/// Identifies one logical series: (owner, name, distance)
///
/// Ordering is owner, then name, then distance (finest first).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeriesDefinition {
    owner: String,
    name: String,
    distance: MeasurementDistance,
}

impl SeriesDefinition {
    /// Create a validated definition
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        distance: MeasurementDistance,
    ) -> Result<Self, SeriesError> {
        let definition = SeriesDefinition {
            owner: owner.into(),
            name: name.into(),
            distance,
        };
        definition.validate()?;
        Ok(definition)
    }

    /// Re-check the invariants; deserialized definitions bypass `new`
    pub fn validate(&self) -> Result<(), SeriesError> {
        validate_component("owner", &self.owner)?;
        validate_component("series name", &self.name)
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn distance(&self) -> MeasurementDistance {
        self.distance
    }

    /// Same owner and name at another distance
    pub fn with_distance(&self, distance: MeasurementDistance) -> SeriesDefinition {
        SeriesDefinition {
            distance,
            ..self.clone()
        }
    }
}

impl fmt::Display for SeriesDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.owner, self.name, self.distance)
    }
}

fn validate_component(what: &str, value: &str) -> Result<(), SeriesError> {
    if value.is_empty() {
        return Err(SeriesError::invalid(format!("{} must not be empty", what)));
    }
    if let Some(c) = value
        .chars()
        .find(|c| c.is_whitespace() || FORBIDDEN_ID_CHARS.contains(c))
    {
        return Err(SeriesError::invalid(format!(
            "{} '{}' contains forbidden character {:?}",
            what, value, c
        )));
    }
    Ok(())
}

/// A single numeric measurement value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MeasurementValue {
    Integer(i64),
    Float(f64),
}

impl MeasurementValue {
    pub fn as_f64(&self) -> f64 {
        match self {
            MeasurementValue::Integer(i) => *i as f64,
            MeasurementValue::Float(f) => *f,
        }
    }

    pub fn is_finite(&self) -> bool {
        match self {
            MeasurementValue::Integer(_) => true,
            MeasurementValue::Float(f) => f.is_finite(),
        }
    }

    /// Sum two values; integers stay integers unless the sum overflows
    pub fn add(self, other: MeasurementValue) -> MeasurementValue {
        match (self, other) {
            (MeasurementValue::Integer(a), MeasurementValue::Integer(b)) => a
                .checked_add(b)
                .map(MeasurementValue::Integer)
                .unwrap_or(MeasurementValue::Float(a as f64 + b as f64)),
            (a, b) => MeasurementValue::Float(a.as_f64() + b.as_f64()),
        }
    }
}

impl From<i64> for MeasurementValue {
    fn from(v: i64) -> Self {
        MeasurementValue::Integer(v)
    }
}

impl From<i32> for MeasurementValue {
    fn from(v: i32) -> Self {
        MeasurementValue::Integer(v as i64)
    }
}

impl From<f64> for MeasurementValue {
    fn from(v: f64) -> Self {
        MeasurementValue::Float(v)
    }
}

impl fmt::Display for MeasurementValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeasurementValue::Integer(i) => write!(f, "{}", i),
            MeasurementValue::Float(v) => write!(f, "{}", v),
        }
    }
}

/// Measurement name to value; names are unique within a point
pub type Measurements = BTreeMap<String, MeasurementValue>;

/// Key/value pairs distinguishing observations at the same timestamp
///
/// Stored sorted by key so iteration order never depends on insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Categories {
    pairs: BTreeMap<String, String>,
}

impl Categories {
    pub fn new(pairs: BTreeMap<String, String>) -> Self {
        Categories { pairs }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from (key, value) tuples; a repeated key keeps the last value
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Categories {
            pairs: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pairs.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&String> {
        self.pairs.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.pairs.contains_key(key)
    }

    /// Pairs in ascending key order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.pairs.iter()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// One observation of a series
///
/// Two points with equal timestamp and equal categories are the same logical
/// point; the later write replaces the earlier one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    #[serde(serialize_with = "serialize_timestamp", deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub measurements: Measurements,
    #[serde(default, skip_serializing_if = "Categories::is_empty")]
    pub categories: Categories,
}

impl TimeSeriesPoint {
    /// Create a point without measurements; add them with `measurement`
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        TimeSeriesPoint {
            timestamp: truncate_to_second(timestamp),
            measurements: Measurements::new(),
            categories: Categories::empty(),
        }
    }

    pub fn measurement(
        mut self,
        name: impl Into<String>,
        value: impl Into<MeasurementValue>,
    ) -> Self {
        self.measurements.insert(name.into(), value.into());
        self
    }

    pub fn category(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.categories.insert(key, value);
        self
    }

    pub fn with_categories(mut self, categories: Categories) -> Self {
        self.categories = categories;
        self
    }

    pub fn get_measurement(&self, name: &str) -> Option<MeasurementValue> {
        self.measurements.get(name).copied()
    }
}

/// Format used on the wire: `yyyy-MM-ddTHH:mm:ssZ`
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse an RFC 3339 timestamp with any offset and normalize it to UTC
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, SeriesError> {
    DateTime::parse_from_rfc3339(s.trim())
        .map(|ts| truncate_to_second(ts.with_timezone(&Utc)))
        .map_err(|e| SeriesError::InvalidTimestamp(format!("'{}': {}", s, e)))
}

fn serialize_timestamp<S: Serializer>(
    ts: &DateTime<Utc>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_timestamp(ts))
}

fn deserialize_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).map_err(serde::de::Error::custom)
}

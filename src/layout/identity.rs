//! Document identity for stored points
//!
//! Identity format: `<bucket start>[@<key>=<value>...]`
//!
//! Examples:
//! - `2021-03-03T00:00:00Z` (no categories)
//! - `2021-03-03T00:00:00Z@category1=abc@category2=def`
//!
//! The bucket start is the point's timestamp truncated at the series'
//! distance, and categories follow in key order. `%`, `@` and `=` inside keys
//! and values are percent-escaped, so two points share an identity exactly
//! when they share truncated timestamp and category set.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::{
    format_timestamp, Categories, MeasurementDistance, SeriesDefinition, TimeSeriesPoint,
};

/// Stable id of a stored point within its partition
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        DocumentId(s.to_string())
    }
}

/// Derives document identities from points
pub struct IdentityResolver;

impl IdentityResolver {
    /// Identity of `point` when stored in a series with `definition`
    pub fn id(point: &TimeSeriesPoint, definition: &SeriesDefinition) -> DocumentId {
        Self::id_at(point, definition.distance())
    }

    /// Identity of `point` in any series with the given distance
    pub fn id_at(point: &TimeSeriesPoint, distance: MeasurementDistance) -> DocumentId {
        let bucket = distance.bucket_start(point.timestamp);
        let mut id = format_timestamp(&bucket);
        Self::append_categories(&mut id, &point.categories);
        DocumentId(id)
    }

    fn append_categories(id: &mut String, categories: &Categories) {
        for (key, value) in categories.iter() {
            id.push('@');
            escape_into(id, key);
            id.push('=');
            escape_into(id, value);
        }
    }
}

fn escape_into(out: &mut String, raw: &str) {
    for c in raw.chars() {
        match c {
            '%' => out.push_str("%25"),
            '@' => out.push_str("%40"),
            '=' => out.push_str("%3D"),
            other => out.push(other),
        }
    }
}

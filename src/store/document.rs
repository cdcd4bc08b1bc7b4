//! Stored document layout and field typing
//!
//! A point is stored as a flat document:
//!
//! ```text
//! { "timestamp": Date, <measurement>: Numeric..., <category key>: Keyword... }
//! ```
//!
//! Every field name has one type per partition. Integers and floats share
//! the `Numeric` family, the way a search engine coerces between them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::StorageError;
use crate::model::{Categories, MeasurementValue, Measurements, TimeSeriesPoint};

/// Reserved field holding the (bucket-truncated) point timestamp
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// A single stored field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Long(i64),
    Double(f64),
    Keyword(String),
    Date(DateTime<Utc>),
}

impl FieldValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::Long(_) | FieldValue::Double(_) => FieldType::Numeric,
            FieldValue::Keyword(_) => FieldType::Keyword,
            FieldValue::Date(_) => FieldType::Date,
        }
    }
}

/// Type family of a field within a partition mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    Numeric,
    Keyword,
    Date,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Numeric => f.write_str("numeric"),
            FieldType::Keyword => f.write_str("keyword"),
            FieldType::Date => f.write_str("date"),
        }
    }
}

/// Document body: field name to value
pub type Document = BTreeMap<String, FieldValue>;

/// Field name to type, accumulated from every document in a partition
pub type PartitionMapping = BTreeMap<String, FieldType>;

/// First field of `document` whose type disagrees with `mapping`
///
/// Returns `(field, existing, attempted)`.
pub fn find_mapping_conflict<'d>(
    mapping: &PartitionMapping,
    document: &'d Document,
) -> Option<(&'d str, FieldType, FieldType)> {
    document.iter().find_map(|(field, value)| {
        let attempted = value.field_type();
        match mapping.get(field) {
            Some(&existing) if existing != attempted => Some((field.as_str(), existing, attempted)),
            _ => None,
        }
    })
}

/// Add the fields of `document` to `mapping`
///
/// Callers check `find_mapping_conflict` first; existing entries are kept.
pub fn extend_mapping(mapping: &mut PartitionMapping, document: &Document) {
    for (field, value) in document {
        mapping.entry(field.clone()).or_insert_with(|| value.field_type());
    }
}

/// Encode a point as a stored document at the given bucket timestamp
pub fn encode_point(point: &TimeSeriesPoint, bucket: DateTime<Utc>) -> Document {
    let mut document = Document::new();
    document.insert(TIMESTAMP_FIELD.to_string(), FieldValue::Date(bucket));
    for (name, value) in &point.measurements {
        let field = match value {
            MeasurementValue::Integer(i) => FieldValue::Long(*i),
            MeasurementValue::Float(f) => FieldValue::Double(*f),
        };
        document.insert(name.clone(), field);
    }
    for (key, value) in point.categories.iter() {
        document.insert(key.clone(), FieldValue::Keyword(value.clone()));
    }
    document
}

/// Decode a stored document back into a point
pub fn decode_point(document: &Document) -> Result<TimeSeriesPoint, StorageError> {
    let timestamp = match document.get(TIMESTAMP_FIELD) {
        Some(FieldValue::Date(ts)) => *ts,
        Some(other) => {
            return Err(StorageError::Corrupt(format!(
                "timestamp field has type {}",
                other.field_type()
            )))
        }
        None => return Err(StorageError::Corrupt("document has no timestamp".to_string())),
    };

    let mut measurements = Measurements::new();
    let mut categories = Categories::empty();
    for (field, value) in document {
        match value {
            FieldValue::Long(i) => {
                measurements.insert(field.clone(), MeasurementValue::Integer(*i));
            }
            FieldValue::Double(f) => {
                measurements.insert(field.clone(), MeasurementValue::Float(*f));
            }
            FieldValue::Keyword(v) => categories.insert(field.clone(), v.clone()),
            FieldValue::Date(_) if field == TIMESTAMP_FIELD => {}
            FieldValue::Date(_) => {
                return Err(StorageError::Corrupt(format!(
                    "unexpected date field '{}'",
                    field
                )))
            }
        }
    }

    Ok(TimeSeriesPoint {
        timestamp,
        measurements,
        categories,
    })
}

//! Series data model
//!
//! - `MeasurementDistance`: granularity hierarchy and bucket math
//! - `SeriesDefinition`: (owner, name, distance) primary key
//! - `TimeSeriesPoint`: timestamp + measurements + categories

mod distance;
mod types;

pub use distance::{truncate_to_second, MeasurementDistance};
pub use types::{
    format_timestamp, parse_timestamp, Categories, MeasurementValue, Measurements,
    SeriesDefinition, TimeSeriesPoint,
};

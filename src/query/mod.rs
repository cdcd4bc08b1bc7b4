//! Read side: range reads, aggregations and availability listing
//!
//! The reader and lister only ever issue read calls against the store.

pub mod aggregation;
mod available;
mod reader;

pub use aggregation::{available_series, last_per, percentile_filter, sum_histogram, sum_range};
pub use available::AvailableSeriesLister;
pub use reader::{SeriesReader, DEFAULT_MAX_POINTS};

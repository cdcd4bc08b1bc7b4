//! Measurement distances and bucket-boundary math
//!
//! A distance is the sampling granularity of a series. Distances are totally
//! ordered from finest (minutes) to coarsest (years), and every coarser
//! bucket is an exact union of finer buckets. All arithmetic is done in UTC.

use chrono::{DateTime, Datelike, Months, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SeriesError;

/// Granularity of a time series, ordered finest to coarsest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasurementDistance {
    Minutes,
    Hours,
    Days,
    Months,
    Years,
}

impl MeasurementDistance {
    /// All distances, finest first
    pub const ALL: [MeasurementDistance; 5] = [
        MeasurementDistance::Minutes,
        MeasurementDistance::Hours,
        MeasurementDistance::Days,
        MeasurementDistance::Months,
        MeasurementDistance::Years,
    ];

    /// Singular label embedded in partition ids (`minute`, `hour`, ...)
    pub fn partition_label(&self) -> &'static str {
        match self {
            MeasurementDistance::Minutes => "minute",
            MeasurementDistance::Hours => "hour",
            MeasurementDistance::Days => "day",
            MeasurementDistance::Months => "month",
            MeasurementDistance::Years => "year",
        }
    }

    /// Plural label used by the API surface (`minutes`, `hours`, ...)
    pub fn api_label(&self) -> &'static str {
        match self {
            MeasurementDistance::Minutes => "minutes",
            MeasurementDistance::Hours => "hours",
            MeasurementDistance::Days => "days",
            MeasurementDistance::Months => "months",
            MeasurementDistance::Years => "years",
        }
    }

    /// Parse a singular partition label back to a distance
    pub fn from_partition_label(label: &str) -> Option<MeasurementDistance> {
        Self::ALL
            .iter()
            .copied()
            .find(|d| d.partition_label() == label)
    }

    /// Truncate a timestamp down to the start of its bucket at this distance
    pub fn bucket_start(&self, timestamp: DateTime<Utc>) -> DateTime<Utc> {
        let (year, month, day, hour, minute) = (
            timestamp.year(),
            timestamp.month(),
            timestamp.day(),
            timestamp.hour(),
            timestamp.minute(),
        );
        let (month, day, hour, minute) = match self {
            MeasurementDistance::Minutes => (month, day, hour, minute),
            MeasurementDistance::Hours => (month, day, hour, 0),
            MeasurementDistance::Days => (month, day, 0, 0),
            MeasurementDistance::Months => (month, 1, 0, 0),
            MeasurementDistance::Years => (1, 1, 0, 0),
        };
        Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
            .single()
            .expect("truncated fields of a valid UTC instant form a valid instant")
    }

    /// Exclusive upper bound of the bucket containing `timestamp`
    ///
    /// Returns `None` only at the very end of chrono's representable range.
    pub fn bucket_end(&self, timestamp: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = self.bucket_start(timestamp);
        match self {
            MeasurementDistance::Minutes => start.checked_add_signed(chrono::Duration::minutes(1)),
            MeasurementDistance::Hours => start.checked_add_signed(chrono::Duration::hours(1)),
            MeasurementDistance::Days => start.checked_add_signed(chrono::Duration::days(1)),
            MeasurementDistance::Months => start.checked_add_months(Months::new(1)),
            MeasurementDistance::Years => start.checked_add_months(Months::new(12)),
        }
    }

    /// Distances strictly coarser than this one, finest first
    pub fn coarser(&self) -> Vec<MeasurementDistance> {
        Self::ALL.iter().copied().filter(|d| d > self).collect()
    }

    /// Check that `target` is strictly coarser than `self`
    pub fn require_coarser(&self, target: MeasurementDistance) -> Result<(), SeriesError> {
        if target > *self {
            Ok(())
        } else {
            Err(SeriesError::invalid(format!(
                "target distance {} must be coarser than series distance {}",
                target, self
            )))
        }
    }
}

impl fmt::Display for MeasurementDistance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_label())
    }
}

impl FromStr for MeasurementDistance {
    type Err = SeriesError;

    /// Accepts both the API label (`hours`) and the partition label (`hour`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|d| d.api_label() == lower || d.partition_label() == lower)
            .ok_or_else(|| SeriesError::invalid(format!("unknown distance: {}", s)))
    }
}

/// Drop sub-second precision; points are stored at second resolution
pub fn truncate_to_second(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp.with_nanosecond(0).unwrap_or(timestamp)
}
